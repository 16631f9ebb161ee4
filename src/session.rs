use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{ConnectionState, DeviceClassification};

/// Identity cached for the lifetime of one connection.
#[derive(Debug, Clone, Copy, Default)]
struct Identity {
    session_id: u32,
    classification: DeviceClassification,
    consecutive_errors: i32,
}

/// Thread-safe session bookkeeping for one client.
///
/// The connection state has its own lock; session id, classification and the
/// consecutive error count share a second one.
#[derive(Debug)]
pub(crate) struct SessionState {
    device_id: u8,
    state: Mutex<ConnectionState>,
    identity: Mutex<Identity>,
}

impl SessionState {
    pub(crate) fn new(device_id: u8) -> Self {
        Self {
            device_id,
            state: Mutex::new(ConnectionState::Disconnected),
            identity: Mutex::new(Identity::default()),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state != next {
            tracing::info!(
                device_id = self.device_id,
                from = ?*state,
                to = ?next,
                "connection state changed"
            );
            *state = next;
        }
    }

    /// Session id, or 0 when no session is active.
    pub(crate) fn session_id(&self) -> u32 {
        lock(&self.identity).session_id
    }

    pub(crate) fn set_session_id(&self, session_id: u32) {
        lock(&self.identity).session_id = session_id;
    }

    pub(crate) fn classification(&self) -> DeviceClassification {
        lock(&self.identity).classification
    }

    pub(crate) fn set_classification(&self, classification: DeviceClassification) {
        let mut identity = lock(&self.identity);
        if identity.classification != classification {
            tracing::debug!(
                device_id = self.device_id,
                ?classification,
                "device classification updated"
            );
        }
        identity.classification = classification;
    }

    pub(crate) fn consecutive_errors(&self) -> i32 {
        lock(&self.identity).consecutive_errors
    }

    /// Count one more communication failure, saturating at `i32::MAX`.
    pub(crate) fn record_error(&self) -> i32 {
        let mut identity = lock(&self.identity);
        identity.consecutive_errors = identity.consecutive_errors.saturating_add(1);
        crate::observe::record_error_count(self.device_id, identity.consecutive_errors);
        identity.consecutive_errors
    }

    pub(crate) fn reset_errors(&self) {
        let mut identity = lock(&self.identity);
        if identity.consecutive_errors != 0 {
            identity.consecutive_errors = 0;
            crate::observe::record_error_count(self.device_id, 0);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_consecutive_errors(&self, count: i32) {
        lock(&self.identity).consecutive_errors = count;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_disconnected_without_id() {
        let session = SessionState::new(3);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.session_id(), 0);
        assert_eq!(session.classification(), DeviceClassification::Unknown);
        assert_eq!(session.consecutive_errors(), 0);
    }

    #[test]
    fn error_counter_saturates_and_resets() {
        let session = SessionState::new(1);
        assert_eq!(session.record_error(), 1);
        assert_eq!(session.record_error(), 2);

        session.set_consecutive_errors(i32::MAX - 1);
        assert_eq!(session.record_error(), i32::MAX);
        assert_eq!(session.record_error(), i32::MAX);

        session.reset_errors();
        assert_eq!(session.consecutive_errors(), 0);
    }

    #[test]
    fn state_transitions_are_observable() {
        let session = SessionState::new(1);
        session.set_state(ConnectionState::Connecting);
        session.set_state(ConnectionState::Authenticated);
        assert_eq!(session.state(), ConnectionState::Authenticated);
    }
}
