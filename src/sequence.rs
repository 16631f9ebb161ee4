use std::sync::{Mutex, PoisonError};

/// Request sequence generator shared by every exchange of one client.
///
/// Hands out the current value and advances it, wrapping at 256.
#[derive(Debug)]
pub struct SequenceCounter {
    next: Mutex<u8>,
}

impl SequenceCounter {
    /// Value the counter restarts from after a successful session activation.
    pub const INITIAL: u8 = 1;

    /// Create a counter starting at [`Self::INITIAL`].
    pub fn new() -> Self {
        Self {
            next: Mutex::new(Self::INITIAL),
        }
    }

    /// Return the current value and advance.
    pub fn next(&self) -> u8 {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *next;
        *next = next.wrapping_add(1);
        current
    }

    /// Restart from [`Self::INITIAL`].
    pub fn reset(&self) {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner) = Self::INITIAL;
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
