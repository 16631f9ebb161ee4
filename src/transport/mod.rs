use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{DeviceKind, Priority, completion_code};

/// A synchronous transport that exchanges framed bytes with one device.
///
/// The returned buffer starts with the transport envelope: one status byte,
/// two bytes of length, then the still-escaped response frame. Timeouts,
/// port arbitration and physical retries belong to the implementation.
pub trait Transport {
    /// Send a framed request and wait for the corresponding raw response.
    fn send_receive(
        &self,
        priority: Priority,
        device_kind: DeviceKind,
        device_id: u8,
        request: &[u8],
    ) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_receive(
        &self,
        priority: Priority,
        device_kind: DeviceKind,
        device_id: u8,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        (**self).send_receive(priority, device_kind, device_id, request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_receive(
        &self,
        priority: Priority,
        device_kind: DeviceKind,
        device_id: u8,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        (**self).send_receive(priority, device_kind, device_id, request)
    }
}

/// Map a transport error onto the envelope status byte it stands for.
pub(crate) fn error_status(err: &Error) -> u8 {
    match err {
        Error::Timeout => completion_code::HANDSHAKE_TIMEOUT,
        Error::Io(e) if is_timeout(e) => completion_code::HANDSHAKE_TIMEOUT,
        _ => completion_code::UNSPECIFIED,
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
