use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced inside this crate.
///
/// The session engine never hands these to callers of
/// [`Client::send_receive`](crate::Client::send_receive); they are folded into
/// completion codes at the transport and deserialization boundaries.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error reported by a transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The transport gave up waiting for the device.
    #[error("timeout waiting for response")]
    Timeout,

    /// Peer responded with an unexpected or invalid message.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Peer responded with an unexpected or invalid message.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// Cryptographic failure (invalid key sizes, etc.).
    #[error("crypto error: {0}")]
    Crypto(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An IPMI command completed with a non-zero completion code.
    #[error("ipmi completion code: {completion_code:#04x}")]
    CompletionCode {
        /// Raw completion code returned by the device (or synthesized locally).
        completion_code: u8,
    },
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }
}
