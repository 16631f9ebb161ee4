#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A blocking IPMI serial basic-mode client library.
//!
//! The crate implements:
//! - Byte escaping and START/STOP framing
//! - Two's-complement frame checksums
//! - Request/response encoding behind a pluggable [`Transport`]
//! - The challenge/activate session handshake
//! - Re-identify and re-logon on timeouts and privilege failures
//! - A per-device sensor descriptor (SDR) cache
//!
//! Failures of individual exchanges never surface as Rust errors from
//! [`Client::send_receive`]; every response carries a completion code
//! instead. Set `IPMI_SERIAL_DEBUG=1` to trace raw frames.

mod client;
pub mod commands;
mod crypto;
mod debug;
mod error;
pub mod framing;
mod observe;
mod protocol;
mod registry;
mod sdr;
mod sequence;
mod session;
mod transport;
mod types;

pub use crate::client::{Client, ClientBuilder};
pub use crate::error::{Error, Result};
pub use crate::protocol::encode_response;
pub use crate::registry::ClientRegistry;
pub use crate::sequence::SequenceCounter;
pub use crate::transport::Transport;
pub use crate::types::{
    ActivatedSession, ConnectionState, DeviceClassification, DeviceId, DeviceKind, Priority,
    PrivilegeLevel, RawSensorReading, Response, SdrChunk, SensorConversion, SensorDescriptor,
    SensorReading, SessionChallenge, SystemGuid, TransportStatus, completion_code,
};
