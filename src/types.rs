use core::fmt;

/// Completion and status codes seen by callers.
///
/// Values below `0xA0` and the `0xC0..=0xFF` block come from the device;
/// the `0xA0..=0xAF` block is reserved for conditions detected by the
/// transport or by this crate.
pub mod completion_code {
    /// Command completed normally.
    pub const SUCCESS: u8 = 0x00;
    /// The transport timed out during the serial handshake.
    pub const HANDSHAKE_TIMEOUT: u8 = 0xA3;
    /// The response frame was too short or carried an unknown response address.
    pub const MALFORMED_RESPONSE: u8 = 0xA7;
    /// The response data could not be mapped onto the expected response type.
    pub const INVALID_DATA_IN_RESPONSE: u8 = 0xA9;
    /// The transport rejected the frame length.
    pub const MALFORMED_LENGTH: u8 = 0xC7;
    /// Checksum mismatch on the response frame.
    pub const ILLEGAL_PARAMETER: u8 = 0xC9;
    /// The transport cannot return the requested number of bytes.
    pub const CANNOT_RETURN_DATA: u8 = 0xCA;
    /// The requested sensor is not present.
    pub const SENSOR_NOT_PRESENT: u8 = 0xCB;
    /// The session does not hold the privilege the command requires.
    pub const INSUFFICIENT_PRIVILEGE: u8 = 0xD4;
    /// Unspecified failure.
    pub const UNSPECIFIED: u8 = 0xFF;
}

/// The privilege level requested for the IPMI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Scheduling priority forwarded to the transport.
///
/// The transport decides what the levels mean; this crate only passes them through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Background polling.
    Low,
    /// Regular user requests.
    #[default]
    Normal,
    /// Session management and identity exchanges.
    High,
}

/// Kind of device the transport routes a frame to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceKind {
    /// A blade slot reached over its serial multiplexer port.
    #[default]
    Blade,
    /// The chassis management controller itself.
    Chassis,
    /// Any other routing tag understood by the transport.
    Other(u8),
}

/// Outcome of the transport-level envelope (first byte of every raw response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Frame was exchanged successfully.
    Success,
    /// The serial handshake timed out.
    HandshakeTimeout,
    /// The frame length was rejected.
    MalformedLength,
    /// The transport could not return the requested bytes.
    CannotReturnData,
    /// Any other transport status byte.
    Unspecified(u8),
}

impl TransportStatus {
    pub(crate) fn from_u8(code: u8) -> Self {
        match code {
            completion_code::SUCCESS => Self::Success,
            completion_code::HANDSHAKE_TIMEOUT => Self::HandshakeTimeout,
            completion_code::MALFORMED_LENGTH => Self::MalformedLength,
            completion_code::CANNOT_RETURN_DATA => Self::CannotReturnData,
            other => Self::Unspecified(other),
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Success => completion_code::SUCCESS,
            Self::HandshakeTimeout => completion_code::HANDSHAKE_TIMEOUT,
            Self::MalformedLength => completion_code::MALFORMED_LENGTH,
            Self::CannotReturnData => completion_code::CANNOT_RETURN_DATA,
            Self::Unspecified(code) => code,
        }
    }
}

/// Connection state of a [`Client`](crate::Client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session; initial and post-close state.
    #[default]
    Disconnected,
    /// First contact is in progress.
    Connecting,
    /// Identity obtained, waiting for the session challenge.
    AuthenticatingChallenge,
    /// Challenge received, activation pending.
    SessionChallenge,
    /// Session usable.
    Authenticated,
    /// The device could not be identified. Sticky until the next initialize.
    Invalid,
}

/// Coarse device type learned from the identify exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClassification {
    /// Not yet identified, or an unrecognized auxiliary byte.
    #[default]
    Unknown,
    /// Compute blade; requires a full authenticated session.
    ServerBlade,
    /// Storage blade; usable without a login.
    StorageBlade,
    /// Enclosure controller.
    EnclosureBlade,
}

impl DeviceClassification {
    /// Map the first auxiliary firmware revision byte onto a classification.
    pub fn from_aux_byte(aux: u8) -> Self {
        match aux {
            0x04 => Self::ServerBlade,
            0x05 => Self::StorageBlade,
            0x06 => Self::EnclosureBlade,
            _ => Self::Unknown,
        }
    }

    /// True for devices that need the challenge/activate login.
    pub fn requires_session(self) -> bool {
        matches!(self, Self::ServerBlade)
    }
}

/// Response to one command, always present even when the exchange failed.
///
/// `body` is only populated when the completion code is success and the
/// response data was decoded without error.
#[derive(Clone, PartialEq, Eq)]
pub struct Response<T> {
    /// IPMI completion code, or a transport/local status code.
    pub completion_code: u8,
    /// Response data after the completion code (empty on transport failure).
    pub data: Vec<u8>,
    /// Decoded response fields.
    pub body: Option<T>,
}

impl<T> Response<T> {
    /// A response that carries only a completion code.
    pub fn from_code(completion_code: u8) -> Self {
        Self {
            completion_code,
            data: Vec::new(),
            body: None,
        }
    }

    /// True when the command completed and its fields were decoded.
    pub fn is_success(&self) -> bool {
        self.completion_code == completion_code::SUCCESS && self.body.is_some()
    }
}

impl<T> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .field("decoded", &self.body.is_some())
            .finish()
    }
}

/// Parsed response for the `Get Device ID` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits are the revision).
    pub device_revision: u8,
    /// Firmware major revision.
    pub firmware_major: u8,
    /// Firmware minor revision.
    pub firmware_minor: u8,
    /// IPMI version as BCD (e.g. 0x51 for 1.5).
    pub ipmi_version: u8,
    /// Manufacturer ID (24-bit, least-significant byte first).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
    /// Auxiliary firmware revision (4 bytes). Byte 0 carries the classification.
    pub aux_firmware_revision: [u8; 4],
}

impl DeviceId {
    /// Classification derived from the auxiliary revision field.
    pub fn classification(&self) -> DeviceClassification {
        DeviceClassification::from_aux_byte(self.aux_firmware_revision[0])
    }
}

/// Raw system GUID bytes as returned by `Get System GUID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemGuid {
    /// Raw GUID bytes.
    pub bytes: [u8; 16],
}

/// Parsed response for `Get Session Challenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChallenge {
    /// Temporary session id assigned by the device.
    pub temporary_session_id: u32,
    /// Challenge string to be folded into the auth code.
    pub challenge: [u8; 16],
}

/// Parsed response for `Activate Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedSession {
    /// Authentication type accepted by the device.
    pub auth_type: u8,
    /// Session id for the remainder of the session.
    pub session_id: u32,
    /// Initial inbound sequence number chosen by the device.
    pub inbound_sequence: u32,
    /// Maximum privilege level granted.
    pub max_privilege: u8,
}

/// One `Get SDR` read: the next record id and a slice of the current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdrChunk {
    /// Id of the record following the one being read.
    pub next_record_id: u16,
    /// Record bytes starting at the requested offset.
    pub data: Vec<u8>,
}

/// Linear conversion factors carried by a full sensor record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorConversion {
    /// Multiplier M (10-bit signed).
    pub m: i16,
    /// Offset B (10-bit signed).
    pub b: i16,
    /// Exponent applied to B (4-bit signed).
    pub b_exponent: i8,
    /// Result exponent (4-bit signed).
    pub r_exponent: i8,
    /// Raw reading is two's-complement signed.
    pub signed: bool,
}

impl SensorConversion {
    /// Apply `y = (M * x + B * 10^Bexp) * 10^Rexp`.
    pub fn convert(&self, raw: u8) -> f64 {
        let x = if self.signed {
            f64::from(raw as i8)
        } else {
            f64::from(raw)
        };
        let b = f64::from(self.b) * 10f64.powi(i32::from(self.b_exponent));
        (f64::from(self.m) * x + b) * 10f64.powi(i32::from(self.r_exponent))
    }
}

/// Cached metadata for one sensor, built from its SDR record.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    /// Repository record id.
    pub record_id: u16,
    /// SDR record type (0x01 full, 0x02 compact).
    pub record_type: u8,
    /// Sensor number; the cache key.
    pub sensor_number: u8,
    /// Sensor type code (temperature, voltage, ...).
    pub sensor_type: u8,
    /// Entity id the sensor belongs to.
    pub entity_id: u8,
    /// Entity instance.
    pub entity_instance: u8,
    /// Event/reading type code.
    pub event_reading_type: u8,
    /// ID string from the record.
    pub description: String,
    /// Conversion factors; only present for full records.
    pub conversion: Option<SensorConversion>,
}

/// Parsed response for `Get Sensor Reading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSensorReading {
    /// Raw reading byte.
    pub raw: u8,
    /// Event messages enabled for the sensor.
    pub events_enabled: bool,
    /// Sensor scanning enabled.
    pub scanning_enabled: bool,
    /// Reading is not yet available.
    pub unavailable: bool,
}

/// A sensor reading combined with its cached descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Descriptor the reading was interpreted with.
    pub descriptor: SensorDescriptor,
    /// Decoded reading response.
    pub reading: RawSensorReading,
    /// Converted value for full sensors with an available reading.
    pub value: Option<f64>,
}
