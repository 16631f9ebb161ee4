//! Typed IPMI commands used by the session engine and the SDR reader.

use crate::error::{Error, Result};
use crate::protocol::netfn;
use crate::types::{
    ActivatedSession, DeviceId, PrivilegeLevel, RawSensorReading, SdrChunk, SessionChallenge,
    SystemGuid,
};

/// Authentication type carried by the session handshake (OEM proprietary).
pub const AUTH_TYPE_OEM: u8 = 0x05;

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Parse the response data that follows a successful completion code.
    fn parse_response(&self, data: &[u8]) -> Result<Self::Output>;
}

/// `Get Device ID` (App NetFn, cmd 0x01). Used as the identify exchange.
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        parse_device_id(data)
    }
}

/// `Get System GUID` (App NetFn, cmd 0x37). Used as the hardware identity token.
#[derive(Debug, Clone, Copy)]
pub struct GetSystemGuid;

impl Command for GetSystemGuid {
    type Output = SystemGuid;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x37;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        if data.len() < 16 {
            return Err(Error::Protocol("Get System GUID response too short"));
        }

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&data[..16]);
        Ok(SystemGuid { bytes })
    }
}

/// `Get Session Challenge` (App NetFn, cmd 0x39).
#[derive(Debug, Clone)]
pub struct GetSessionChallenge {
    /// Requested authentication type.
    pub auth_type: u8,
    /// User name, zero padded to 16 bytes.
    pub username: [u8; 16],
}

impl GetSessionChallenge {
    /// Build the request; user names longer than 16 bytes are truncated.
    pub fn new(auth_type: u8, username: &[u8]) -> Self {
        let mut padded = [0u8; 16];
        let n = username.len().min(padded.len());
        padded[..n].copy_from_slice(&username[..n]);
        Self {
            auth_type,
            username: padded,
        }
    }
}

impl Command for GetSessionChallenge {
    type Output = SessionChallenge;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x39;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(17);
        data.push(self.auth_type & 0x0F);
        data.extend_from_slice(&self.username);
        data
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        if data.len() < 20 {
            return Err(Error::Protocol("Get Session Challenge response too short"));
        }

        let temporary_session_id = u32::from_le_bytes(
            data[0..4]
                .try_into()
                .map_err(|_| Error::Protocol("invalid temporary session id"))?,
        );
        let challenge: [u8; 16] = data[4..20]
            .try_into()
            .map_err(|_| Error::Protocol("invalid challenge string"))?;

        Ok(SessionChallenge {
            temporary_session_id,
            challenge,
        })
    }
}

/// `Activate Session` (App NetFn, cmd 0x3A).
#[derive(Debug, Clone)]
pub struct ActivateSession {
    /// Authentication type.
    pub auth_type: u8,
    /// Maximum privilege level requested for the session.
    pub privilege: PrivilegeLevel,
    /// Auth code computed from the challenge.
    pub auth_code: [u8; 16],
    /// Initial outbound sequence number chosen by the console.
    pub initial_outbound_sequence: u32,
}

impl Command for ActivateSession {
    type Output = ActivatedSession;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3A;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(22);
        data.push(self.auth_type & 0x0F);
        data.push(self.privilege.as_u8() & 0x0F);
        data.extend_from_slice(&self.auth_code);
        data.extend_from_slice(&self.initial_outbound_sequence.to_le_bytes());
        data
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        if data.len() < 10 {
            return Err(Error::Protocol("Activate Session response too short"));
        }

        let session_id = u32::from_le_bytes(
            data[1..5]
                .try_into()
                .map_err(|_| Error::Protocol("invalid session id"))?,
        );
        let inbound_sequence = u32::from_le_bytes(
            data[5..9]
                .try_into()
                .map_err(|_| Error::Protocol("invalid inbound sequence"))?,
        );

        Ok(ActivatedSession {
            auth_type: data[0] & 0x0F,
            session_id,
            inbound_sequence,
            max_privilege: data[9] & 0x0F,
        })
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilegeLevel {
    /// Requested privilege.
    pub privilege: PrivilegeLevel,
}

impl Command for SetSessionPrivilegeLevel {
    /// Privilege level now in effect.
    type Output = u8;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3B;

    fn request_data(&self) -> Vec<u8> {
        vec![self.privilege.as_u8() & 0x0F]
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        data.first()
            .map(|b| b & 0x0F)
            .ok_or(Error::Protocol("Set Session Privilege Level response too short"))
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Session to close.
    pub session_id: u32,
}

impl Command for CloseSession {
    type Output = ();
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }

    fn parse_response(&self, _data: &[u8]) -> Result<Self::Output> {
        Ok(())
    }
}

/// `Reserve SDR Repository` (Storage NetFn, cmd 0x22).
#[derive(Debug, Clone, Copy)]
pub struct ReserveSdrRepository;

impl Command for ReserveSdrRepository {
    /// Reservation id.
    type Output = u16;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x22;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        if data.len() < 2 {
            return Err(Error::Protocol("Reserve SDR Repository response too short"));
        }
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }
}

/// `Get SDR` (Storage NetFn, cmd 0x23): read part of one repository record.
#[derive(Debug, Clone, Copy)]
pub struct GetSdr {
    /// Reservation id from [`ReserveSdrRepository`].
    pub reservation_id: u16,
    /// Record to read.
    pub record_id: u16,
    /// Offset into the record.
    pub offset: u8,
    /// Number of bytes to read (0xFF reads the whole record).
    pub bytes_to_read: u8,
}

impl Command for GetSdr {
    type Output = SdrChunk;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x23;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&self.reservation_id.to_le_bytes());
        data.extend_from_slice(&self.record_id.to_le_bytes());
        data.push(self.offset);
        data.push(self.bytes_to_read);
        data
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        if data.len() < 2 {
            return Err(Error::Protocol("Get SDR response too short"));
        }
        Ok(SdrChunk {
            next_record_id: u16::from_le_bytes([data[0], data[1]]),
            data: data[2..].to_vec(),
        })
    }
}

/// `Get Sensor Reading` (Sensor/Event NetFn, cmd 0x2D).
#[derive(Debug, Clone, Copy)]
pub struct GetSensorReading {
    /// Sensor number.
    pub sensor_number: u8,
}

impl Command for GetSensorReading {
    type Output = RawSensorReading;
    const NETFN: u8 = netfn::SENSOR_EVENT;
    const CMD: u8 = 0x2D;

    fn request_data(&self) -> Vec<u8> {
        vec![self.sensor_number]
    }

    fn parse_response(&self, data: &[u8]) -> Result<Self::Output> {
        if data.len() < 2 {
            return Err(Error::Protocol("Get Sensor Reading response too short"));
        }
        Ok(RawSensorReading {
            raw: data[0],
            events_enabled: data[1] & 0x80 != 0,
            scanning_enabled: data[1] & 0x40 != 0,
            unavailable: data[1] & 0x20 != 0,
        })
    }
}

pub(crate) fn parse_device_id(data: &[u8]) -> Result<DeviceId> {
    // IPMI "Get Device ID" response (after completion code) is commonly 15 bytes.
    if data.len() < 15 {
        return Err(Error::Protocol("Get Device ID response too short"));
    }

    let manufacturer_id =
        u32::from(data[6]) | (u32::from(data[7]) << 8) | (u32::from(data[8]) << 16);
    let product_id = u16::from(data[9]) | (u16::from(data[10]) << 8);

    Ok(DeviceId {
        device_id: data[0],
        device_revision: data[1] & 0x0F,
        firmware_major: data[2],
        firmware_minor: data[3],
        ipmi_version: data[4],
        manufacturer_id,
        product_id,
        aux_firmware_revision: [data[11], data[12], data[13], data[14]],
    })
}
