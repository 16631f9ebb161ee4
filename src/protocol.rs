use crate::error::Result;
use crate::framing::{self, DATA_CHECKSUM_START};
use crate::types::{TransportStatus, completion_code};

/// Responder (BMC) slave address.
const RESPONDER_ADDR: u8 = 0x20;
/// Requester software id used for requests.
const REQUESTER_ADDR: u8 = 0x81;
/// Response addresses accepted at offset 1 of an inbound frame.
const ACCEPTED_RESPONSE_ADDRS: [u8; 2] = [0x8F, REQUESTER_ADDR];

/// Length of the transport envelope preceding the inbound frame.
const ENVELOPE_LEN: usize = 3;
/// Shortest inbound payload considered structurally valid.
const MIN_RESPONSE_LEN: usize = 7;
/// `[START][rq][netFn][cs1][rs][seq][cmd][cc][cs2][STOP]`
const MIN_DECODED_FRAME_LEN: usize = 10;
/// Offset of the completion code in an unescaped inbound frame.
const COMPLETION_CODE_OFFSET: usize = 7;

/// Network function codes used by this crate.
pub(crate) mod netfn {
    pub const APP: u8 = 0x06;
    pub const SENSOR_EVENT: u8 = 0x04;
    pub const STORAGE: u8 = 0x0A;
}

/// Serialize a request into an unescaped frame with placeholder markers.
///
/// The first and last byte are left as zero for [`framing::add_start_stop`].
/// Only the low six bits of `seq` fit the sequence field.
pub(crate) fn encode_request(netfn: u8, cmd: u8, seq: u8, data: &[u8]) -> Vec<u8> {
    let lun: u8 = 0;

    let mut msg = Vec::with_capacity(1 + 6 + data.len() + 2);
    msg.push(0x00);

    msg.push(RESPONDER_ADDR);
    msg.push((netfn << 2) | (lun & 0x03));
    msg.push(framing::checksum(&msg, 1, 3));

    msg.push(REQUESTER_ADDR);
    msg.push(((seq & 0x3F) << 2) | (lun & 0x03));
    msg.push(cmd);
    msg.extend_from_slice(data);

    let csum2 = framing::checksum(&msg, DATA_CHECKSUM_START, msg.len());
    msg.push(csum2);
    msg.push(0x00);
    msg
}

/// Build the bytes handed to the transport: serialize, escape, add markers.
pub(crate) fn frame_request(netfn: u8, cmd: u8, seq: u8, data: &[u8]) -> Result<Vec<u8>> {
    let msg = encode_request(netfn, cmd, seq, data);
    let mut frame = framing::frame_insert(&msg);
    framing::add_start_stop(&mut frame)?;
    Ok(frame)
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// The transport envelope reported a failure.
    Transport(TransportStatus),
    /// The envelope succeeded but the frame was rejected; carries the synthesized code.
    Rejected(u8),
    /// A checked frame.
    Frame {
        /// Completion code at offset 7.
        completion_code: u8,
        /// Bytes between the completion code and the data checksum.
        data: Vec<u8>,
    },
}

/// Remove the transport envelope, unescape and check the inbound frame.
pub(crate) fn decode_response(raw: &[u8]) -> Inbound {
    let Some(&status_byte) = raw.first() else {
        tracing::error!("transport returned an empty response");
        return Inbound::Transport(TransportStatus::Unspecified(completion_code::UNSPECIFIED));
    };

    let status = TransportStatus::from_u8(status_byte);
    if status != TransportStatus::Success {
        return Inbound::Transport(status);
    }

    let payload = if raw.len() > ENVELOPE_LEN {
        &raw[ENVELOPE_LEN..]
    } else {
        raw
    };

    if payload.len() < MIN_RESPONSE_LEN || !ACCEPTED_RESPONSE_ADDRS.contains(&payload[1]) {
        tracing::error!(
            len = payload.len(),
            response = %hex::encode(raw),
            "malformed response frame"
        );
        return Inbound::Rejected(completion_code::MALFORMED_RESPONSE);
    }

    let frame = framing::frame_strip(payload);
    if frame.len() < MIN_DECODED_FRAME_LEN {
        tracing::error!(
            len = frame.len(),
            response = %hex::encode(raw),
            "response frame too short after unescaping"
        );
        return Inbound::Rejected(completion_code::MALFORMED_RESPONSE);
    }

    if !framing::validate(&frame) {
        tracing::warn!(response = %hex::encode(raw), "response checksum mismatch");
        return Inbound::Rejected(completion_code::ILLEGAL_PARAMETER);
    }

    Inbound::Frame {
        completion_code: frame[COMPLETION_CODE_OFFSET],
        data: frame[COMPLETION_CODE_OFFSET + 1..frame.len() - 2].to_vec(),
    }
}

/// Build a raw transport response around an unescaped response frame body.
///
/// `body` starts at the response address and ends with the last data byte;
/// checksums, escaping, markers and the envelope are added here. Used by
/// tests and by in-memory device simulators.
pub fn encode_response(
    response_addr: u8,
    netfn: u8,
    cmd: u8,
    seq: u8,
    completion_code: u8,
    data: &[u8],
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(10 + data.len());
    msg.push(0x00);
    msg.push(response_addr);
    msg.push(((netfn | 0x01) << 2) & 0xFC);
    msg.push(framing::checksum(&msg, 1, 3));
    msg.push(RESPONDER_ADDR);
    msg.push((seq & 0x3F) << 2);
    msg.push(cmd);
    msg.push(completion_code);
    msg.extend_from_slice(data);
    let csum2 = framing::checksum(&msg, DATA_CHECKSUM_START, msg.len());
    msg.push(csum2);
    msg.push(0x00);

    let mut frame = framing::frame_insert(&msg);
    let last = frame.len() - 1;
    frame[0] = framing::START_BYTE;
    frame[last] = framing::STOP_BYTE;

    let mut raw = Vec::with_capacity(ENVELOPE_LEN + frame.len());
    raw.push(completion_code::SUCCESS);
    raw.extend_from_slice(&(frame.len() as u16).to_le_bytes());
    raw.extend_from_slice(&frame);
    raw
}
