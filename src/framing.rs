//! Serial basic-mode framing.
//!
//! A frame is `[START] escaped-payload [STOP]`. Every reserved byte inside the
//! payload is replaced by a two-byte sequence starting with [`ESCAPE_BYTE`];
//! the escape byte itself is reserved, so the transform is reversible.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// First byte of every frame.
pub const START_BYTE: u8 = 0xA0;
/// Last byte of every frame.
pub const STOP_BYTE: u8 = 0xA5;
/// First byte of every escape sequence.
pub const ESCAPE_BYTE: u8 = 0xAA;
/// Handshake byte.
pub const HANDSHAKE_BYTE: u8 = 0xA6;
/// Data escape byte.
pub const DATA_ESCAPE_BYTE: u8 = 0x1B;

/// Reserved byte -> two-byte substitute.
const ESCAPE_TABLE: [(u8, [u8; 2]); 5] = [
    (ESCAPE_BYTE, [ESCAPE_BYTE, 0xBA]),
    (START_BYTE, [ESCAPE_BYTE, 0xB0]),
    (STOP_BYTE, [ESCAPE_BYTE, 0xB5]),
    (HANDSHAKE_BYTE, [ESCAPE_BYTE, 0xB6]),
    (DATA_ESCAPE_BYTE, [ESCAPE_BYTE, 0x3B]),
];

/// Offset of the first byte covered by the data checksum.
///
/// Layout: `[START][rqAddr][netFn][cs1][rsAddr][seq][cmd]...[cs2][STOP]`.
pub(crate) const DATA_CHECKSUM_START: usize = 4;

/// Replace every reserved byte with its escape sequence.
///
/// Positions are collected against the input before any substitution is
/// applied, so the output grows by exactly one byte per reserved byte.
pub fn frame_insert(payload: &[u8]) -> Vec<u8> {
    let mut substitutions: BTreeMap<usize, [u8; 2]> = BTreeMap::new();
    for (reserved, substitute) in ESCAPE_TABLE {
        for (pos, _) in payload.iter().enumerate().filter(|&(_, &b)| b == reserved) {
            substitutions.insert(pos, substitute);
        }
    }

    if substitutions.is_empty() {
        return payload.to_vec();
    }

    let mut out = Vec::with_capacity(payload.len() + substitutions.len());
    let mut cursor = 0;
    for (pos, substitute) in substitutions {
        out.extend_from_slice(&payload[cursor..pos]);
        out.extend_from_slice(&substitute);
        cursor = pos + 1;
    }
    out.extend_from_slice(&payload[cursor..]);
    out
}

/// Restore every escape sequence to its reserved byte.
///
/// Scans left to right; matches never overlap.
pub fn frame_strip(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        if payload[i] == ESCAPE_BYTE && i + 1 < payload.len() {
            if let Some(reserved) = reserved_for(payload[i + 1]) {
                out.push(reserved);
                i += 2;
                continue;
            }
        }
        out.push(payload[i]);
        i += 1;
    }
    out
}

fn reserved_for(second: u8) -> Option<u8> {
    ESCAPE_TABLE
        .iter()
        .find(|(_, substitute)| substitute[1] == second)
        .map(|&(reserved, _)| reserved)
}

/// Overwrite the first and last byte with the frame markers.
pub fn add_start_stop(frame: &mut [u8]) -> Result<()> {
    if frame.len() < 2 {
        return Err(Error::InvalidArgument("frame shorter than start/stop markers"));
    }
    let last = frame.len() - 1;
    frame[0] = START_BYTE;
    frame[last] = STOP_BYTE;
    Ok(())
}

/// Two's-complement of the sum of `bytes[start..end]`, modulo 256.
pub fn checksum(bytes: &[u8], start: usize, end: usize) -> u8 {
    let sum = bytes[start..end]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// Check the data checksum of an unescaped frame.
///
/// The checksum byte sits immediately before the stop byte and covers
/// everything from the responder address up to itself.
pub fn validate(frame: &[u8]) -> bool {
    if frame.len() < DATA_CHECKSUM_START + 2 {
        return false;
    }
    let checksum_at = frame.len() - 2;
    checksum(frame, DATA_CHECKSUM_START, checksum_at) == frame[checksum_at]
}
