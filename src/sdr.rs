//! Sensor data record (SDR) repository access and the per-device descriptor cache.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::client::Client;
use crate::commands::{GetSdr, ReserveSdrRepository};
use crate::error::{Error, Result};
use crate::types::{Priority, SensorConversion, SensorDescriptor};

/// Next-record id marking the end of the repository.
const END_OF_REPOSITORY: u16 = 0xFFFF;
/// Hard ceiling on records walked in one population pass.
const MAX_RECORDS: usize = 512;
/// Record header: id (2), version, type, remaining length.
const RECORD_HEADER_LEN: usize = 5;
/// Largest partial read issued per `Get SDR`.
const MAX_CHUNK: usize = 16;

const RECORD_TYPE_FULL: u8 = 0x01;
const RECORD_TYPE_COMPACT: u8 = 0x02;

const FULL_ID_STRING_OFFSET: usize = 47;
const COMPACT_ID_STRING_OFFSET: usize = 31;

/// Sensor descriptors keyed by sensor number.
///
/// Populated all at once from the repository; entries are only removed by
/// [`DescriptorCache::clear`]. Two populations racing each other are not
/// guarded against; callers that refresh concurrently must serialize.
#[derive(Debug, Default)]
pub(crate) struct DescriptorCache {
    entries: RwLock<HashMap<u8, SensorDescriptor>>,
}

impl DescriptorCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fill the cache with `load` if it is empty.
    ///
    /// A failed load is logged and leaves the cache empty so that the next
    /// access tries again. Returns whether the cache holds entries afterwards.
    pub(crate) fn ensure_populated<F>(&self, load: F) -> bool
    where
        F: FnOnce() -> Result<HashMap<u8, SensorDescriptor>>,
    {
        if !self.is_empty() {
            return true;
        }

        match load() {
            Ok(descriptors) => {
                tracing::debug!(count = descriptors.len(), "sensor descriptor cache populated");
                let populated = !descriptors.is_empty();
                *self.entries.write().unwrap_or_else(PoisonError::into_inner) = descriptors;
                populated
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to read sensor data record repository");
                false
            }
        }
    }

    pub(crate) fn get(&self, sensor_number: u8) -> Option<SensorDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sensor_number)
            .cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<SensorDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by_key(|d| d.sensor_number);
        all
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Walk the whole repository and parse every sensor record.
///
/// Any failed exchange or unparsable record aborts the walk.
pub(crate) fn read_repository(
    client: &Client,
    priority: Priority,
) -> Result<HashMap<u8, SensorDescriptor>> {
    let reservation_id = client.execute(ReserveSdrRepository, priority)?;

    let mut descriptors = HashMap::new();
    let mut record_id: u16 = 0x0000;

    for _ in 0..MAX_RECORDS {
        let header = client.execute(
            GetSdr {
                reservation_id,
                record_id,
                offset: 0,
                bytes_to_read: RECORD_HEADER_LEN as u8,
            },
            priority,
        )?;
        if header.data.len() < RECORD_HEADER_LEN {
            return Err(Error::Protocol("SDR record header too short"));
        }

        let record_len = RECORD_HEADER_LEN + usize::from(header.data[4]);
        let mut record = header.data[..RECORD_HEADER_LEN].to_vec();

        while record.len() < record_len {
            let remaining = record_len - record.len();
            let offset = u8::try_from(record.len())
                .map_err(|_| Error::Protocol("SDR record offset out of range"))?;
            let chunk = client.execute(
                GetSdr {
                    reservation_id,
                    record_id,
                    offset,
                    bytes_to_read: remaining.min(MAX_CHUNK) as u8,
                },
                priority,
            )?;
            if chunk.data.is_empty() {
                return Err(Error::Protocol("empty SDR partial read"));
            }
            let take = chunk.data.len().min(remaining);
            record.extend_from_slice(&chunk.data[..take]);
        }

        if let Some(descriptor) = parse_record(&record)? {
            descriptors.insert(descriptor.sensor_number, descriptor);
        }

        let next = header.next_record_id;
        if next == END_OF_REPOSITORY || next == record_id {
            break;
        }
        record_id = next;
    }

    Ok(descriptors)
}

/// Parse one complete record. Non-sensor record types yield `None`.
pub(crate) fn parse_record(record: &[u8]) -> Result<Option<SensorDescriptor>> {
    if record.len() < RECORD_HEADER_LEN {
        return Err(Error::Protocol("SDR record too short"));
    }

    let record_id = u16::from_le_bytes([record[0], record[1]]);
    let record_type = record[3];

    let id_string_offset = match record_type {
        RECORD_TYPE_FULL => FULL_ID_STRING_OFFSET,
        RECORD_TYPE_COMPACT => COMPACT_ID_STRING_OFFSET,
        _ => return Ok(None),
    };

    if record.len() <= id_string_offset {
        return Err(Error::protocol_owned(format!(
            "sensor record {record_id:#06x} truncated ({} bytes)",
            record.len()
        )));
    }

    let conversion = if record_type == RECORD_TYPE_FULL {
        parse_conversion(record)
    } else {
        None
    };

    Ok(Some(SensorDescriptor {
        record_id,
        record_type,
        sensor_number: record[7],
        sensor_type: record[12],
        entity_id: record[8],
        entity_instance: record[9],
        event_reading_type: record[13],
        description: parse_id_string(&record[id_string_offset..]),
        conversion,
    }))
}

fn parse_conversion(record: &[u8]) -> Option<SensorConversion> {
    let analog_format = record[20] >> 6;
    let linearization = record[23] & 0x7F;
    // 0b11: no analog reading. Non-zero linearization: not a linear sensor.
    if analog_format == 0b11 || linearization != 0 {
        return None;
    }

    let m = u16::from(record[24]) | (u16::from(record[25] & 0xC0) << 2);
    let b = u16::from(record[26]) | (u16::from(record[27] & 0xC0) << 2);

    Some(SensorConversion {
        m: sign_extend(m, 10),
        b: sign_extend(b, 10),
        b_exponent: sign_extend(u16::from(record[29] & 0x0F), 4) as i8,
        r_exponent: sign_extend(u16::from(record[29] >> 4), 4) as i8,
        signed: analog_format == 0b10,
    })
}

fn parse_id_string(field: &[u8]) -> String {
    let len = usize::from(field[0] & 0x1F);
    let bytes = field.get(1..).unwrap_or_default();
    let bytes = &bytes[..len.min(bytes.len())];
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

fn sign_extend(value: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((value << shift) as i16) >> shift
}
