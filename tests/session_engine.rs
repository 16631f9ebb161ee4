use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ipmi_serial::commands::{GetDeviceId, GetSystemGuid};
use ipmi_serial::framing::{START_BYTE, STOP_BYTE, frame_strip};
use ipmi_serial::{
    Client, ClientRegistry, ConnectionState, DeviceClassification, DeviceKind, Error, Priority,
    Result, Transport, completion_code, encode_response,
};

const APP: u8 = 0x06;
const SENSOR_EVENT: u8 = 0x04;
const STORAGE: u8 = 0x0A;

const GET_DEVICE_ID: u8 = 0x01;
const GET_SYSTEM_GUID: u8 = 0x37;
const GET_SESSION_CHALLENGE: u8 = 0x39;
const ACTIVATE_SESSION: u8 = 0x3A;
const SET_SESSION_PRIVILEGE: u8 = 0x3B;
const CLOSE_SESSION: u8 = 0x3C;
const RESERVE_SDR: u8 = 0x22;
const GET_SDR: u8 = 0x23;
const GET_SENSOR_READING: u8 = 0x2D;

const SESSION_ID: u32 = 0x0000_BEEF;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A scripted reply consumed by the next request carrying `cmd`.
enum Reply {
    /// Raw transport bytes, envelope included.
    Raw(Vec<u8>),
    /// A well-formed frame with this completion code and no data.
    Code(u8),
    /// The transport fails with a timeout.
    Timeout,
}

/// How Get SDR picks the next record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SdrChain {
    /// Walk the stored records and end with 0xFFFF.
    Records,
    /// Always answer with the requested id as the next id.
    RepeatId,
    /// Always answer with the requested id plus one.
    Endless,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    netfn: u8,
    cmd: u8,
    seq: u8,
    data: Vec<u8>,
    priority: Priority,
}

/// In-memory device answering over the serial basic-mode wire format.
struct SimulatedBmc {
    aux: Mutex<u8>,
    guid: Mutex<[u8; 16]>,
    records: Mutex<Vec<Vec<u8>>>,
    chain: Mutex<SdrChain>,
    script: Mutex<VecDeque<(u8, Reply)>>,
    seen: Mutex<Vec<Seen>>,
}

impl SimulatedBmc {
    fn new(aux: u8) -> Arc<Self> {
        Self::with_records(aux, Vec::new())
    }

    fn with_records(aux: u8, records: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            aux: Mutex::new(aux),
            guid: Mutex::new([0x11; 16]),
            records: Mutex::new(records),
            chain: Mutex::new(SdrChain::Records),
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, cmd: u8, reply: Reply) {
        self.script.lock().expect("script").push_back((cmd, reply));
    }

    fn set_aux(&self, aux: u8) {
        *self.aux.lock().expect("aux") = aux;
    }

    fn set_records(&self, records: Vec<Vec<u8>>) {
        *self.records.lock().expect("records") = records;
    }

    fn set_chain(&self, chain: SdrChain) {
        *self.chain.lock().expect("chain") = chain;
    }

    fn set_guid(&self, guid: [u8; 16]) {
        *self.guid.lock().expect("guid") = guid;
    }

    fn commands(&self) -> Vec<u8> {
        self.seen
            .lock()
            .expect("seen")
            .iter()
            .map(|s| s.cmd)
            .collect()
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("seen").clone()
    }

    fn clear_seen(&self) {
        self.seen.lock().expect("seen").clear();
    }

    fn default_reply(&self, netfn: u8, cmd: u8, data: &[u8]) -> (u8, Vec<u8>) {
        match (netfn, cmd) {
            (APP, GET_DEVICE_ID) => {
                let aux = *self.aux.lock().expect("aux");
                (
                    0x00,
                    vec![
                        0x20, 0x01, 0x02, 0x10, 0x51, 0x00, 0x37, 0x01, 0x00, 0x00, 0x01, aux,
                        0x00, 0x00, 0x00,
                    ],
                )
            }
            (APP, GET_SYSTEM_GUID) => (0x00, self.guid.lock().expect("guid").to_vec()),
            (APP, GET_SESSION_CHALLENGE) => {
                let mut out = vec![0x01, 0x02, 0x03, 0x04];
                out.extend_from_slice(&[0x5A; 16]);
                (0x00, out)
            }
            (APP, ACTIVATE_SESSION) => {
                let mut out = vec![0x05];
                out.extend_from_slice(&SESSION_ID.to_le_bytes());
                out.extend_from_slice(&1u32.to_le_bytes());
                out.push(0x04);
                (0x00, out)
            }
            (APP, SET_SESSION_PRIVILEGE) => (0x00, vec![0x04]),
            (APP, CLOSE_SESSION) => (0x00, Vec::new()),
            (STORAGE, RESERVE_SDR) => (0x00, vec![0x01, 0x00]),
            (STORAGE, GET_SDR) => self.sdr_reply(data),
            (SENSOR_EVENT, GET_SENSOR_READING) => (0x00, vec![20, 0xC0]),
            _ => (0xC1, Vec::new()),
        }
    }

    fn sdr_reply(&self, data: &[u8]) -> (u8, Vec<u8>) {
        let record_id = u16::from_le_bytes([data[2], data[3]]);
        let offset = usize::from(data[4]);
        let len = usize::from(data[5]);

        let next = match *self.chain.lock().expect("chain") {
            SdrChain::Records => None,
            SdrChain::RepeatId => Some(record_id),
            SdrChain::Endless => Some(record_id.wrapping_add(1)),
        };
        if let Some(next) = next {
            // Header of an OEM record with no body.
            let mut out = next.to_le_bytes().to_vec();
            out.extend_from_slice(&record_id.to_le_bytes());
            out.extend_from_slice(&[0x51, 0xC0, 0x00]);
            return (0x00, out);
        }

        let records = self.records.lock().expect("records");
        let index = if record_id == 0 {
            Some(0)
        } else {
            records
                .iter()
                .position(|r| u16::from_le_bytes([r[0], r[1]]) == record_id)
        };
        let Some(index) = index.filter(|&i| i < records.len()) else {
            return (0xCB, Vec::new());
        };

        let record = &records[index];
        let next = records
            .get(index + 1)
            .map(|r| u16::from_le_bytes([r[0], r[1]]))
            .unwrap_or(0xFFFF);
        let end = (offset + len).min(record.len());

        let mut out = next.to_le_bytes().to_vec();
        out.extend_from_slice(&record[offset..end]);
        (0x00, out)
    }
}

impl Transport for SimulatedBmc {
    fn send_receive(
        &self,
        priority: Priority,
        _device_kind: DeviceKind,
        _device_id: u8,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        assert_eq!(request.first(), Some(&START_BYTE));
        assert_eq!(request.last(), Some(&STOP_BYTE));

        let frame = frame_strip(request);
        let netfn = frame[2] >> 2;
        let seq = frame[5] >> 2;
        let cmd = frame[6];
        let data = frame[7..frame.len() - 2].to_vec();
        self.seen.lock().expect("seen").push(Seen {
            netfn,
            cmd,
            seq,
            data: data.clone(),
            priority,
        });

        let scripted = {
            let mut script = self.script.lock().expect("script");
            match script.front() {
                Some((c, _)) if *c == cmd => script.pop_front().map(|(_, r)| r),
                _ => None,
            }
        };

        match scripted {
            Some(Reply::Raw(raw)) => Ok(raw),
            Some(Reply::Timeout) => Err(Error::Timeout),
            Some(Reply::Code(code)) => Ok(encode_response(0x8F, netfn, cmd, seq, code, &[])),
            None => {
                let (code, out) = self.default_reply(netfn, cmd, &data);
                Ok(encode_response(0x8F, netfn, cmd, seq, code, &out))
            }
        }
    }
}

fn client(bmc: &Arc<SimulatedBmc>) -> Client {
    Client::builder(7, Arc::clone(bmc))
        .username("admin")
        .password("secret")
        .build()
        .expect("build")
}

/// Full sensor record: M = 2, B = 10, unsigned, linear.
fn full_record(record_id: u16, sensor_number: u8, name: &str) -> Vec<u8> {
    let mut record = vec![0u8; 47];
    record[0..2].copy_from_slice(&record_id.to_le_bytes());
    record[2] = 0x51;
    record[3] = 0x01;
    record[7] = sensor_number;
    record[12] = 0x01;
    record[24] = 2;
    record[26] = 10;
    record.push(0xC0 | name.len() as u8);
    record.extend_from_slice(name.as_bytes());
    record[4] = (record.len() - 5) as u8;
    record
}

fn compact_record(record_id: u16, sensor_number: u8, name: &str) -> Vec<u8> {
    let mut record = vec![0u8; 31];
    record[0..2].copy_from_slice(&record_id.to_le_bytes());
    record[2] = 0x51;
    record[3] = 0x02;
    record[7] = sensor_number;
    record[12] = 0x08;
    record.push(0xC0 | name.len() as u8);
    record.extend_from_slice(name.as_bytes());
    record[4] = (record.len() - 5) as u8;
    record
}

#[test]
fn server_blade_initialize_logs_on() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    let client = client(&bmc);

    assert!(client.initialize(false));
    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert_eq!(client.classification(), DeviceClassification::ServerBlade);
    assert_eq!(client.session_id(), SESSION_ID);
    assert_eq!(client.hardware_guid().map(|g| g.bytes), Some([0x11; 16]));
    assert_eq!(
        bmc.commands(),
        vec![
            GET_DEVICE_ID,
            GET_SYSTEM_GUID,
            GET_SESSION_CHALLENGE,
            ACTIVATE_SESSION,
            SET_SESSION_PRIVILEGE,
        ]
    );

    let seen = bmc.seen();
    assert!(seen.iter().all(|s| s.netfn == APP));
    assert!(seen.iter().all(|s| s.priority == Priority::High));
    // Challenge carries the padded user name.
    assert_eq!(&seen[2].data[1..6], b"admin");
    // Sequence restarts after activation.
    assert_eq!(seen[4].seq, 1);
}

#[test]
fn storage_blade_initialize_skips_login() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let client = client(&bmc);

    assert!(client.initialize(false));
    assert_eq!(client.state(), ConnectionState::Authenticated);
    assert_eq!(client.session_id(), 0);
    assert_eq!(bmc.commands(), vec![GET_DEVICE_ID, GET_SYSTEM_GUID]);
}

#[test]
fn unknown_device_fails_initialize() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x00);
    let client = client(&bmc);

    assert!(!client.initialize(false));
    assert_eq!(client.classification(), DeviceClassification::Unknown);
    assert_eq!(bmc.commands(), vec![GET_DEVICE_ID]);
}

#[test]
fn failed_guid_read_fails_initialize() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.push(GET_SYSTEM_GUID, Reply::Code(0xC1));
    let client = client(&bmc);

    assert!(!client.initialize(false));
    assert!(client.hardware_guid().is_none());
}

#[test]
fn successful_exchange_decodes_body() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let client = client(&bmc);

    let response = client.send_receive(&GetDeviceId, Priority::Normal, true);
    assert!(response.is_success());
    assert_eq!(response.completion_code, completion_code::SUCCESS);
    assert_eq!(response.data.len(), 15);
    let body = response.body.expect("decoded");
    assert_eq!(body.classification(), DeviceClassification::StorageBlade);
}

#[test]
fn unknown_response_address_is_malformed() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.push(
        GET_SYSTEM_GUID,
        Reply::Raw(encode_response(0x00, APP, GET_SYSTEM_GUID, 1, 0x00, &[0u8; 16])),
    );
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(response.completion_code, completion_code::MALFORMED_RESPONSE);
    assert!(response.body.is_none());
    assert_eq!(bmc.commands(), vec![GET_SYSTEM_GUID]);
}

#[test]
fn corrupted_frame_reports_checksum_failure() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let mut raw = encode_response(0x8F, APP, GET_SYSTEM_GUID, 1, 0x00, &[0x12; 16]);
    let pos = raw.len() - 3;
    raw[pos] ^= 0x01;
    bmc.push(GET_SYSTEM_GUID, Reply::Raw(raw));
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(response.completion_code, completion_code::ILLEGAL_PARAMETER);
}

#[test]
fn undecodable_data_is_invalid_data_in_response() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.push(
        GET_SYSTEM_GUID,
        Reply::Raw(encode_response(0x8F, APP, GET_SYSTEM_GUID, 1, 0x00, &[0x01; 4])),
    );
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(
        response.completion_code,
        completion_code::INVALID_DATA_IN_RESPONSE
    );
    assert_eq!(response.data, vec![0x01; 4]);
    assert!(response.body.is_none());
}

#[test]
fn handshake_timeout_reidentifies_and_resends() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.push(
        GET_SYSTEM_GUID,
        Reply::Raw(vec![completion_code::HANDSHAKE_TIMEOUT]),
    );
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Low, true);
    assert!(response.is_success());
    assert_eq!(
        bmc.commands(),
        vec![GET_SYSTEM_GUID, GET_DEVICE_ID, GET_SYSTEM_GUID]
    );
    assert!(bmc.seen().iter().all(|s| s.priority == Priority::Low));
    // Reset by the successful resend.
    assert_eq!(client.consecutive_errors(), 0);
}

#[test]
fn persistent_timeout_on_server_blade_relogs_once() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(response.completion_code, completion_code::HANDSHAKE_TIMEOUT);
    assert_eq!(
        bmc.commands(),
        vec![
            GET_SYSTEM_GUID,
            GET_DEVICE_ID,
            GET_SYSTEM_GUID,
            GET_SESSION_CHALLENGE,
            ACTIVATE_SESSION,
            SET_SESSION_PRIVILEGE,
            GET_SYSTEM_GUID,
        ]
    );
    assert_eq!(client.session_id(), SESSION_ID);
}

#[test]
fn relogon_recovers_server_blade() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert!(response.is_success());
    assert_eq!(bmc.commands().len(), 7);
    assert_eq!(client.consecutive_errors(), 0);
}

#[test]
fn insufficient_privilege_triggers_retry() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    bmc.push(
        GET_SYSTEM_GUID,
        Reply::Code(completion_code::INSUFFICIENT_PRIVILEGE),
    );
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert!(response.is_success());
    assert_eq!(
        bmc.commands(),
        vec![GET_SYSTEM_GUID, GET_DEVICE_ID, GET_SYSTEM_GUID]
    );
}

#[test]
fn repeated_insufficient_privilege_relogs_server_blade() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    for _ in 0..2 {
        bmc.push(
            GET_SYSTEM_GUID,
            Reply::Code(completion_code::INSUFFICIENT_PRIVILEGE),
        );
    }
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert!(response.is_success());
    assert_eq!(response.body.map(|g| g.bytes), Some([0x11; 16]));
    assert_eq!(
        bmc.commands(),
        vec![
            GET_SYSTEM_GUID,
            GET_DEVICE_ID,
            GET_SYSTEM_GUID,
            GET_SESSION_CHALLENGE,
            ACTIVATE_SESSION,
            SET_SESSION_PRIVILEGE,
            GET_SYSTEM_GUID,
        ]
    );
    assert_eq!(client.session_id(), SESSION_ID);
}

#[test]
fn persistent_insufficient_privilege_stops_after_relogon() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    for _ in 0..3 {
        bmc.push(
            GET_SYSTEM_GUID,
            Reply::Code(completion_code::INSUFFICIENT_PRIVILEGE),
        );
    }
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(
        response.completion_code,
        completion_code::INSUFFICIENT_PRIVILEGE
    );
    assert!(response.body.is_none());
    assert_eq!(
        bmc.commands(),
        vec![
            GET_SYSTEM_GUID,
            GET_DEVICE_ID,
            GET_SYSTEM_GUID,
            GET_SESSION_CHALLENGE,
            ACTIVATE_SESSION,
            SET_SESSION_PRIVILEGE,
            GET_SYSTEM_GUID,
        ]
    );
}

#[test]
fn storage_blade_does_not_relog() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    let client = client(&bmc);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(response.completion_code, completion_code::HANDSHAKE_TIMEOUT);
    assert_eq!(
        bmc.commands(),
        vec![GET_SYSTEM_GUID, GET_DEVICE_ID, GET_SYSTEM_GUID]
    );
}

#[test]
fn retry_uses_fresh_classification() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let client = client(&bmc);
    assert!(client.initialize(false));
    assert_eq!(client.classification(), DeviceClassification::StorageBlade);
    bmc.clear_seen();

    // The slot now reports a server blade.
    bmc.set_aux(0x04);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert!(response.is_success());
    assert_eq!(client.classification(), DeviceClassification::ServerBlade);
    assert!(bmc.commands().contains(&ACTIVATE_SESSION));
}

#[test]
fn invalid_connection_is_not_relogged_by_retry() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    bmc.push(GET_DEVICE_ID, Reply::Timeout);
    let client = client(&bmc);
    assert!(!client.initialize(false));
    assert_eq!(client.state(), ConnectionState::Invalid);
    bmc.clear_seen();

    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);

    let response = client.send_receive(&GetSystemGuid, Priority::Normal, true);
    assert_eq!(response.completion_code, completion_code::HANDSHAKE_TIMEOUT);
    assert_eq!(
        bmc.commands(),
        vec![GET_SYSTEM_GUID, GET_DEVICE_ID, GET_SYSTEM_GUID]
    );
    assert_eq!(client.state(), ConnectionState::Invalid);
    assert_eq!(client.session_id(), 0);

    // A fresh initialize still recovers the device.
    assert!(client.initialize(false));
    assert_eq!(client.state(), ConnectionState::Authenticated);
}

#[test]
fn sequence_numbers_advance_per_request() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let client = client(&bmc);

    for _ in 0..3 {
        let _ = client.send_receive(&GetDeviceId, Priority::Normal, false);
    }
    let seqs: Vec<u8> = bmc.seen().iter().map(|s| s.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn descriptor_cache_populates_and_converts_readings() {
    init_tracing();
    let bmc = SimulatedBmc::with_records(
        0x05,
        vec![
            full_record(0x0001, 0x30, "CPU0 Temp"),
            compact_record(0x0002, 0x41, "PSU1"),
        ],
    );
    let client = client(&bmc);

    let descriptors = client.sensor_descriptors();
    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].sensor_number, 0x30);
    assert_eq!(descriptors[1].description, "PSU1");

    let reading = client.sensor_reading(0x30, Priority::Normal);
    let reading = reading.body.expect("reading");
    assert_eq!(reading.descriptor.description, "CPU0 Temp");
    assert_eq!(reading.reading.raw, 20);
    assert_eq!(reading.value, Some(50.0));

    let compact = client
        .sensor_reading(0x41, Priority::Normal)
        .body
        .expect("reading");
    assert_eq!(compact.value, None);

    let missing = client.sensor_reading(0x99, Priority::Normal);
    assert_eq!(missing.completion_code, completion_code::SENSOR_NOT_PRESENT);

    // One reservation for the whole walk.
    let reservations = bmc
        .commands()
        .into_iter()
        .filter(|&c| c == RESERVE_SDR)
        .count();
    assert_eq!(reservations, 1);
}

#[test]
fn failed_population_is_retried_on_next_access() {
    init_tracing();
    let bmc = SimulatedBmc::with_records(0x05, vec![full_record(0x0001, 0x30, "Inlet")]);
    bmc.push(RESERVE_SDR, Reply::Code(0xC0));
    let client = client(&bmc);

    assert!(client.sensor_descriptor(0x30).is_none());

    let descriptor = client.sensor_descriptor(0x30).expect("populated");
    assert_eq!(descriptor.description, "Inlet");
}

#[test]
fn truncated_record_leaves_cache_empty_until_repaired() {
    init_tracing();
    let mut truncated = full_record(0x0001, 0x30, "Inlet");
    truncated.truncate(20);
    truncated[4] = 15;
    let bmc = SimulatedBmc::with_records(0x05, vec![truncated]);
    let client = client(&bmc);

    assert!(client.sensor_descriptor(0x30).is_none());
    assert!(client.sensor_descriptors().is_empty());

    bmc.set_records(vec![full_record(0x0001, 0x30, "Inlet")]);
    let descriptor = client.sensor_descriptor(0x30).expect("populated");
    assert_eq!(descriptor.description, "Inlet");
    assert_eq!(client.sensor_descriptors().len(), 1);
}

#[test]
fn walk_stops_when_next_id_repeats() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.set_chain(SdrChain::RepeatId);
    let client = client(&bmc);

    assert!(client.sensor_descriptors().is_empty());
    let commands = bmc.commands();
    assert_eq!(commands, vec![RESERVE_SDR, GET_SDR]);
}

#[test]
fn walk_is_bounded_by_record_ceiling() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    bmc.set_chain(SdrChain::Endless);
    let client = client(&bmc);

    assert!(client.sensor_descriptors().is_empty());
    let commands = bmc.commands();
    let reads = commands.iter().filter(|&&c| c == GET_SDR).count();
    assert_eq!(reads, 512);
    assert_eq!(commands.len(), 513);
    assert_eq!(commands[0], RESERVE_SDR);

    // Record ids run 0, 1, .. 511 with no repeats.
    let last = bmc.seen().pop().expect("last read");
    assert_eq!(u16::from_le_bytes([last.data[2], last.data[3]]), 511);
}

#[test]
fn initialize_clears_cache_on_request_and_on_new_hardware() {
    init_tracing();
    let bmc = SimulatedBmc::with_records(0x05, vec![full_record(0x0001, 0x30, "Inlet")]);
    let client = client(&bmc);
    assert!(client.initialize(false));
    assert!(client.sensor_descriptor(0x30).is_some());

    // Same hardware: cache kept.
    bmc.clear_seen();
    assert!(client.initialize(false));
    assert!(client.sensor_descriptor(0x30).is_some());
    assert!(!bmc.commands().contains(&RESERVE_SDR));

    // Explicit clear forces a reload.
    bmc.clear_seen();
    assert!(client.initialize(true));
    assert!(client.sensor_descriptor(0x30).is_some());
    assert!(bmc.commands().contains(&RESERVE_SDR));

    // Swapped blade: new identity token drops the cache.
    bmc.set_guid([0x22; 16]);
    bmc.clear_seen();
    assert!(client.initialize(false));
    assert!(client.sensor_descriptor(0x30).is_some());
    assert!(bmc.commands().contains(&RESERVE_SDR));
}

#[test]
fn log_off_and_drop_close_the_session() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    let client = client(&bmc);
    assert!(client.initialize(false));

    bmc.clear_seen();
    client.log_off();
    assert_eq!(client.session_id(), 0);
    assert_eq!(bmc.commands(), vec![CLOSE_SESSION]);
    assert_eq!(bmc.seen()[0].data, SESSION_ID.to_le_bytes().to_vec());

    // No session left: dropping sends nothing.
    bmc.clear_seen();
    drop(client);
    assert!(bmc.commands().is_empty());

    let client = self::client(&bmc);
    assert!(client.initialize(false));
    bmc.clear_seen();
    drop(client);
    assert_eq!(bmc.commands(), vec![CLOSE_SESSION]);
}

#[test]
fn soft_close_disconnects() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    let client = client(&bmc);
    assert!(client.initialize(false));

    client.close(false);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.session_id(), 0);
}

#[test]
fn missing_credentials_log_on_with_empty_user() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    let client = Client::builder(7, Arc::clone(&bmc))
        .build()
        .expect("builder");

    assert!(client.initialize(false));
    let challenge = bmc
        .seen()
        .into_iter()
        .find(|s| s.cmd == GET_SESSION_CHALLENGE)
        .expect("challenge sent");
    assert_eq!(&challenge.data[1..], &[0u8; 16]);
}

#[test]
fn concurrent_callers_get_unique_sequence_numbers() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let client = Arc::new(client(&bmc));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let response = client.send_receive(&GetDeviceId, Priority::Normal, true);
                    assert!(response.is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    let mut seqs: Vec<u8> = bmc.seen().iter().map(|s| s.seq).collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 40);
}

#[test]
fn registry_shares_clients() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x05);
    let registry = ClientRegistry::new();
    registry.insert(client(&bmc));

    let shared = registry.get(7).expect("registered");
    assert!(shared.initialize(false));
    assert_eq!(registry.device_ids(), vec![7]);
    assert!(registry.remove(7).is_some());
    assert!(registry.get(7).is_none());
}

#[test]
fn execute_honours_disabled_retry() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    bmc.push(GET_SYSTEM_GUID, Reply::Timeout);
    let client = Client::builder(7, Arc::clone(&bmc))
        .retry(false)
        .build()
        .expect("build");

    let err = client
        .execute(GetSystemGuid, Priority::Normal)
        .err()
        .expect("must fail");
    assert!(matches!(
        err,
        Error::CompletionCode {
            completion_code: completion_code::HANDSHAKE_TIMEOUT
        }
    ));
    assert_eq!(bmc.commands(), vec![GET_SYSTEM_GUID]);

    let guid = client
        .execute(GetSystemGuid, Priority::Normal)
        .expect("second attempt");
    assert_eq!(guid.bytes, [0x11; 16]);
}

#[test]
fn configured_privilege_is_requested() {
    init_tracing();
    let bmc = SimulatedBmc::new(0x04);
    let client = Client::builder(7, Arc::clone(&bmc))
        .username("op")
        .password("pw")
        .privilege_level(ipmi_serial::PrivilegeLevel::Operator)
        .build()
        .expect("build");

    assert!(client.log_on(Priority::Normal));
    let seen = bmc.seen();
    let activate = seen
        .iter()
        .find(|s| s.cmd == ACTIVATE_SESSION)
        .expect("activate sent");
    assert_eq!(activate.data[1], 0x03);
    let privilege = seen
        .iter()
        .find(|s| s.cmd == SET_SESSION_PRIVILEGE)
        .expect("privilege sent");
    assert_eq!(privilege.data, vec![0x03]);
}
