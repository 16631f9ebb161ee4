use std::any::type_name;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use rand::RngCore;

use crate::client::core::ClientCore;
use crate::commands::{
    AUTH_TYPE_OEM, ActivateSession, CloseSession, Command, GetDeviceId, GetSensorReading,
    GetSessionChallenge, GetSystemGuid, SetSessionPrivilegeLevel,
};
use crate::crypto::{SecretBytes, single_session_auth_code};
use crate::error::{Error, Result};
use crate::protocol::Inbound;
use crate::sdr::{self, DescriptorCache};
use crate::session::SessionState;
use crate::transport::{self, Transport};
use crate::types::{
    ConnectionState, DeviceClassification, DeviceKind, Priority, PrivilegeLevel, Response,
    SensorDescriptor, SensorReading, SystemGuid, TransportStatus, completion_code,
};

/// A blocking IPMI serial basic-mode client for one device.
///
/// `Client` owns the session with the device: sequence numbers, the login
/// handshake, re-logon on failure, and the sensor descriptor cache. It is
/// `Send + Sync`; share it between worker threads behind an `Arc`.
///
/// Dropping a client with an open session closes the session first.
pub struct Client {
    transport: Box<dyn Transport + Send + Sync>,
    device_id: u8,
    device_kind: DeviceKind,
    privilege: PrivilegeLevel,
    retry: bool,
    core: ClientCore,
    session: SessionState,
    credentials: Mutex<Credentials>,
    hardware_guid: Mutex<Option<SystemGuid>>,
    descriptors: DescriptorCache,
}

#[derive(Debug, Default)]
struct Credentials {
    username: Option<Vec<u8>>,
    password: Option<SecretBytes>,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transport: Box<dyn Transport + Send + Sync>,
    device_id: u8,
    device_kind: DeviceKind,
    privilege: PrivilegeLevel,
    retry: bool,
    username: Option<Vec<u8>>,
    password: Option<SecretBytes>,
}

impl ClientBuilder {
    /// Create a new builder for the device reached through `transport`.
    pub fn new<T>(device_id: u8, transport: T) -> Self
    where
        T: Transport + Send + Sync + 'static,
    {
        Self {
            transport: Box::new(transport),
            device_id,
            device_kind: DeviceKind::Blade,
            privilege: PrivilegeLevel::Administrator,
            retry: true,
            username: None,
            password: None,
        }
    }

    /// Set the routing tag forwarded to the transport.
    pub fn device_kind(mut self, kind: DeviceKind) -> Self {
        self.device_kind = kind;
        self
    }

    /// Set the privilege level requested at activation (default: Administrator).
    pub fn privilege_level(mut self, privilege: PrivilegeLevel) -> Self {
        self.privilege = privilege;
        self
    }

    /// Enable or disable the re-identify/re-logon path for [`Client::execute`]
    /// and sensor reads (default: enabled).
    pub fn retry(mut self, enabled: bool) -> Self {
        self.retry = enabled;
        self
    }

    /// Set the username (bytes).
    pub fn username_bytes(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the username (UTF-8 string).
    ///
    /// This is a convenience wrapper around [`Self::username_bytes`].
    pub fn username(mut self, username: impl AsRef<str>) -> Self {
        self.username = Some(username.as_ref().as_bytes().to_vec());
        self
    }

    /// Set the password (bytes).
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(SecretBytes::new(password.into()));
        self
    }

    /// Set the password (UTF-8 string).
    ///
    /// This is a convenience wrapper around [`Self::password_bytes`].
    pub fn password(mut self, password: impl AsRef<str>) -> Self {
        self.password = Some(SecretBytes::new(password.as_ref().as_bytes().to_vec()));
        self
    }

    /// Build the [`Client`]. No bytes are exchanged until [`Client::initialize`].
    pub fn build(self) -> Result<Client> {
        if self.username.as_ref().is_some_and(|u| u.len() > 16) {
            return Err(Error::InvalidArgument("username longer than 16 bytes"));
        }

        Ok(Client {
            transport: self.transport,
            device_id: self.device_id,
            device_kind: self.device_kind,
            privilege: self.privilege,
            retry: self.retry,
            core: ClientCore::new(),
            session: SessionState::new(self.device_id),
            credentials: Mutex::new(Credentials {
                username: self.username,
                password: self.password,
            }),
            hardware_guid: Mutex::new(None),
            descriptors: DescriptorCache::new(),
        })
    }
}

impl Client {
    /// Create a [`ClientBuilder`].
    pub fn builder<T>(device_id: u8, transport: T) -> ClientBuilder
    where
        T: Transport + Send + Sync + 'static,
    {
        ClientBuilder::new(device_id, transport)
    }

    /// Device id forwarded to the transport.
    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Active session id, or 0 when no session is open.
    pub fn session_id(&self) -> u32 {
        self.session.session_id()
    }

    /// Classification learned by the last identify exchange.
    pub fn classification(&self) -> DeviceClassification {
        self.session.classification()
    }

    /// Failures since the last successfully decoded response.
    pub fn consecutive_errors(&self) -> i32 {
        self.session.consecutive_errors()
    }

    /// Hardware identity token obtained by the last successful initialize.
    pub fn hardware_guid(&self) -> Option<SystemGuid> {
        *self
            .hardware_guid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the credentials used by the next [`Self::log_on`].
    pub fn set_credentials(&self, username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) {
        let mut credentials = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        credentials.username = Some(username.into());
        credentials.password = Some(SecretBytes::new(password.into()));
    }

    /// Probe the device and bring the session up.
    ///
    /// Server blades get a full login, storage blades are usable as soon as
    /// their identity token is read. Returns whether the identity token was
    /// obtained. With `clear_cache` the sensor descriptors are dropped first.
    pub fn initialize(&self, clear_cache: bool) -> bool {
        if clear_cache {
            self.descriptors.clear();
        }

        self.session.set_state(ConnectionState::Connecting);

        let identify = self.send_receive(&GetDeviceId, Priority::High, false);
        let Some(device) = identify.body else {
            tracing::error!(
                device_id = self.device_id,
                completion_code = identify.completion_code,
                "identify exchange failed"
            );
            self.session.set_state(ConnectionState::Invalid);
            return false;
        };

        let classification = device.classification();
        self.session.set_classification(classification);

        match classification {
            DeviceClassification::ServerBlade => {
                self.session.set_state(ConnectionState::AuthenticatingChallenge);
                if !self.fetch_hardware_guid() {
                    return false;
                }
                self.log_on(Priority::High);
                true
            }
            DeviceClassification::StorageBlade => {
                if !self.fetch_hardware_guid() {
                    return false;
                }
                self.session.set_state(ConnectionState::Authenticated);
                true
            }
            other => {
                tracing::error!(
                    device_id = self.device_id,
                    classification = ?other,
                    aux = device.aux_firmware_revision[0],
                    "unrecognized device classification"
                );
                false
            }
        }
    }

    fn fetch_hardware_guid(&self) -> bool {
        let response = self.send_receive(&GetSystemGuid, Priority::High, false);
        let Some(guid) = response.body else {
            tracing::error!(
                device_id = self.device_id,
                completion_code = response.completion_code,
                "failed to read hardware identity"
            );
            return false;
        };

        let previous = self
            .hardware_guid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(guid);
        if previous.is_some_and(|p| p != guid) {
            tracing::info!(
                device_id = self.device_id,
                "hardware identity changed, dropping sensor descriptors"
            );
            self.descriptors.clear();
        }
        true
    }

    /// Run the challenge/activate handshake and raise the session privilege.
    ///
    /// The session is raised to the builder's privilege level, Administrator
    /// unless configured otherwise. Failures are logged; the connection state
    /// stays wherever the handshake stopped. Returns whether a session was
    /// activated.
    pub fn log_on(&self, priority: Priority) -> bool {
        let (username, password) = {
            let credentials = self
                .credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if credentials.username.is_none() || credentials.password.is_none() {
                tracing::warn!(
                    device_id = self.device_id,
                    "no credentials configured, logging on with empty user name and password"
                );
            }
            (
                credentials.username.clone().unwrap_or_default(),
                credentials
                    .password
                    .clone()
                    .unwrap_or_else(SecretBytes::empty),
            )
        };

        let challenge = self.send_receive(
            &GetSessionChallenge::new(AUTH_TYPE_OEM, &username),
            priority,
            false,
        );
        let Some(challenge) = challenge.body else {
            tracing::warn!(
                device_id = self.device_id,
                completion_code = challenge.completion_code,
                "session challenge failed"
            );
            return false;
        };
        self.session.set_state(ConnectionState::SessionChallenge);

        let auth_code = match single_session_auth_code(
            &password,
            challenge.temporary_session_id,
            &challenge.challenge,
        ) {
            Ok(code) => code,
            Err(err) => {
                tracing::error!(
                    device_id = self.device_id,
                    error = %err,
                    "failed to compute auth code"
                );
                return false;
            }
        };

        let activate = ActivateSession {
            auth_type: AUTH_TYPE_OEM,
            privilege: self.privilege,
            auth_code,
            initial_outbound_sequence: rand::rng().next_u32(),
        };
        let activated = self.send_receive(&activate, priority, false);
        let Some(activated) = activated.body else {
            tracing::warn!(
                device_id = self.device_id,
                completion_code = activated.completion_code,
                "session activation failed"
            );
            return false;
        };

        self.session.set_session_id(activated.session_id);
        self.core.reset_sequence();
        self.session.set_state(ConnectionState::Authenticated);

        let privilege = self.send_receive(
            &SetSessionPrivilegeLevel {
                privilege: self.privilege,
            },
            priority,
            false,
        );
        if !privilege.is_success() {
            tracing::debug!(
                device_id = self.device_id,
                completion_code = privilege.completion_code,
                "set session privilege level failed"
            );
        }
        true
    }

    /// Close the session on the device if one is open, then forget its id.
    ///
    /// The connection ends up [`ConnectionState::Disconnected`] either way.
    pub fn log_off(&self) {
        let session_id = self.session.session_id();
        if session_id != 0 {
            let response = self.send_receive(&CloseSession { session_id }, Priority::High, false);
            if !response.is_success() {
                tracing::debug!(
                    device_id = self.device_id,
                    session_id,
                    completion_code = response.completion_code,
                    "close session failed"
                );
            }
        }
        self.session.set_session_id(0);
        self.session.set_state(ConnectionState::Disconnected);
    }

    /// Close the connection. A soft close logs off first.
    pub fn close(&self, hard: bool) {
        if !hard {
            self.log_off();
        }
        self.session.set_state(ConnectionState::Disconnected);
    }

    /// Execute a typed command and return its decoded output.
    ///
    /// Failure completion codes surface as [`Error::CompletionCode`].
    pub fn execute<C: Command>(&self, command: C, priority: Priority) -> Result<C::Output> {
        let response = self.send_receive(&command, priority, self.retry);
        response.body.ok_or(Error::CompletionCode {
            completion_code: response.completion_code,
        })
    }

    /// Send one request and return its response.
    ///
    /// Never fails: transport errors, malformed frames, checksum mismatches
    /// and undecodable data all come back as completion codes. With
    /// `allow_retry`, a handshake timeout or an insufficient-privilege code
    /// triggers one re-identify, one resend and, for server blades, one
    /// re-logon with a final resend.
    pub fn send_receive<C: Command>(
        &self,
        command: &C,
        priority: Priority,
        allow_retry: bool,
    ) -> Response<C::Output> {
        self.exchange(command, priority, allow_retry, "first")
    }

    fn exchange<C: Command>(
        &self,
        command: &C,
        priority: Priority,
        allow_retry: bool,
        attempt: &'static str,
    ) -> Response<C::Output> {
        let start = Instant::now();
        let response = self.exchange_inner(command, priority, allow_retry);
        crate::observe::record_exchange(
            attempt,
            C::NETFN,
            C::CMD,
            start.elapsed(),
            response.completion_code,
        );
        response
    }

    fn exchange_inner<C: Command>(
        &self,
        command: &C,
        priority: Priority,
        allow_retry: bool,
    ) -> Response<C::Output> {
        let request_data = command.request_data();
        let frame = match self.core.build_request(C::NETFN, C::CMD, &request_data) {
            Ok((_, frame)) => frame,
            Err(err) => {
                tracing::error!(
                    command = type_name::<C>(),
                    error = %err,
                    "failed to frame request"
                );
                return Response::from_code(completion_code::UNSPECIFIED);
            }
        };

        let raw = match self
            .transport
            .send_receive(priority, self.device_kind, self.device_id, &frame)
        {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(
                    device_id = self.device_id,
                    command = type_name::<C>(),
                    error = %err,
                    "transport exchange failed"
                );
                vec![transport::error_status(&err)]
            }
        };

        match self.core.decode_response(&raw) {
            Inbound::Transport(TransportStatus::HandshakeTimeout) if allow_retry => {
                self.retry_after_failure(command, priority, completion_code::HANDSHAKE_TIMEOUT)
            }
            Inbound::Transport(status) => Response::from_code(status.as_u8()),
            Inbound::Rejected(code) => Response::from_code(code),
            Inbound::Frame {
                completion_code: completion_code::SUCCESS,
                data,
            } => match command.parse_response(&data) {
                Ok(body) => {
                    self.session.reset_errors();
                    Response {
                        completion_code: completion_code::SUCCESS,
                        data,
                        body: Some(body),
                    }
                }
                Err(err) => {
                    tracing::error!(
                        device_id = self.device_id,
                        command = type_name::<C>(),
                        response = %hex::encode(&raw),
                        error = %err,
                        "failed to decode response data"
                    );
                    Response {
                        completion_code: completion_code::INVALID_DATA_IN_RESPONSE,
                        data,
                        body: None,
                    }
                }
            },
            Inbound::Frame {
                completion_code: completion_code::INSUFFICIENT_PRIVILEGE,
                ..
            } if allow_retry => self.retry_after_failure(
                command,
                priority,
                completion_code::INSUFFICIENT_PRIVILEGE,
            ),
            Inbound::Frame {
                completion_code,
                data,
            } => {
                tracing::warn!(
                    device_id = self.device_id,
                    command = type_name::<C>(),
                    completion_code,
                    response = %hex::encode(&raw),
                    "command completed with failure code"
                );
                Response {
                    completion_code,
                    data,
                    body: None,
                }
            }
        }
    }

    /// Recover from a timeout or privilege failure.
    ///
    /// Re-identifies the device and resends once. Session devices that still
    /// fail log on again and resend a final time, unless the connection is
    /// [`ConnectionState::Invalid`]. Nothing here re-enters the retry path.
    fn retry_after_failure<C: Command>(
        &self,
        command: &C,
        priority: Priority,
        failure_code: u8,
    ) -> Response<C::Output> {
        let errors = self.session.record_error();
        tracing::warn!(
            device_id = self.device_id,
            command = type_name::<C>(),
            failure_code,
            consecutive_errors = errors,
            "communication failure, re-identifying device"
        );

        let identify = self.exchange(&GetDeviceId, priority, false, "retry");
        let Some(device) = identify.body else {
            tracing::error!(
                device_id = self.device_id,
                completion_code = identify.completion_code,
                "identify failed during retry"
            );
            return Response::from_code(failure_code);
        };
        self.session.set_classification(device.classification());

        let response = self.exchange(command, priority, false, "retry");
        if !is_session_failure(response.completion_code)
            || !self.session.classification().requires_session()
        {
            return response;
        }

        // Invalid stays sticky until the next initialize.
        if self.session.state() == ConnectionState::Invalid {
            tracing::warn!(
                device_id = self.device_id,
                completion_code = response.completion_code,
                "connection invalid, not re-establishing session"
            );
            return response;
        }

        tracing::info!(device_id = self.device_id, "re-establishing session");
        self.log_on(priority);
        self.exchange(command, priority, false, "retry")
    }

    /// Look up the descriptor of one sensor, reading the repository if needed.
    pub fn sensor_descriptor(&self, sensor_number: u8) -> Option<SensorDescriptor> {
        self.ensure_descriptors(Priority::Normal);
        self.descriptors.get(sensor_number)
    }

    /// All cached sensor descriptors, reading the repository if needed.
    pub fn sensor_descriptors(&self) -> Vec<SensorDescriptor> {
        self.ensure_descriptors(Priority::Normal);
        self.descriptors.snapshot()
    }

    /// Fill the descriptor cache if it is empty. Returns whether it holds entries.
    pub fn ensure_descriptors(&self, priority: Priority) -> bool {
        self.descriptors
            .ensure_populated(|| sdr::read_repository(self, priority))
    }

    /// Drop every cached sensor descriptor.
    pub fn clear_descriptors(&self) {
        self.descriptors.clear();
    }

    /// Read one sensor and convert it with its cached descriptor.
    pub fn sensor_reading(&self, sensor_number: u8, priority: Priority) -> Response<SensorReading> {
        self.ensure_descriptors(priority);
        let Some(descriptor) = self.descriptors.get(sensor_number) else {
            tracing::debug!(
                device_id = self.device_id,
                sensor_number,
                "no descriptor for sensor"
            );
            return Response::from_code(completion_code::SENSOR_NOT_PRESENT);
        };

        let Response {
            completion_code,
            data,
            body,
        } = self.send_receive(&GetSensorReading { sensor_number }, priority, self.retry);

        let body = body.map(|reading| {
            let value = if reading.unavailable {
                None
            } else {
                descriptor.conversion.map(|c| c.convert(reading.raw))
            };
            SensorReading {
                descriptor,
                reading,
                value,
            }
        });

        Response {
            completion_code,
            data,
            body,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.session.session_id() != 0 {
            self.close(false);
        }
    }
}

fn is_session_failure(code: u8) -> bool {
    matches!(
        code,
        completion_code::HANDSHAKE_TIMEOUT | completion_code::INSUFFICIENT_PRIVILEGE
    )
}
