// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer session.
//!
//! A [`Connection`] wraps a [`Channel`], runs the handshake state machine
//! and classifies inbound frames. It performs no I/O scheduling of its own:
//! the owning transceiver feeds it frames and acts on the returned events.
//!
//! ```text
//! Connecting --connect--> EarlySubscribe --preload finished--> Connected
//!      \______________________\__________________________________\--> Closed
//! ```

use crate::io::channel::{Channel, ChannelError};
use crate::io::dispatcher::DispatchError;
use crate::protocol::control::{
    self, ConnectionState, ControlRecord, DotsClearCache, DotsDescriptorRequest, DotsMember,
    DotsMsgConnect, DotsMsgConnectResponse, DotsMsgError, DotsMsgHello, EnumDescriptorData,
    StructDescriptorData,
};
use crate::protocol::{ProtocolError, RawFrame, Transmission, TransportHeader};
use crate::types::{Record, Registry, RegistryError, ValueDescriptor};
use std::collections::HashSet;
use thiserror::Error;

/// Id of a connection whose peer has not been identified.
pub const UNINITIALIZED_ID: u32 = 0;
/// Id of the broker.
pub const HOST_ID: u32 = 1;
/// First id handed out to guests.
pub const FIRST_GUEST_ID: u32 = 2;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("authentication of '{0}' failed")]
    AuthenticationFailed(String),

    #[error("connection rejected by peer")]
    Rejected,

    #[error("peer reported error {code}: {text}")]
    Peer { code: i32, text: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// Code reported to the peer in `DotsMsgError`, for failures the peer
    /// caused.
    pub fn peer_code(&self) -> Option<i32> {
        match self {
            Self::Protocol(e) => Some(e.code()),
            Self::Registry(_) => Some(6),
            Self::AuthenticationFailed(_) => Some(7),
            _ => None,
        }
    }
}

/// Which side of the handshake a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Broker side.
    Host,
    /// Client side.
    Guest,
}

/// Outcome of one inbound frame.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Host side: an unidentified guest asks to connect.
    ConnectRequest(DotsMsgConnect),
    /// Guest side: broker greeting.
    Hello(DotsMsgHello),
    /// The handshake advanced to a new state.
    Transition(ConnectionState),
    Member(DotsMember),
    DescriptorRequest(DotsDescriptorRequest),
    ClearCache(DotsClearCache),
    /// A type announced by the peer was registered.
    TypeImported(String),
    /// Application or directory data.
    Regular(Transmission),
}

pub struct Connection {
    channel: Box<dyn Channel>,
    role: Role,
    state: ConnectionState,
    self_id: u32,
    peer_id: u32,
    peer_name: String,
    shared_types: HashSet<String>,
    auth_nonce: Option<u64>,
}

impl Connection {
    pub fn new(channel: Box<dyn Channel>, role: Role) -> Self {
        let (self_id, peer_id) = match role {
            Role::Host => (HOST_ID, UNINITIALIZED_ID),
            Role::Guest => (UNINITIALIZED_ID, HOST_ID),
        };
        Self {
            channel,
            role,
            state: ConnectionState::Connecting,
            self_id,
            peer_id,
            peer_name: String::new(),
            shared_types: HashSet::new(),
            auth_nonce: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    /// Own id: 1 on the broker, the assigned client id on a guest.
    pub fn self_id(&self) -> u32 {
        self.self_id
    }

    /// Peer id: the guest's id on the broker, 1 on a guest.
    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn peer_description(&self) -> String {
        self.channel.peer_description()
    }

    pub fn auth_nonce(&self) -> Option<u64> {
        self.auth_nonce
    }

    /// Whether the peer already knows the definition of `type_name`.
    pub fn shares_type(&self, type_name: &str) -> bool {
        self.shared_types.contains(type_name)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Transmit `header.attributes` of `record`, sharing its type first.
    pub fn transmit(
        &mut self,
        registry: &Registry,
        header: &TransportHeader,
        record: &Record,
    ) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.share_type(registry, record.type_name())?;
        self.channel.transmit(header, record.as_record_ref())?;
        self.note_descriptor_sent(record);
        Ok(())
    }

    /// Forward a frame received from another connection.
    pub fn forward(&mut self, registry: &Registry, frame: &RawFrame) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.share_type(registry, &frame.header.type_name)?;
        self.channel.transmit_raw(frame)?;
        Ok(())
    }

    pub fn transmit_control<T: ControlRecord>(
        &mut self,
        registry: &Registry,
        message: &T,
    ) -> Result<(), ConnectionError> {
        let record = message.encode(registry)?;
        let header = TransportHeader::for_record(&record);
        self.transmit(registry, &header, &record)
    }

    /// Make sure the peer knows `type_name` and every type it depends on.
    pub fn share_type(&mut self, registry: &Registry, type_name: &str) -> Result<(), ConnectionError> {
        if self.shared_types.contains(type_name) || control::is_builtin_type(type_name) {
            return Ok(());
        }
        let descriptor = registry
            .find(type_name)
            .ok_or_else(|| ProtocolError::UnknownType(type_name.to_owned()))?
            .clone();

        let mut dependencies = Vec::new();
        descriptor.collect_dependencies(&mut dependencies);

        for dependency in dependencies {
            let name = dependency.name().to_owned();
            if self.shared_types.contains(&name) || control::is_builtin_type(&name) {
                continue;
            }
            let record = match &dependency {
                ValueDescriptor::Struct(d) => StructDescriptorData::from_descriptor(d).encode(registry)?,
                ValueDescriptor::Enum(d) => EnumDescriptorData::from_descriptor(d).encode(registry)?,
                _ => continue,
            };
            log::debug!("[connection] sharing type '{}' with {}", name, self.describe());
            let header = TransportHeader::for_record(&record);
            self.channel.transmit(&header, record.as_record_ref())?;
            self.shared_types.insert(name);
        }
        Ok(())
    }

    fn note_descriptor_sent(&mut self, record: &Record) {
        if matches!(
            record.type_name(),
            control::STRUCT_DESCRIPTOR_DATA | control::ENUM_DESCRIPTOR_DATA
        ) {
            if let Some(name) = record.get_as::<&str>("name") {
                self.shared_types.insert(name.to_owned());
            }
        }
    }

    /// Host side: greet a new guest, optionally with an auth challenge.
    pub fn send_hello(
        &mut self,
        registry: &Registry,
        server_name: &str,
        auth_nonce: Option<u64>,
    ) -> Result<(), ConnectionError> {
        self.auth_nonce = auth_nonce;
        let hello = DotsMsgHello {
            server_name: server_name.to_owned(),
            auth_challenge: auth_nonce,
            authentication_required: auth_nonce.is_some(),
        };
        self.transmit_control(registry, &hello)
    }

    /// Host side: accept a connect request and enter `EarlySubscribe`.
    pub fn accept(
        &mut self,
        registry: &Registry,
        client_id: u32,
        client_name: &str,
        server_name: &str,
        preload: bool,
    ) -> Result<(), ConnectionError> {
        self.peer_id = client_id;
        self.peer_name = client_name.to_owned();
        let response = DotsMsgConnectResponse {
            server_name: Some(server_name.to_owned()),
            client_id: Some(client_id),
            accepted: Some(true),
            preload: Some(preload),
            preload_finished: None,
        };
        self.transmit_control(registry, &response)?;
        self.set_state(ConnectionState::EarlySubscribe);
        Ok(())
    }

    /// Host side: tell the peer why it is being dropped. Best effort.
    pub fn send_error(&mut self, registry: &Registry, code: i32, text: &str) {
        let error = DotsMsgError {
            error_code: code,
            error_text: text.to_owned(),
        };
        if let Err(e) = self.transmit_control(registry, &error) {
            log::debug!("[connection] could not notify {}: {}", self.describe(), e);
        }
    }

    /// Guest side: finish the preload phase.
    pub fn send_preload_finished(&mut self, registry: &Registry) -> Result<(), ConnectionError> {
        let connect = DotsMsgConnect {
            preload_client_finished: Some(true),
            ..Default::default()
        };
        self.transmit_control(registry, &connect)
    }

    /// Enter `Closed`. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        log::debug!("[connection] closing {}", self.describe());
        self.set_state(ConnectionState::Closed);
        self.channel.close();
        true
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Decode and classify one inbound frame.
    ///
    /// An error means the session is broken and must be closed.
    pub fn handle_receive(
        &mut self,
        registry: &mut Registry,
        frame: &RawFrame,
    ) -> Result<Vec<ConnectionEvent>, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Ok(Vec::new());
        }

        let transmission = frame.decode(registry)?;
        let type_name = transmission.header.type_name.clone();

        match (self.role, type_name.as_str()) {
            (_, control::MSG_ERROR) => {
                let error = DotsMsgError::decode(&transmission.instance)?;
                Err(ConnectionError::Peer {
                    code: error.error_code,
                    text: error.error_text,
                })
            }
            (Role::Host, control::MSG_CONNECT) => {
                let connect = DotsMsgConnect::decode(&transmission.instance)?;
                self.host_connect(registry, connect)
            }
            (Role::Host, control::MSG_HELLO | control::MSG_CONNECT_RESPONSE) => {
                Err(self.unexpected(&type_name))
            }
            (Role::Guest, control::MSG_HELLO) => {
                self.expect_state(&[ConnectionState::Connecting], &type_name)?;
                let hello = DotsMsgHello::decode(&transmission.instance)?;
                self.peer_name = hello.server_name.clone();
                Ok(vec![ConnectionEvent::Hello(hello)])
            }
            (Role::Guest, control::MSG_CONNECT_RESPONSE) => {
                let response = DotsMsgConnectResponse::decode(&transmission.instance)?;
                self.guest_connect_response(response)
            }
            (_, control::STRUCT_DESCRIPTOR_DATA | control::ENUM_DESCRIPTOR_DATA) => {
                self.expect_state(
                    &[ConnectionState::EarlySubscribe, ConnectionState::Connected],
                    &type_name,
                )?;
                let imported = self.import_type(registry, &transmission)?;
                let mut events = vec![ConnectionEvent::TypeImported(imported)];
                if self.role == Role::Guest {
                    events.push(ConnectionEvent::Regular(transmission));
                }
                Ok(events)
            }
            (Role::Host, control::MEMBER) => {
                self.expect_established(&type_name)?;
                let member = DotsMember::decode(&transmission.instance)?;
                Ok(vec![ConnectionEvent::Member(member)])
            }
            (Role::Host, control::DESCRIPTOR_REQUEST) => {
                self.expect_established(&type_name)?;
                let request = DotsDescriptorRequest::decode(&transmission.instance)?;
                Ok(vec![ConnectionEvent::DescriptorRequest(request)])
            }
            (Role::Host, control::CLEAR_CACHE) => {
                self.expect_established(&type_name)?;
                let clear = DotsClearCache::decode(&transmission.instance)?;
                Ok(vec![ConnectionEvent::ClearCache(clear)])
            }
            (Role::Host, _) => {
                self.expect_state(&[ConnectionState::Connected], &type_name)?;
                Ok(vec![ConnectionEvent::Regular(transmission)])
            }
            (Role::Guest, _) => {
                self.expect_established(&type_name)?;
                Ok(vec![ConnectionEvent::Regular(transmission)])
            }
        }
    }

    fn host_connect(
        &mut self,
        registry: &Registry,
        connect: DotsMsgConnect,
    ) -> Result<Vec<ConnectionEvent>, ConnectionError> {
        match self.state {
            ConnectionState::Connecting if connect.client_name.is_some() => {
                Ok(vec![ConnectionEvent::ConnectRequest(connect)])
            }
            ConnectionState::EarlySubscribe if connect.preload_client_finished == Some(true) => {
                let response = DotsMsgConnectResponse {
                    preload_finished: Some(true),
                    ..Default::default()
                };
                self.transmit_control(registry, &response)?;
                self.set_state(ConnectionState::Connected);
                Ok(vec![ConnectionEvent::Transition(ConnectionState::Connected)])
            }
            _ => Err(self.unexpected(control::MSG_CONNECT)),
        }
    }

    fn guest_connect_response(
        &mut self,
        response: DotsMsgConnectResponse,
    ) -> Result<Vec<ConnectionEvent>, ConnectionError> {
        match self.state {
            ConnectionState::Connecting => {
                if response.accepted != Some(true) {
                    return Err(ConnectionError::Rejected);
                }
                let client_id = response.client_id.ok_or_else(|| ProtocolError::MalformedControl {
                    type_name: control::MSG_CONNECT_RESPONSE.to_owned(),
                    reason: "missing 'client_id'".to_owned(),
                })?;
                self.self_id = client_id;
                if let Some(name) = response.server_name {
                    self.peer_name = name;
                }
                self.set_state(ConnectionState::EarlySubscribe);
                Ok(vec![ConnectionEvent::Transition(ConnectionState::EarlySubscribe)])
            }
            ConnectionState::EarlySubscribe if response.preload_finished == Some(true) => {
                self.set_state(ConnectionState::Connected);
                Ok(vec![ConnectionEvent::Transition(ConnectionState::Connected)])
            }
            _ => Err(self.unexpected(control::MSG_CONNECT_RESPONSE)),
        }
    }

    fn import_type(
        &mut self,
        registry: &mut Registry,
        transmission: &Transmission,
    ) -> Result<String, ConnectionError> {
        let name = if transmission.header.type_name == control::STRUCT_DESCRIPTOR_DATA {
            let data = StructDescriptorData::decode(&transmission.instance)?;
            if !control::is_builtin_type(&data.name) {
                let descriptor = data.to_descriptor(registry).map_err(ProtocolError::from)?;
                registry.register_struct(descriptor, false)?;
            }
            data.name
        } else {
            let data = EnumDescriptorData::decode(&transmission.instance)?;
            if !control::is_builtin_type(&data.name) {
                let descriptor = data.to_descriptor().map_err(ProtocolError::from)?;
                registry.register_enum(descriptor, false)?;
            }
            data.name
        };
        log::debug!("[connection] imported type '{}' from {}", name, self.describe());
        self.shared_types.insert(name.clone());
        Ok(name)
    }

    fn set_state(&mut self, state: ConnectionState) {
        log::debug!(
            "[connection] {} {} -> {}",
            self.describe(),
            self.state,
            state
        );
        self.state = state;
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }

    fn expect_established(&self, what: &str) -> Result<(), ConnectionError> {
        self.expect_state(
            &[ConnectionState::EarlySubscribe, ConnectionState::Connected],
            what,
        )
    }

    fn expect_state(&self, allowed: &[ConnectionState], what: &str) -> Result<(), ConnectionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> ConnectionError {
        ConnectionError::Protocol(ProtocolError::UnexpectedState {
            what: what.to_owned(),
            state: self.state,
        })
    }

    fn describe(&self) -> String {
        if self.peer_name.is_empty() {
            format!("#{} ({})", self.peer_id, self.channel.peer_description())
        } else {
            format!("#{} '{}'", self.peer_id, self.peer_name)
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("self_id", &self.self_id)
            .field("peer_id", &self.peer_id)
            .field("peer_name", &self.peer_name)
            .finish()
    }
}
