// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker side transceiver.
//!
//! Owns every guest connection, the group membership map and the broker
//! cache. Updates received from a guest are applied to the cache and
//! forwarded to the members of their destination group.
//!
//! # Routing
//!
//! ```text
//! guest C ──frame──> handle_receive(C)
//!                      ├── control: handshake, join/leave, descriptor
//!                      │            request, cache clear
//!                      └── regular: stamp sender ─> cache ─> members(T) \ {C}
//! ```

use super::auth::{generate_nonce, AuthManager, NoAuthentication};
use super::channel::{Channel, ChannelError};
use super::connection::{Connection, ConnectionError, ConnectionEvent, Role, FIRST_GUEST_ID, HOST_ID};
use super::container::CacheEntry;
use super::dispatcher::Dispatcher;
use super::{validate_publication, PublishError, TransceiverError};
use crate::protocol::control::{self, ControlRecord};
use crate::protocol::{
    register_builtin_types, ConnectionState, DotsClearCache, DotsClient, DotsDaemonStatus,
    DotsDescriptorRequest, DotsMember, DotsMsgConnect, EnumDescriptorData, MemberEvent,
    ProtocolError, RawFrame, StructDescriptorData, Transmission, TransportHeader,
};
use crate::types::{PropertySet, Record, Registry, TimePoint, ValueDescriptor};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Broker settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Name sent to guests in the handshake.
    pub server_name: String,
    /// Forward updates back to the guest that published them.
    pub echo_to_origin: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            server_name: "dotsd".to_owned(),
            echo_to_origin: false,
        }
    }
}

/// Runtime handle of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(pub u64);

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub struct HostTransceiver {
    config: HostConfig,
    registry: Registry,
    dispatcher: Dispatcher,
    connections: BTreeMap<ConnectionKey, Connection>,
    /// Group name -> member connections.
    groups: HashMap<String, BTreeSet<ConnectionKey>>,
    next_key: u64,
    next_guest_id: u32,
    auth: Box<dyn AuthManager>,
    /// Types registered since the last announcement pass.
    pending_types: Arc<Mutex<Vec<ValueDescriptor>>>,
    /// Connections closed since the last `drain_closed`.
    closed: Vec<ConnectionKey>,
    start_time: TimePoint,
    received_frames: u64,
    received_bytes: u64,
    last_status: Option<DotsDaemonStatus>,
}

impl HostTransceiver {
    pub fn new(config: HostConfig) -> Result<Self, TransceiverError> {
        let mut registry = Registry::new();
        register_builtin_types(&mut registry)?;

        let pending_types = Arc::new(Mutex::new(Vec::new()));
        let sink = pending_types.clone();
        registry.set_new_type_handler(Box::new(move |descriptor: &ValueDescriptor| {
            sink.lock().push(descriptor.clone());
        }));

        log::info!("[host] '{}' ready", config.server_name);
        Ok(Self {
            config,
            registry,
            dispatcher: Dispatcher::new(),
            connections: BTreeMap::new(),
            groups: HashMap::new(),
            next_key: 0,
            next_guest_id: FIRST_GUEST_ID,
            auth: Box::new(NoAuthentication),
            pending_types,
            closed: Vec::new(),
            start_time: TimePoint::now(),
            received_frames: 0,
            received_bytes: 0,
            last_status: None,
        })
    }

    /// Install an authentication hook for new guests.
    pub fn with_auth(mut self, auth: Box<dyn AuthManager>) -> Self {
        self.auth = auth;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_state(&self, key: ConnectionKey) -> Option<ConnectionState> {
        self.connections.get(&key).map(Connection::state)
    }

    pub fn connection(&self, key: ConnectionKey) -> Option<&Connection> {
        self.connections.get(&key)
    }

    /// Members of a group, in key order.
    pub fn group_members(&self, group: &str) -> Vec<ConnectionKey> {
        self.groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Connections closed since the previous call. The runtime stops their
    /// I/O.
    pub fn drain_closed(&mut self) -> Vec<ConnectionKey> {
        std::mem::take(&mut self.closed)
    }

    // -----------------------------------------------------------------------
    // Runtime entry points
    // -----------------------------------------------------------------------

    /// Take ownership of a new guest channel and greet it.
    pub fn accept(&mut self, channel: Box<dyn Channel>) -> Result<ConnectionKey, TransceiverError> {
        let peer = channel.peer_description();
        let mut connection = Connection::new(channel, Role::Host);

        let nonce = if self.auth.requires_authentication(&peer) {
            Some(generate_nonce().ok_or(TransceiverError::NonceUnavailable)?)
        } else {
            None
        };
        connection.send_hello(&self.registry, &self.config.server_name, nonce)?;

        self.next_key += 1;
        let key = ConnectionKey(self.next_key);
        log::info!("[host] accepted {} from {}", key, peer);
        self.connections.insert(key, connection);
        Ok(key)
    }

    /// Count wire bytes read by the runtime, for the daemon status.
    pub fn note_received_bytes(&mut self, bytes: usize) {
        self.received_bytes += bytes as u64;
    }

    /// Process one frame received on `key`.
    ///
    /// On error the connection has already been closed.
    pub fn handle_receive(&mut self, key: ConnectionKey, frame: RawFrame) -> Result<(), ConnectionError> {
        let Some(connection) = self.connections.get_mut(&key) else {
            log::trace!("[host] dropping frame for closed {}", key);
            return Ok(());
        };
        self.received_frames += 1;

        let result = match connection.handle_receive(&mut self.registry, &frame) {
            Ok(events) => self.handle_events(key, events),
            Err(e) => Err(e),
        };
        self.announce_pending_types();

        if let Err(e) = result {
            self.fail(key, &e);
            return Err(e);
        }
        Ok(())
    }

    /// Transport failure on `key`.
    pub fn handle_error(&mut self, key: ConnectionKey, error: ChannelError) {
        let error = ConnectionError::Channel(error);
        self.close_connection(key, Some(&error));
    }

    /// Remove closed clients from the client directory.
    pub fn housekeeping(&mut self) {
        let removed = self.dispatcher.remove_cached(control::CLIENT, |entry| {
            DotsClient::from_record(entry.instance.as_record_ref())
                .map(|c| c.connection_state == Some(ConnectionState::Closed))
                .unwrap_or(false)
        });
        for entry in &removed {
            self.propagate_removal(control::CLIENT, entry);
        }
    }

    /// Publish `DotsDaemonStatus` if it changed since the previous call.
    pub fn publish_status(&mut self) {
        let status = DotsDaemonStatus {
            server_name: self.config.server_name.clone(),
            start_time: self.start_time,
            received_frames: self.received_frames,
            received_bytes: self.received_bytes,
            cache: self.dispatcher.pool().cache_info(),
        };
        let record = match status.encode(&self.registry) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("[host] cannot encode daemon status: {}", e);
                return;
            }
        };

        if let Some(previous) = self.last_status.as_ref().and_then(|s| s.encode(&self.registry).ok()) {
            if previous.diff_properties(&record, PropertySet::ALL).is_empty() {
                return;
            }
        }
        self.last_status = Some(status);
        self.route(None, Transmission::new(TransportHeader::for_record(&record), record));
    }

    /// Publish a record from the broker itself.
    pub fn publish(&mut self, record: &Record, included: PropertySet, remove: bool) -> Result<(), PublishError> {
        validate_publication(record, included)?;
        let header = TransportHeader::new(record.type_name(), included & record.valid_properties())
            .with_remove(remove);
        let instance = record.project(header.attributes);
        self.route(None, Transmission::new(header, instance));
        self.announce_pending_types();
        Ok(())
    }

    /// Register a type with the broker. Its description is published to
    /// subscribers of the descriptor groups.
    pub fn register_type(&mut self, descriptor: ValueDescriptor) -> Result<ValueDescriptor, TransceiverError> {
        let registered = self.registry.register(descriptor, false)?;
        self.announce_pending_types();
        Ok(registered)
    }

    /// Close every connection.
    pub fn stop(&mut self) {
        let keys: Vec<ConnectionKey> = self.connections.keys().copied().collect();
        for key in keys {
            self.close_connection(key, None);
        }
        log::info!("[host] '{}' stopped", self.config.server_name);
    }

    // -----------------------------------------------------------------------
    // Control handling
    // -----------------------------------------------------------------------

    fn handle_events(&mut self, key: ConnectionKey, events: Vec<ConnectionEvent>) -> Result<(), ConnectionError> {
        for event in events {
            match event {
                ConnectionEvent::ConnectRequest(connect) => self.handle_connect(key, connect)?,
                ConnectionEvent::Transition(state) => self.publish_client(key, state),
                ConnectionEvent::Member(member) => self.handle_member(key, member)?,
                ConnectionEvent::DescriptorRequest(request) => {
                    self.handle_descriptor_request(key, request)?
                }
                ConnectionEvent::ClearCache(clear) => self.handle_clear_cache(clear),
                ConnectionEvent::TypeImported(name) => {
                    log::debug!("[host] {} announced type '{}'", key, name);
                }
                ConnectionEvent::Regular(transmission) => {
                    // A guest without every key set would corrupt the cache.
                    transmission
                        .instance
                        .check_keys(transmission.header.attributes)
                        .map_err(ProtocolError::from)?;
                    self.route(Some(key), transmission);
                }
                ConnectionEvent::Hello(_) => {}
            }
        }
        Ok(())
    }

    fn handle_connect(&mut self, key: ConnectionKey, connect: DotsMsgConnect) -> Result<(), ConnectionError> {
        let Some(connection) = self.connections.get_mut(&key) else {
            return Err(ConnectionError::Closed);
        };
        let name = connect.client_name.unwrap_or_default();

        if let Some(nonce) = connection.auth_nonce() {
            let verified = match (connect.cnonce, connect.authentication_digest.as_deref()) {
                (Some(cnonce), Some(digest)) => {
                    self.auth.verify_authentication(&name, nonce, cnonce, digest)
                }
                _ => false,
            };
            if !verified {
                return Err(ConnectionError::AuthenticationFailed(name));
            }
        }

        let id = self.next_guest_id;
        self.next_guest_id += 1;
        connection.accept(
            &self.registry,
            id,
            &name,
            &self.config.server_name,
            connect.preload_cache.unwrap_or(true),
        )?;
        log::info!("[host] {} is guest #{} '{}'", key, id, name);
        self.publish_client(key, ConnectionState::EarlySubscribe);
        Ok(())
    }

    fn handle_member(&mut self, key: ConnectionKey, member: DotsMember) -> Result<(), ConnectionError> {
        match member.event {
            MemberEvent::Join => {
                self.send_cache_snapshot(key, &member.group_name)?;
                self.groups.entry(member.group_name.clone()).or_default().insert(key);
                log::debug!("[host] {} joined '{}'", key, member.group_name);
            }
            MemberEvent::Leave | MemberEvent::Kill => {
                if let Some(members) = self.groups.get_mut(&member.group_name) {
                    members.remove(&key);
                }
                log::debug!("[host] {} left '{}'", key, member.group_name);
            }
        }
        Ok(())
    }

    /// One synthetic update per cached instance, `from_cache` counting down
    /// to 0 on the last one.
    fn send_cache_snapshot(&mut self, key: ConnectionKey, group: &str) -> Result<(), ConnectionError> {
        let Some(container) = self.dispatcher.pool().get(group) else {
            return Ok(());
        };
        let Some(connection) = self.connections.get_mut(&key) else {
            return Err(ConnectionError::Closed);
        };

        let total = container.len() as u32;
        for (index, entry) in container.iter().enumerate() {
            let mut header = TransportHeader::new(group, entry.instance.valid_properties());
            header.sender = entry.info.last_publisher();
            header.server_sent_time = Some(TimePoint::now());
            header.from_cache = Some(total - 1 - index as u32);
            connection.transmit(&self.registry, &header, &entry.instance)?;
        }
        if total > 0 {
            log::debug!("[host] sent {} cached '{}' instance(s) to {}", total, group, key);
        }
        Ok(())
    }

    fn handle_descriptor_request(
        &mut self,
        key: ConnectionKey,
        request: DotsDescriptorRequest,
    ) -> Result<(), ConnectionError> {
        let names: Vec<String> = if request.type_names.is_empty() {
            self.registry
                .user_structs()
                .map(|d| d.name().to_owned())
                .collect()
        } else {
            request.type_names
        };

        let Some(connection) = self.connections.get_mut(&key) else {
            return Err(ConnectionError::Closed);
        };
        for name in names.iter().filter(|n| !request.blacklist.contains(n)) {
            if !self.registry.has_type(name) {
                return Err(ProtocolError::UnknownType(name.clone()).into());
            }
            connection.share_type(&self.registry, name)?;
        }
        Ok(())
    }

    fn handle_clear_cache(&mut self, clear: DotsClearCache) {
        for type_name in &clear.type_names {
            let removed = self.dispatcher.clear_cache(type_name, clear.origin);
            for entry in &removed {
                self.propagate_removal(type_name, entry);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Stamp, apply to the cache and forward to the destination group.
    fn route(&mut self, origin: Option<ConnectionKey>, mut transmission: Transmission) {
        let sender = match origin {
            Some(key) => self.connections.get(&key).map_or(HOST_ID, Connection::peer_id),
            None => transmission.header.sender.unwrap_or(HOST_ID),
        };
        transmission.header.sender = Some(sender);
        transmission.header.server_sent_time = Some(TimePoint::now());

        if let Err(e) = self.dispatcher.dispatch(&transmission) {
            log::warn!("[host] {}", e);
        }
        self.forward(origin, &transmission.header, &transmission.instance);
    }

    fn forward(&mut self, origin: Option<ConnectionKey>, header: &TransportHeader, instance: &Record) {
        let Some(members) = self.groups.get(&header.destination_group) else {
            return;
        };

        let mut failed = Vec::new();
        for key in members {
            if Some(*key) == origin && !self.config.echo_to_origin {
                continue;
            }
            let Some(connection) = self.connections.get_mut(key) else {
                continue;
            };
            if let Err(e) = connection.transmit(&self.registry, header, instance) {
                failed.push((*key, e));
            }
        }

        for (key, error) in failed {
            self.close_connection(key, Some(&error));
        }
    }

    fn propagate_removal(&mut self, type_name: &str, entry: &CacheEntry) {
        let keys = entry.instance.descriptor().key_properties();
        let mut header = TransportHeader::new(type_name, keys).with_remove(true);
        header.sender = entry.info.last_publisher();
        header.server_sent_time = Some(TimePoint::now());
        let instance = entry.instance.project(keys);
        self.forward(None, &header, &instance);
    }

    fn publish_client(&mut self, key: ConnectionKey, state: ConnectionState) {
        let Some(connection) = self.connections.get(&key) else {
            return;
        };
        let client = DotsClient {
            id: connection.peer_id(),
            name: Some(connection.peer_name().to_owned()),
            connection_state: Some(state),
        };
        self.publish_control(&client);
    }

    fn publish_control<T: ControlRecord>(&mut self, message: &T) {
        match message.encode(&self.registry) {
            Ok(record) => {
                self.route(None, Transmission::new(TransportHeader::for_record(&record), record));
            }
            Err(e) => log::warn!("[host] cannot encode {}: {}", T::NAME, e),
        }
    }

    /// Publish descriptions of types registered since the previous pass.
    fn announce_pending_types(&mut self) {
        let pending = std::mem::take(&mut *self.pending_types.lock());
        for descriptor in pending {
            match &descriptor {
                ValueDescriptor::Struct(d) if !d.internal() => {
                    self.publish_control(&StructDescriptorData::from_descriptor(d));
                }
                ValueDescriptor::Enum(d) if !control::is_builtin_type(d.name()) => {
                    self.publish_control(&EnumDescriptorData::from_descriptor(d));
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn fail(&mut self, key: ConnectionKey, error: &ConnectionError) {
        if let (Some(code), Some(connection)) = (error.peer_code(), self.connections.get_mut(&key)) {
            connection.send_error(&self.registry, code, &error.to_string());
        }
        self.close_connection(key, Some(error));
    }

    fn close_connection(&mut self, key: ConnectionKey, reason: Option<&ConnectionError>) {
        let Some(mut connection) = self.connections.remove(&key) else {
            return;
        };
        connection.close();
        for members in self.groups.values_mut() {
            members.remove(&key);
        }
        self.closed.push(key);

        let id = connection.peer_id();
        match reason {
            Some(e) => log::warn!("[host] {} (guest #{}) closed: {}", key, id, e),
            None => log::info!("[host] {} (guest #{}) closed", key, id),
        }
        if id < FIRST_GUEST_ID {
            return;
        }

        let cleanup_types: Vec<String> = self
            .dispatcher
            .pool()
            .iter()
            .filter(|c| c.descriptor().cleanup())
            .map(|c| c.descriptor().name().to_owned())
            .collect();
        for type_name in cleanup_types {
            let removed = self.dispatcher.clear_cache(&type_name, Some(id));
            for entry in &removed {
                self.propagate_removal(&type_name, entry);
            }
        }

        self.publish_control(&DotsClient {
            id,
            name: Some(connection.peer_name().to_owned()),
            connection_state: Some(ConnectionState::Closed),
        });
    }
}

impl std::fmt::Debug for HostTransceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTransceiver")
            .field("config", &self.config)
            .field("connections", &self.connections.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}
