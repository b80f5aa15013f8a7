// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client side transceiver.
//!
//! Holds at most one connection to a broker. Subscriptions made before the
//! connection allows it are joined when the broker accepts the guest.

use super::auth::{auth_digest, generate_nonce};
use super::channel::{Channel, ChannelError};
use super::connection::{Connection, ConnectionError, ConnectionEvent, Role};
use super::dispatcher::{Dispatcher, EventHandler, Subscription, TransmissionHandler};
use super::{validate_publication, PublishError, TransceiverError};
use crate::protocol::{
    register_builtin_types, ConnectionState, ControlRecord, DotsClearCache, DotsDescriptorRequest,
    DotsMember, DotsMsgConnect, DotsMsgHello, RawFrame, Transmission, TransportHeader,
};
use crate::types::{PropertySet, Record, Registry, StructDescriptor, ValueDescriptor};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct GuestTransceiver {
    name: String,
    registry: Registry,
    dispatcher: Dispatcher,
    connection: Option<Connection>,
    preload_publish_types: Vec<String>,
    preload_subscribe_types: Vec<String>,
    auth_secret: Option<String>,
    /// Groups joined on the current connection.
    joined: BTreeSet<String>,
}

impl GuestTransceiver {
    pub fn new(name: impl Into<String>) -> Result<Self, TransceiverError> {
        let mut registry = Registry::new();
        register_builtin_types(&mut registry)?;
        Ok(Self {
            name: name.into(),
            registry,
            dispatcher: Dispatcher::new(),
            connection: None,
            preload_publish_types: Vec::new(),
            preload_subscribe_types: Vec::new(),
            auth_secret: None,
            joined: BTreeSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// `Closed` when no connection is open.
    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Closed, Connection::state)
    }

    /// Id assigned by the broker, once accepted.
    pub fn client_id(&self) -> Option<u32> {
        self.connection
            .as_ref()
            .map(Connection::self_id)
            .filter(|id| *id != 0)
    }

    pub fn register_type(&mut self, descriptor: ValueDescriptor) -> Result<ValueDescriptor, TransceiverError> {
        Ok(self.registry.register(descriptor, false)?)
    }

    pub fn register_struct(&mut self, descriptor: StructDescriptor) -> Result<Arc<StructDescriptor>, TransceiverError> {
        Ok(self.registry.register_struct(descriptor, false)?)
    }

    /// Start the handshake on `channel`.
    ///
    /// Descriptors of `preload_publish_types` and `preload_subscribe_types`
    /// are announced, and the latter joined, before the guest reports its
    /// preload as finished.
    pub fn open(
        &mut self,
        channel: Box<dyn Channel>,
        preload_publish_types: &[&str],
        preload_subscribe_types: &[&str],
        auth_secret: Option<&str>,
    ) -> Result<(), TransceiverError> {
        if self.connection.is_some() {
            return Err(TransceiverError::AlreadyOpen);
        }
        for name in preload_publish_types.iter().chain(preload_subscribe_types) {
            if !self.registry.has_type(name) {
                return Err(PublishError::UnknownType((*name).to_owned()).into());
            }
        }

        log::info!("[guest] '{}' opening {}", self.name, channel.peer_description());
        self.preload_publish_types = preload_publish_types.iter().map(|s| (*s).to_owned()).collect();
        self.preload_subscribe_types = preload_subscribe_types.iter().map(|s| (*s).to_owned()).collect();
        self.auth_secret = auth_secret.map(str::to_owned);
        self.joined.clear();
        self.connection = Some(Connection::new(channel, Role::Guest));
        Ok(())
    }

    /// Close the connection, if any.
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            log::info!("[guest] '{}' closed", self.name);
        }
    }

    /// Process one frame from the broker.
    ///
    /// Session errors close the connection. Subscriber failures are
    /// returned as [`ConnectionError::Dispatch`] and leave it open.
    pub fn handle_receive(&mut self, frame: RawFrame) -> Result<(), ConnectionError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        let events = match connection.handle_receive(&mut self.registry, &frame) {
            Ok(events) => events,
            Err(e) => return Err(self.fail(e)),
        };

        let mut dispatch_error = None;
        for event in events {
            let result = match event {
                ConnectionEvent::Hello(hello) => self.send_connect(hello),
                ConnectionEvent::Transition(ConnectionState::EarlySubscribe) => self.send_preload(),
                ConnectionEvent::Transition(state) => {
                    log::info!("[guest] '{}' is {}", self.name, state);
                    Ok(())
                }
                ConnectionEvent::Regular(transmission) => {
                    if let Err(e) = self.dispatcher.dispatch(&transmission) {
                        log::warn!("[guest] {}", e);
                        dispatch_error = Some(e);
                    }
                    Ok(())
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                return Err(self.fail(e));
            }
        }

        match dispatch_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Transport failure.
    pub fn handle_error(&mut self, error: ChannelError) {
        let _ = self.fail(ConnectionError::Channel(error));
    }

    fn fail(&mut self, error: ConnectionError) -> ConnectionError {
        log::error!("[guest] '{}' connection error: {}", self.name, error);
        self.close();
        error
    }

    fn send_connect(&mut self, hello: DotsMsgHello) -> Result<(), ConnectionError> {
        let mut connect = DotsMsgConnect {
            client_name: Some(self.name.clone()),
            preload_cache: Some(true),
            ..Default::default()
        };
        match (hello.auth_challenge, self.auth_secret.as_deref()) {
            (Some(nonce), Some(secret)) => {
                let cnonce = generate_nonce().unwrap_or_default();
                connect.cnonce = Some(cnonce);
                connect.authentication_digest = Some(auth_digest(nonce, cnonce, &self.name, secret));
            }
            (Some(_), None) => {
                log::warn!("[guest] '{}' has no secret for authentication", self.name);
            }
            _ => {}
        }
        self.connection
            .as_mut()
            .ok_or(ConnectionError::Closed)?
            .transmit_control(&self.registry, &connect)
    }

    fn send_preload(&mut self) -> Result<(), ConnectionError> {
        let mut groups: BTreeSet<String> = self.preload_subscribe_types.drain(..).collect();
        groups.extend(
            self.dispatcher
                .subscribed_types()
                .filter(|name| !self.is_local(name))
                .map(str::to_owned),
        );
        let publish_types = std::mem::take(&mut self.preload_publish_types);

        let connection = self.connection.as_mut().ok_or(ConnectionError::Closed)?;
        for name in &publish_types {
            connection.share_type(&self.registry, name)?;
        }
        for name in &groups {
            connection.share_type(&self.registry, name)?;
            connection.transmit_control(&self.registry, &DotsMember::join(name.as_str()))?;
        }
        connection.send_preload_finished(&self.registry)?;
        log::debug!("[guest] '{}' preloaded {} group(s)", self.name, groups.len());
        self.joined = groups;
        Ok(())
    }

    fn is_local(&self, type_name: &str) -> bool {
        self.registry
            .find_struct(type_name)
            .is_some_and(|d| d.local())
    }

    fn can_join(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::EarlySubscribe | ConnectionState::Connected
        )
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publish the `included` properties of `record`, or its removal.
    ///
    /// Local-only types are dispatched locally and never transmitted.
    pub fn publish(&mut self, record: &Record, included: PropertySet, remove: bool) -> Result<(), PublishError> {
        validate_publication(record, included)?;

        let attributes = included & record.valid_properties();
        let mut header = TransportHeader::new(record.type_name(), attributes).with_remove(remove);

        if record.descriptor().local() {
            header.sender = self.client_id();
            let transmission = Transmission::new(header, record.project(attributes));
            self.dispatcher.dispatch(&transmission)?;
            return Ok(());
        }

        if self.state() != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }
        let result = self
            .connection
            .as_mut()
            .ok_or(ConnectionError::Closed)
            .and_then(|c| c.transmit(&self.registry, &header, record));
        result.map_err(|e| self.fail(e).into())
    }

    /// Ask the broker to drop cached instances of `type_name`, optionally
    /// only those last written by `origin`.
    pub fn clear_remote_cache(&mut self, type_name: &str, origin: Option<u32>) -> Result<(), PublishError> {
        if self.is_local(type_name) {
            return Err(PublishError::LocalOnly(type_name.to_owned()));
        }
        let clear = DotsClearCache {
            type_names: vec![type_name.to_owned()],
            origin,
        };
        self.send_control(&clear)
    }

    /// Ask the broker for type descriptions. An empty list requests every
    /// type it knows.
    pub fn request_descriptors(&mut self, type_names: &[&str]) -> Result<(), PublishError> {
        let request = DotsDescriptorRequest {
            type_names: type_names.iter().map(|s| (*s).to_owned()).collect(),
            blacklist: self.registry.user_structs().map(|d| d.name().to_owned()).collect(),
        };
        self.send_control(&request)
    }

    fn send_control<T: ControlRecord>(&mut self, message: &T) -> Result<(), PublishError> {
        if !self.can_join() {
            return Err(PublishError::NotConnected);
        }
        let result = self
            .connection
            .as_mut()
            .ok_or(ConnectionError::Closed)
            .and_then(|c| c.transmit_control(&self.registry, message));
        result.map_err(|e| self.fail(e).into())
    }

    // -----------------------------------------------------------------------
    // Subscribing
    // -----------------------------------------------------------------------

    pub fn subscribe_events(&mut self, type_name: &str, handler: EventHandler) -> Result<Subscription, PublishError> {
        self.check_subscribable(type_name)?;
        let subscription = self.dispatcher.subscribe_events(type_name, handler);
        self.join(subscription)
    }

    pub fn subscribe_transmissions(
        &mut self,
        type_name: &str,
        handler: TransmissionHandler,
    ) -> Result<Subscription, PublishError> {
        self.check_subscribable(type_name)?;
        let subscription = self.dispatcher.subscribe_transmissions(type_name, handler);
        self.join(subscription)
    }

    /// Remove a handler. The group is left with its last handler.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> Result<bool, PublishError> {
        let type_name = subscription.type_name();
        if !self.dispatcher.unsubscribe(subscription) {
            return Ok(false);
        }
        if self.dispatcher.num_subscriptions(type_name) == 0 && self.joined.remove(type_name) && self.can_join() {
            self.send_control(&DotsMember::leave(type_name))?;
        }
        Ok(true)
    }

    fn check_subscribable(&self, type_name: &str) -> Result<(), PublishError> {
        let descriptor = self
            .registry
            .find_struct(type_name)
            .ok_or_else(|| PublishError::UnknownType(type_name.to_owned()))?;
        if descriptor.substruct_only() {
            return Err(PublishError::SubstructOnly(type_name.to_owned()));
        }
        Ok(())
    }

    /// Join the group of a new subscription if the connection allows it.
    /// Otherwise the join happens during preload.
    fn join(&mut self, subscription: Subscription) -> Result<Subscription, PublishError> {
        let type_name = subscription.type_name().to_owned();
        if self.joined.contains(&type_name) || self.is_local(&type_name) || !self.can_join() {
            return Ok(subscription);
        }

        let result = self.connection.as_mut().ok_or(ConnectionError::Closed).and_then(|c| {
            c.share_type(&self.registry, &type_name)?;
            c.transmit_control(&self.registry, &DotsMember::join(type_name.as_str()))
        });
        match result {
            Ok(()) => {
                log::debug!("[guest] '{}' joined '{}'", self.name, type_name);
                self.joined.insert(type_name);
                Ok(subscription)
            }
            Err(e) => {
                self.dispatcher.unsubscribe(&subscription);
                Err(self.fail(e).into())
            }
        }
    }
}

impl std::fmt::Debug for GuestTransceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestTransceiver")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .field("joined", &self.joined)
            .finish()
    }
}
