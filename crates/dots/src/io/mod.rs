// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connections, caches and transceivers.
//!
//! # Architecture
//!
//! ```text
//! HostTransceiver (broker)                 GuestTransceiver (client)
//!   ├── Registry                             ├── Registry
//!   ├── Dispatcher ── ContainerPool          ├── Dispatcher ── ContainerPool
//!   ├── groups: name → {ConnectionKey}       └── Connection ── Channel
//!   └── connections: ConnectionKey → Connection ── Channel
//! ```
//!
//! Transceivers are plain values driven by a runtime: it passes them
//! channels, inbound frames and transport errors, and calls housekeeping on
//! a timer. [`tcp`] provides the tokio socket runtime pieces.

pub mod auth;
pub mod channel;
pub mod connection;
pub mod container;
pub mod dispatcher;
pub mod guest;
pub mod host;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use auth::{auth_digest, AuthManager, NoAuthentication, SecretAuthManager};
pub use channel::{Channel, ChannelError, ChannelEvent, MemoryChannel};
pub use connection::{
    Connection, ConnectionError, ConnectionEvent, Role, FIRST_GUEST_ID, HOST_ID, UNINITIALIZED_ID,
};
pub use container::{CacheEntry, CloneInfo, Container, ContainerPool, UpdateKind};
pub use dispatcher::{
    DispatchError, Dispatcher, Event, EventHandler, HandlerError, Subscription, TransmissionHandler,
};
pub use guest::GuestTransceiver;
pub use host::{ConnectionKey, HostConfig, HostTransceiver};

use crate::protocol::ProtocolError;
use crate::types::{PropertySet, Record, RecordError, RegistryError};
use thiserror::Error;

/// Rejected publication or subscription. Nothing was sent.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("'{0}' is a substruct-only type")]
    SubstructOnly(String),

    #[error("'{type_name}' publication lacks key properties {missing}")]
    InvalidKey {
        type_name: String,
        missing: PropertySet,
    },

    #[error("'{0}' is a local-only type")]
    LocalOnly(String),

    #[error("not connected")]
    NotConnected,

    #[error("type '{0}' is not registered")]
    UnknownType(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Error)]
pub enum TransceiverError {
    #[error("transceiver is already open")]
    AlreadyOpen,

    #[error("transceiver is not open")]
    NotOpen,

    #[error("no random source for the authentication challenge")]
    NonceUnavailable,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Checks shared by every publish path: substruct-only types are never
/// published and the key properties must be included and present.
fn validate_publication(record: &Record, included: PropertySet) -> Result<(), PublishError> {
    let descriptor = record.descriptor();
    if descriptor.substruct_only() {
        return Err(PublishError::SubstructOnly(descriptor.name().to_owned()));
    }
    let keys = descriptor.key_properties();
    let missing = keys - (included & record.valid_properties());
    if !missing.is_empty() {
        return Err(PublishError::InvalidKey {
            type_name: descriptor.name().to_owned(),
            missing,
        });
    }
    Ok(())
}
