// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery of received transmissions to local subscribers.
//!
//! Cached types go through a [`Container`](super::container::Container)
//! and produce created/updated/removed events; other types produce
//! transient events. Handler failures do not stop delivery to the other
//! handlers; they are collected and returned as one [`DispatchError`].

use super::container::{CacheEntry, CloneInfo, ContainerPool, UpdateKind};
use crate::protocol::{Transmission, TransportHeader};
use crate::types::{PropertySet, Record, RecordError};
use std::collections::HashMap;
use thiserror::Error;

/// Failure reported by a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cache update of '{type_name}' failed: {source}")]
    Cache {
        type_name: String,
        #[source]
        source: RecordError,
    },

    #[error("{} handler(s) failed on '{type_name}': {}", .failures.len(), join(.failures))]
    Handlers {
        type_name: String,
        failures: Vec<HandlerError>,
    },
}

fn join(failures: &[HandlerError]) -> String {
    failures
        .iter()
        .map(|f| f.0.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Structured notification about one instance.
#[derive(Debug, Clone)]
pub struct Event {
    pub header: TransportHeader,
    pub kind: UpdateKind,
    /// Cached types: the stored state after the update. Otherwise the
    /// received instance.
    pub instance: Record,
    /// Properties the update changed.
    pub updated: PropertySet,
    /// Cache bookkeeping, for cached types only.
    pub clone_info: Option<CloneInfo>,
}

impl Event {
    pub fn is_create(&self) -> bool {
        self.kind == UpdateKind::Created
    }

    pub fn is_update(&self) -> bool {
        self.kind == UpdateKind::Updated
    }

    pub fn is_remove(&self) -> bool {
        self.kind == UpdateKind::Removed
    }

    /// Whether the update was part of a cache snapshot.
    pub fn from_cache(&self) -> bool {
        self.header.from_cache.is_some()
    }
}

pub type EventHandler = Box<dyn FnMut(&Event) -> Result<(), HandlerError> + Send>;
pub type TransmissionHandler = Box<dyn FnMut(&Transmission) -> Result<(), HandlerError> + Send>;

/// Handle returned by a subscribe call. Pass it to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    type_name: String,
    id: u64,
}

impl Subscription {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

enum Handler {
    Event(EventHandler),
    Transmission(TransmissionHandler),
}

#[derive(Default)]
pub struct Dispatcher {
    pool: ContainerPool,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    next_id: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &ContainerPool {
        &self.pool
    }

    pub fn subscribe_events(&mut self, type_name: &str, handler: EventHandler) -> Subscription {
        self.add(type_name, Handler::Event(handler))
    }

    pub fn subscribe_transmissions(
        &mut self,
        type_name: &str,
        handler: TransmissionHandler,
    ) -> Subscription {
        self.add(type_name, Handler::Transmission(handler))
    }

    fn add(&mut self, type_name: &str, handler: Handler) -> Subscription {
        self.next_id += 1;
        let id = self.next_id;
        self.handlers
            .entry(type_name.to_owned())
            .or_default()
            .push((id, handler));
        log::debug!("[dispatcher] subscribed #{} to '{}'", id, type_name);
        Subscription {
            type_name: type_name.to_owned(),
            id,
        }
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        let Some(handlers) = self.handlers.get_mut(&subscription.type_name) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.handlers.remove(&subscription.type_name);
        }
        removed
    }

    pub fn num_subscriptions(&self, type_name: &str) -> usize {
        self.handlers.get(type_name).map_or(0, Vec::len)
    }

    /// Types with at least one handler.
    pub fn subscribed_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Apply a transmission to the cache and notify its subscribers.
    pub fn dispatch(&mut self, transmission: &Transmission) -> Result<(), DispatchError> {
        let type_name = transmission.header.type_name.as_str();
        let descriptor = transmission.instance.descriptor();

        let event = if descriptor.cached() {
            let update = self
                .pool
                .get_or_create(descriptor)
                .insert(&transmission.header, &transmission.instance)
                .map_err(|source| DispatchError::Cache {
                    type_name: type_name.to_owned(),
                    source,
                })?;
            update.map(|update| Event {
                header: transmission.header.clone(),
                kind: update.kind,
                instance: update.entry.instance,
                updated: update.updated,
                clone_info: Some(update.entry.info),
            })
        } else {
            Some(Event {
                header: transmission.header.clone(),
                kind: if transmission.header.remove {
                    UpdateKind::Removed
                } else {
                    UpdateKind::Created
                },
                instance: transmission.instance.clone(),
                updated: transmission.instance.valid_properties(),
                clone_info: None,
            })
        };

        self.notify(type_name, Some(transmission), event.as_ref())
    }

    /// Remove cached instances of `type_name`, optionally only those last
    /// written by `origin`, and notify subscribers of each removal.
    ///
    /// The removed entries are returned even when a handler fails; failures
    /// are logged.
    pub fn clear_cache(&mut self, type_name: &str, origin: Option<u32>) -> Vec<CacheEntry> {
        self.remove_cached(type_name, |entry| {
            origin.map_or(true, |origin| entry.info.last_publisher() == Some(origin))
        })
    }

    /// Remove cached instances of `type_name` matching `predicate` and notify
    /// subscribers of each removal.
    pub fn remove_cached(
        &mut self,
        type_name: &str,
        predicate: impl FnMut(&CacheEntry) -> bool,
    ) -> Vec<CacheEntry> {
        let Some(container) = self.pool.get_mut(type_name) else {
            return Vec::new();
        };
        let removed = container.remove_where(predicate);

        for entry in &removed {
            let mut info = entry.info.clone();
            info.last_operation = UpdateKind::Removed;
            let event = Event {
                header: TransportHeader::new(type_name, entry.instance.descriptor().key_properties())
                    .with_remove(true),
                kind: UpdateKind::Removed,
                instance: entry.instance.clone(),
                updated: entry.instance.valid_properties(),
                clone_info: Some(info),
            };
            if let Err(e) = self.notify(type_name, None, Some(&event)) {
                log::warn!("[dispatcher] clearing '{}': {}", type_name, e);
            }
        }
        if !removed.is_empty() {
            log::debug!(
                "[dispatcher] cleared {} instance(s) of '{}'",
                removed.len(),
                type_name
            );
        }
        removed
    }

    fn notify(
        &mut self,
        type_name: &str,
        transmission: Option<&Transmission>,
        event: Option<&Event>,
    ) -> Result<(), DispatchError> {
        let Some(handlers) = self.handlers.get_mut(type_name) else {
            return Ok(());
        };

        let mut failures = Vec::new();
        for (_, handler) in handlers.iter_mut() {
            let result = match (handler, transmission, event) {
                (Handler::Event(h), _, Some(event)) => h(event),
                (Handler::Transmission(h), Some(transmission), _) => h(transmission),
                _ => Ok(()),
            };
            if let Err(e) = result {
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Handlers {
                type_name: type_name.to_owned(),
                failures,
            })
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pool", &self.pool)
            .field("subscribed", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
