// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker network over memory channels.

#![allow(dead_code)]

use dots::io::{ConnectionKey, Event, GuestTransceiver, HostConfig, HostTransceiver, MemoryChannel, UpdateKind};
use dots::types::{FundamentalType, StructDescriptor, StructFlags};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Peer {
    pub guest: GuestTransceiver,
    pub key: ConnectionKey,
    /// Frames the guest sent to the broker.
    pub to_host: MemoryChannel,
    /// Frames the broker sent to the guest.
    pub to_guest: MemoryChannel,
}

pub struct Network {
    pub host: HostTransceiver,
    pub peers: Vec<Peer>,
}

impl Network {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        Self {
            host: HostTransceiver::new(config).unwrap(),
            peers: Vec::new(),
        }
    }

    /// Open a guest without running the handshake.
    pub fn open(&mut self, guest: GuestTransceiver, secret: Option<&str>) -> usize {
        self.open_with_preload(guest, &[], secret)
    }

    pub fn open_with_preload(&mut self, mut guest: GuestTransceiver, subscribe: &[&str], secret: Option<&str>) -> usize {
        let to_host = MemoryChannel::new(format!("{}->host", guest.name()));
        let to_guest = MemoryChannel::new(format!("host->{}", guest.name()));
        guest
            .open(Box::new(to_host.clone()), &[], subscribe, secret)
            .unwrap();
        let key = self.host.accept(Box::new(to_guest.clone())).unwrap();
        self.peers.push(Peer {
            guest,
            key,
            to_host,
            to_guest,
        });
        self.peers.len() - 1
    }

    /// Open a guest and run the handshake to completion.
    pub fn connect(&mut self, guest: GuestTransceiver) -> usize {
        let index = self.open(guest, None);
        self.pump();
        index
    }

    /// Deliver frames in both directions until every queue is empty.
    pub fn pump(&mut self) {
        loop {
            let mut delivered = false;
            for peer in &mut self.peers {
                for frame in peer.to_host.take_sent() {
                    let _ = self.host.handle_receive(peer.key, frame);
                    delivered = true;
                }
                for frame in peer.to_guest.take_sent() {
                    let _ = peer.guest.handle_receive(frame);
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }

    pub fn guest(&mut self, index: usize) -> &mut GuestTransceiver {
        &mut self.peers[index].guest
    }
}

/// Guest knowing the `Item` test type with the given flags.
pub fn guest(name: &str, flags: StructFlags) -> GuestTransceiver {
    let mut guest = GuestTransceiver::new(name).unwrap();
    guest.register_struct(item_type(flags)).unwrap();
    guest
}

pub fn item_type(flags: StructFlags) -> StructDescriptor {
    StructDescriptor::builder("Item")
        .flags(flags)
        .key_property("id", 1, FundamentalType::UInt32)
        .property("name", 2, FundamentalType::String)
        .property("count", 3, FundamentalType::Int32)
        .build()
        .unwrap()
}

/// What a subscriber saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub kind: UpdateKind,
    pub id: Option<u32>,
    pub from_cache: Option<u32>,
    pub sender: Option<u32>,
}

pub type SeenLog = Arc<Mutex<Vec<Seen>>>;

/// Subscribe `guest` to `type_name`, recording every event.
pub fn record_events(guest: &mut GuestTransceiver, type_name: &str) -> SeenLog {
    let log: SeenLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    guest
        .subscribe_events(
            type_name,
            Box::new(move |event: &Event| {
                sink.lock().push(Seen {
                    kind: event.kind,
                    id: event.instance.get_as("id"),
                    from_cache: event.header.from_cache,
                    sender: event.header.sender,
                });
                Ok(())
            }),
        )
        .unwrap();
    log
}
