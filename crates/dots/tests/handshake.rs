// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection lifecycle between a guest and the broker, step by step.

mod common;

use common::{guest, record_events, Network};
use dots::io::{ChannelError, ConnectionError, HostConfig, HostTransceiver, PublishError, SecretAuthManager};
use dots::protocol::{control, ConnectionState};
use dots::types::{PropertySet, Record, StructFlags};

/// Deliver pending broker frames to guest `index`.
fn to_guest(network: &mut Network, index: usize) -> usize {
    let peer = &mut network.peers[index];
    let frames = peer.to_guest.take_sent();
    let count = frames.len();
    for frame in frames {
        let _ = peer.guest.handle_receive(frame);
    }
    count
}

/// Deliver pending frames of guest `index` to the broker.
fn to_host(network: &mut Network, index: usize) -> usize {
    let peer = &mut network.peers[index];
    let frames = peer.to_host.take_sent();
    let count = frames.len();
    for frame in frames {
        let _ = network.host.handle_receive(peer.key, frame);
    }
    count
}

#[test]
fn test_handshake_states() {
    let mut network = Network::new();
    let c1 = network.open(guest("c1", StructFlags::CACHED), None);
    let key = network.peers[c1].key;

    assert_eq!(network.guest(c1).state(), ConnectionState::Connecting);
    assert_eq!(network.host.connection_state(key), Some(ConnectionState::Connecting));

    // Hello -> Connect
    assert_eq!(to_guest(&mut network, c1), 1);
    assert_eq!(to_host(&mut network, c1), 1);
    assert_eq!(network.host.connection_state(key), Some(ConnectionState::EarlySubscribe));

    // ConnectResponse -> preload finished
    to_guest(&mut network, c1);
    assert_eq!(network.guest(c1).state(), ConnectionState::EarlySubscribe);
    assert_eq!(network.guest(c1).client_id(), Some(2));
    to_host(&mut network, c1);
    assert_eq!(network.host.connection_state(key), Some(ConnectionState::Connected));

    to_guest(&mut network, c1);
    assert_eq!(network.guest(c1).state(), ConnectionState::Connected);
    assert_eq!(network.host.connection(key).unwrap().peer_name(), "c1");
}

#[test]
fn test_guest_ids_are_unique() {
    let mut network = Network::new();
    let ids: Vec<Option<u32>> = (0..3)
        .map(|i| {
            let index = network.connect(guest(&format!("c{}", i), StructFlags::CACHED));
            network.guest(index).client_id()
        })
        .collect();
    assert_eq!(ids, vec![Some(2), Some(3), Some(4)]);
}

#[test]
fn test_preload_subscriptions_joined_before_connected() {
    let mut network = Network::new();
    let c1 = network.connect(guest("c1", StructFlags::CACHED));
    let record = Record::new(network.guest(c1).registry().get_struct("Item").unwrap())
        .with("id", 1u32)
        .unwrap();
    network
        .guest(c1)
        .publish(&record, PropertySet::ALL, false)
        .unwrap();
    network.pump();

    let c2 = network.open_with_preload(guest("c2", StructFlags::CACHED), &["Item"], None);
    let seen = record_events(network.guest(c2), "Item");
    network.pump();

    let key = network.peers[c2].key;
    assert_eq!(network.host.group_members("Item"), vec![key]);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].from_cache, Some(0));
}

#[test]
fn test_publish_requires_connected() {
    let mut network = Network::new();
    let c1 = network.open(guest("c1", StructFlags::CACHED), None);
    let record = Record::new(network.guest(c1).registry().get_struct("Item").unwrap())
        .with("id", 1u32)
        .unwrap();

    let result = network.guest(c1).publish(&record, PropertySet::ALL, false);
    assert!(matches!(result, Err(PublishError::NotConnected)));

    network.pump();
    assert!(network.guest(c1).publish(&record, PropertySet::ALL, false).is_ok());
}

#[test]
fn test_transport_error_closes_without_dispatch() {
    let mut network = Network::new();
    let c1 = network.connect(guest("c1", StructFlags::CACHED));
    let c2 = network.connect(guest("c2", StructFlags::CACHED));
    let seen = record_events(network.guest(c2), "Item");
    network.pump();

    network.guest(c2).handle_error(ChannelError::Closed);
    assert_eq!(network.guest(c2).state(), ConnectionState::Closed);

    let record = Record::new(network.guest(c1).registry().get_struct("Item").unwrap())
        .with("id", 1u32)
        .unwrap();
    network
        .guest(c1)
        .publish(&record, PropertySet::ALL, false)
        .unwrap();
    network.pump();
    assert!(seen.lock().is_empty());

    // The broker side goes down on its own transport error.
    let key = network.peers[c2].key;
    network.host.handle_error(key, ChannelError::Closed);
    assert_eq!(network.host.connection_state(key), None);
    assert_eq!(network.host.drain_closed(), vec![key]);
}

#[test]
fn test_protocol_violation_reports_error_to_guest() {
    let mut network = Network::new();
    let c1 = network.connect(guest("c1", StructFlags::CACHED));
    let key = network.peers[c1].key;

    // A second connect request is out of sequence.
    let frame = {
        let registry = network.guest(c1).registry();
        let connect = dots::protocol::DotsMsgConnect {
            client_name: Some("c1".into()),
            ..Default::default()
        };
        let record = dots::protocol::ControlRecord::encode(&connect, registry).unwrap();
        dots::protocol::RawFrame::new(
            dots::protocol::TransportHeader::for_record(&record),
            record.as_record_ref(),
        )
    };
    assert!(network.host.handle_receive(key, frame).is_err());
    assert_eq!(network.host.connection_state(key), None);

    let frames = network.peers[c1].to_guest.take_sent();
    let error = frames
        .into_iter()
        .find(|f| f.header.type_name == control::MSG_ERROR)
        .unwrap();
    let result = network.guest(c1).handle_receive(error);
    assert!(matches!(result, Err(ConnectionError::Peer { .. })));
    assert_eq!(network.guest(c1).state(), ConnectionState::Closed);
}

fn authenticated_network() -> Network {
    let host = HostTransceiver::new(HostConfig::default())
        .unwrap()
        .with_auth(Box::new(SecretAuthManager::new("open sesame")));
    Network {
        host,
        peers: Vec::new(),
    }
}

#[test]
fn test_authentication_accepted() {
    let mut network = authenticated_network();
    let c1 = network.open(guest("c1", StructFlags::CACHED), Some("open sesame"));
    network.pump();

    assert_eq!(network.guest(c1).state(), ConnectionState::Connected);
    let key = network.peers[c1].key;
    assert!(network.host.connection(key).unwrap().auth_nonce().is_some());
}

#[test]
fn test_authentication_rejected() {
    let mut network = authenticated_network();
    let c1 = network.open(guest("c1", StructFlags::CACHED), Some("wrong"));
    let key = network.peers[c1].key;
    network.pump();

    assert_eq!(network.guest(c1).state(), ConnectionState::Closed);
    assert_eq!(network.host.connection_state(key), None);

    // Missing secret fails the same way.
    let c2 = network.open(guest("c2", StructFlags::CACHED), None);
    network.pump();
    assert_eq!(network.guest(c2).state(), ConnectionState::Closed);
}

#[test]
fn test_reopen_after_close() {
    let mut network = Network::new();
    let c1 = network.connect(guest("c1", StructFlags::CACHED));
    network.guest(c1).close();
    assert_eq!(network.guest(c1).state(), ConnectionState::Closed);

    // Reopen on a fresh pair of channels.
    let guest = network.peers.remove(c1).guest;
    let c1 = network.connect(guest);
    assert_eq!(network.guest(c1).state(), ConnectionState::Connected);
    assert_eq!(network.guest(c1).client_id(), Some(3));
}
