// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # DOTS - Distributed Objects in Time and Space
//!
//! Typed publish/subscribe middleware with a central broker. Record types
//! are described at runtime, so guests exchange their type definitions
//! with the broker on first use instead of sharing generated code.
//!
//! ## Quick Start
//!
//! ```rust
//! use dots::io::{GuestTransceiver, MemoryChannel};
//! use dots::types::{FundamentalType, PropertySet, Record, StructDescriptor, StructFlags};
//!
//! let mut guest = GuestTransceiver::new("sensor-app").unwrap();
//! let reading = guest
//!     .register_struct(
//!         StructDescriptor::builder("SensorReading")
//!             .flags(StructFlags::CACHED)
//!             .key_property("sensor_id", 1, FundamentalType::UInt32)
//!             .property("temperature", 2, FundamentalType::Float64)
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! // A real runtime passes a `tcp::TcpChannel` and feeds received frames
//! // to `handle_receive`.
//! guest.open(Box::new(MemoryChannel::new("broker")), &[], &["SensorReading"], None).unwrap();
//!
//! let record = Record::new(reading).with("sensor_id", 7u32).unwrap();
//! // Not accepted by a broker yet.
//! assert!(guest.publish(&record, PropertySet::ALL, false).is_err());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                     HostTransceiver / GuestTransceiver              |
//! |   groups | cache (Dispatcher + Containers) | subscriptions          |
//! +---------------------------------------------------------------------+
//! |                             Connection                              |
//! |   handshake state machine | lazy type sharing | frame classification|
//! +---------------------------------------------------------------------+
//! |                         Protocol / Channel                          |
//! |   TransportHeader | JSON record codec | control types | TCP, memory |
//! +---------------------------------------------------------------------+
//! |                               Types                                 |
//! |   PropertySet | descriptors + layout | Record | Registry            |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`types`] - Runtime type system and records
//! - [`protocol`] - Frame header, codec and built-in control types
//! - [`io`] - Connections, caches, transceivers and transports

pub mod io;
pub mod protocol;
pub mod types;

pub use io::{
    Channel, ConnectionError, Event, GuestTransceiver, HostConfig, HostTransceiver, PublishError,
    Subscription, TransceiverError,
};
pub use protocol::{ConnectionState, RawFrame, Transmission, TransportHeader};
pub use types::{PropertySet, Record, Registry, StructDescriptor, StructFlags, Value};
