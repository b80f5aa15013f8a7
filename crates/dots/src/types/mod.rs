// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime-described record types
//!
//! Every record type is described at runtime, so peers can exchange types
//! the broker was never compiled against.
//!
//! # Features
//!
//! - **PropertySet**: 32-bit presence / selection mask
//! - **StructDescriptor**: Properties, tags, flags and instance layout
//! - **Record**: Descriptor-sized instance with per-property presence
//! - **Generic operations**: assign, copy, merge, swap, clear, equal, less, diff
//! - **Registry**: Name → descriptor directory with a registration hook
//!
//! # Example
//!
//! ```rust
//! use dots::types::{FundamentalType, PropertySet, Record, StructDescriptor};
//! use std::sync::Arc;
//!
//! let descriptor = Arc::new(
//!     StructDescriptor::builder("SensorReading")
//!         .key_property("sensor_id", 1, FundamentalType::UInt32)
//!         .property("temperature", 2, FundamentalType::Float64)
//!         .build()
//!         .unwrap(),
//! );
//!
//! let mut reading = Record::new(descriptor.clone());
//! reading.set("sensor_id", 42u32).unwrap();
//! reading.set("temperature", 23.5f64).unwrap();
//!
//! let mut copy = Record::new(descriptor);
//! copy.assign(&reading, PropertySet::ALL).unwrap();
//! assert!(copy.same(&reading));
//! assert_eq!(copy.get_as::<f64>("temperature"), Some(23.5));
//! ```

mod area;
mod descriptor;
mod property_set;
mod record;
mod registry;
mod value;

pub use descriptor::{
    DescriptorError, EnumDescriptor, EnumElement, FundamentalType, PropertyDescriptor,
    StructDescriptor, StructDescriptorBuilder, StructFlags, ValueDescriptor, VectorDescriptor,
    PRESENCE_SIZE,
};
pub use property_set::{PropertySet, Tags};
pub use record::{Record, RecordError, RecordRef};
pub use registry::{NewTypeHandler, Registry, RegistryError};
pub use value::{FromValueRef, TimePoint, Uuid, Value, ValueRef};

#[cfg(test)]
mod tests;
