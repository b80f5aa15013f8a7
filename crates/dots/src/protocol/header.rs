// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame header.

use crate::types::{PropertySet, Record, TimePoint};
use serde::{Deserialize, Serialize};

/// Namespace of middleware control types.
pub const SYSTEM_NAMESPACE: &str = "SYS";

/// Metadata travelling in front of every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportHeader {
    /// Group (topic) the frame is published on.
    pub destination_group: String,
    pub type_name: String,
    pub sent_time: TimePoint,
    /// Properties carried by the payload.
    pub attributes: PropertySet,
    #[serde(default, skip_serializing_if = "is_false")]
    pub remove: bool,
    /// Connection id of the publisher, stamped by the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_sent_time: Option<TimePoint>,
    /// Remaining number of cache snapshot frames, counting down to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TransportHeader {
    /// Header for publishing `attributes` of a `type_name` instance on the
    /// type's own group.
    pub fn new(type_name: impl Into<String>, attributes: PropertySet) -> Self {
        let type_name = type_name.into();
        Self {
            destination_group: type_name.clone(),
            type_name,
            sent_time: TimePoint::now(),
            attributes,
            ..Self::default()
        }
    }

    /// Header for a full-record publication of `record`.
    pub fn for_record(record: &Record) -> Self {
        let mut header = Self::new(record.type_name(), record.valid_properties());
        if record.descriptor().internal() {
            header.namespace = Some(SYSTEM_NAMESPACE.to_owned());
        }
        header
    }

    pub fn with_remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    pub fn is_system(&self) -> bool {
        self.namespace.as_deref() == Some(SYSTEM_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_defaults_skip_optional() {
        let header = TransportHeader::new("Foo", PropertySet::from_value(0b110));
        let json = serde_json::to_value(&header).unwrap();

        assert_eq!(json["destination_group"], "Foo");
        assert_eq!(json["attributes"], 6);
        assert!(json.get("remove").is_none());
        assert!(json.get("sender").is_none());
    }

    #[test]
    fn test_header_deserialize_minimal() {
        let header: TransportHeader = serde_json::from_str(
            r#"{"destination_group":"Foo","type_name":"Foo","sent_time":1.5,"attributes":3}"#,
        )
        .unwrap();

        assert_eq!(header.sent_time, TimePoint(1.5));
        assert!(!header.remove);
        assert!(!header.is_system());
        assert_eq!(header.from_cache, None);
    }
}
