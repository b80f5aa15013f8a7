// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec.
//!
//! Simple length-prefixed JSON frames:
//! ```text
//! +----------------+-----------------------------------------+
//! | Length (4B BE) | {"header": {...}, "payload": {...}}     |
//! +----------------+-----------------------------------------+
//! ```
//!
//! The payload maps property names to values. Only properties that are both
//! included and present are written. Enums travel as enumerator names,
//! nested records as objects, vectors as arrays, property sets as integers
//! and uuids as hex strings. NaN and infinities become `"NaN"`, `"inf"` and
//! `"-inf"`.

use crate::protocol::header::TransportHeader;
use crate::protocol::ProtocolError;
use crate::types::{
    FundamentalType, PropertySet, Record, RecordError, RecordRef, Registry, StructDescriptor,
    TimePoint, Uuid, Value, ValueDescriptor, ValueRef,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::sync::Arc;
use thiserror::Error;

/// Size of the length prefix.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Default upper bound for a frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty frame")]
    EmptyFrame,

    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid value for '{type_name}': {reason}")]
    InvalidValue { type_name: String, reason: String },

    #[error("type '{type_name}' has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Frame whose payload has not been decoded against a registry yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub header: TransportHeader,
    #[serde(default)]
    pub payload: Json,
}

/// Frame decoded into a record instance.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub header: TransportHeader,
    pub instance: Record,
}

impl RawFrame {
    /// Serialize the `header.attributes` subset of `record`.
    pub fn new(header: TransportHeader, record: RecordRef<'_>) -> Self {
        let payload = record_to_json(record, header.attributes);
        Self { header, payload }
    }

    /// Decode the payload with the type named in the header.
    pub fn decode(&self, registry: &Registry) -> Result<Transmission, ProtocolError> {
        let descriptor = registry
            .find_struct(&self.header.type_name)
            .ok_or_else(|| ProtocolError::UnknownType(self.header.type_name.clone()))?;
        let instance = record_from_json(descriptor, &self.payload)?;
        Ok(Transmission {
            header: self.header.clone(),
            instance,
        })
    }

    /// Length-prefixed wire bytes.
    pub fn encode(&self, max_size: usize) -> Result<Vec<u8>, CodecError> {
        let body = serde_json::to_vec(self)?;
        if body.len() > max_size {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: max_size,
            });
        }

        let mut out = Vec::with_capacity(FRAME_PREFIX_LEN + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse a frame body (without its length prefix).
    pub fn decode_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.is_empty() {
            return Err(CodecError::EmptyFrame);
        }
        Ok(serde_json::from_slice(body)?)
    }
}

impl Transmission {
    pub fn new(header: TransportHeader, instance: Record) -> Self {
        Self { header, instance }
    }

    /// Re-encode for forwarding.
    pub fn to_raw(&self) -> RawFrame {
        RawFrame::new(self.header.clone(), self.instance.as_record_ref())
    }
}

/// Validate a length prefix.
pub fn check_frame_len(len: usize, max_size: usize) -> Result<(), CodecError> {
    if len == 0 {
        return Err(CodecError::EmptyFrame);
    }
    if len > max_size {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }
    Ok(())
}

/// JSON object holding `included ∩ present` properties of `record`.
pub fn record_to_json(record: RecordRef<'_>, included: PropertySet) -> Json {
    let mut map = Map::new();
    for (p, value) in record.values() {
        if included.contains(p.tag()) {
            map.insert(p.name().to_owned(), value_to_json(value, p.value_type()));
        }
    }
    Json::Object(map)
}

pub fn value_to_json(value: ValueRef<'_>, value_type: &ValueDescriptor) -> Json {
    match (value, value_type) {
        (ValueRef::Bool(v), _) => Json::from(v),
        (ValueRef::Int8(v), _) => Json::from(v),
        (ValueRef::UInt8(v), _) => Json::from(v),
        (ValueRef::Int16(v), _) => Json::from(v),
        (ValueRef::UInt16(v), _) => Json::from(v),
        (ValueRef::Int32(v), _) => Json::from(v),
        (ValueRef::UInt32(v), _) => Json::from(v),
        (ValueRef::Int64(v), _) => Json::from(v),
        (ValueRef::UInt64(v), _) => Json::from(v),
        (ValueRef::Float32(v), _) => float_to_json(f64::from(v)),
        (ValueRef::Float64(v), _) | (ValueRef::Duration(v), _) => float_to_json(v),
        (ValueRef::TimePoint(v), _) => float_to_json(v.0),
        (ValueRef::PropertySet(v), _) => Json::from(v.value()),
        (ValueRef::Uuid(v), _) => Json::from(v.to_string()),
        (ValueRef::String(v), _) => Json::from(v),
        (ValueRef::Enum(v), ValueDescriptor::Enum(d)) => match d.element_by_value(v) {
            Some(e) => Json::from(e.name.as_str()),
            None => Json::from(v),
        },
        (ValueRef::Enum(v), _) => Json::from(v),
        (ValueRef::Vector(elements), ValueDescriptor::Vector(d)) => Json::Array(
            elements
                .iter()
                .map(|e| value_to_json(e.as_value_ref(), d.value_type()))
                .collect(),
        ),
        (ValueRef::Vector(elements), other) => Json::Array(
            elements
                .iter()
                .map(|e| value_to_json(e.as_value_ref(), other))
                .collect(),
        ),
        (ValueRef::Struct(r), _) => record_to_json(r, PropertySet::ALL),
    }
}

/// Build a record from a JSON object.
pub fn record_from_json(
    descriptor: &Arc<StructDescriptor>,
    json: &Json,
) -> Result<Record, CodecError> {
    let mut record = Record::new(descriptor.clone());
    let object = match json {
        Json::Object(map) => map,
        Json::Null => return Ok(record),
        _ => return Err(invalid(descriptor.name(), "expected an object")),
    };

    for (name, value) in object {
        let p = descriptor
            .property(name)
            .ok_or_else(|| CodecError::UnknownProperty {
                type_name: descriptor.name().to_owned(),
                property: name.clone(),
            })?;
        let value = value_from_json(p.value_type(), value)?;
        record.set(name, value)?;
    }
    Ok(record)
}

pub fn value_from_json(value_type: &ValueDescriptor, json: &Json) -> Result<Value, CodecError> {
    let type_name = value_type.name();
    match value_type {
        ValueDescriptor::Fundamental(t) => fundamental_from_json(*t, json),
        ValueDescriptor::Enum(d) => {
            let element = match json {
                Json::String(name) => d.element_by_name(name),
                Json::Number(n) => n
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .and_then(|v| d.element_by_value(v)),
                _ => None,
            };
            element
                .map(|e| Value::Enum(e.value))
                .ok_or_else(|| invalid(type_name, format!("unknown enumerator {}", json)))
        }
        ValueDescriptor::Vector(d) => {
            let elements = json
                .as_array()
                .ok_or_else(|| invalid(type_name, "expected an array"))?;
            elements
                .iter()
                .map(|e| value_from_json(d.value_type(), e))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Vector)
        }
        ValueDescriptor::Struct(d) => record_from_json(d, json).map(Value::Struct),
    }
}

fn fundamental_from_json(t: FundamentalType, json: &Json) -> Result<Value, CodecError> {
    let value = match t {
        FundamentalType::Bool => json.as_bool().map(Value::Bool),
        FundamentalType::Int8 => int(json).map(Value::Int8),
        FundamentalType::UInt8 => uint(json).map(Value::UInt8),
        FundamentalType::Int16 => int(json).map(Value::Int16),
        FundamentalType::UInt16 => uint(json).map(Value::UInt16),
        FundamentalType::Int32 => int(json).map(Value::Int32),
        FundamentalType::UInt32 => uint(json).map(Value::UInt32),
        FundamentalType::Int64 => json.as_i64().map(Value::Int64),
        FundamentalType::UInt64 => json.as_u64().map(Value::UInt64),
        FundamentalType::Float32 => float_from_json(json).map(|v| Value::Float32(v as f32)),
        FundamentalType::Float64 => float_from_json(json).map(Value::Float64),
        FundamentalType::PropertySet => {
            uint::<u32>(json).map(|v| Value::PropertySet(PropertySet::from_value(v)))
        }
        FundamentalType::TimePoint => float_from_json(json).map(|v| Value::TimePoint(TimePoint(v))),
        FundamentalType::Duration => float_from_json(json).map(Value::Duration),
        FundamentalType::Uuid => json.as_str().and_then(Uuid::from_hex).map(Value::Uuid),
        FundamentalType::String => json.as_str().map(Value::from),
    };
    value.ok_or_else(|| invalid(t.name(), format!("cannot convert {}", json)))
}

/// JSON numbers cannot hold NaN or infinities; those travel as strings.
fn float_to_json(v: f64) -> Json {
    if v.is_nan() {
        Json::from("NaN")
    } else if v.is_infinite() {
        Json::from(if v > 0.0 { "inf" } else { "-inf" })
    } else {
        Json::from(v)
    }
}

fn float_from_json(json: &Json) -> Option<f64> {
    match json {
        Json::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        other => other.as_f64(),
    }
}

fn int<T: TryFrom<i64>>(json: &Json) -> Option<T> {
    json.as_i64().and_then(|v| T::try_from(v).ok())
}

fn uint<T: TryFrom<u64>>(json: &Json) -> Option<T> {
    json.as_u64().and_then(|v| T::try_from(v).ok())
}

fn invalid(type_name: &str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidValue {
        type_name: type_name.to_owned(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnumDescriptor, EnumElement, StructFlags};

    fn color() -> Arc<EnumDescriptor> {
        Arc::new(
            EnumDescriptor::new(
                "Color",
                vec![EnumElement::new(1, "red", 10), EnumElement::new(2, "blue", 20)],
            )
            .unwrap(),
        )
    }

    fn shape() -> Arc<StructDescriptor> {
        let point = Arc::new(
            StructDescriptor::builder("Point")
                .flags(StructFlags::SUBSTRUCT_ONLY)
                .property("x", 1, FundamentalType::Int32)
                .property("y", 2, FundamentalType::Int32)
                .build()
                .unwrap(),
        );
        Arc::new(
            StructDescriptor::builder("Shape")
                .key_property("id", 1, FundamentalType::Uuid)
                .property("color", 2, color())
                .property("origin", 3, point)
                .property("tags", 4, ValueDescriptor::vector(FundamentalType::String))
                .property("mask", 5, FundamentalType::PropertySet)
                .property("weight", 6, FundamentalType::Float32)
                .build()
                .unwrap(),
        )
    }

    fn sample() -> Record {
        let d = shape();
        let origin = d
            .property("origin")
            .and_then(|p| p.value_type().as_struct())
            .cloned()
            .unwrap();
        Record::new(d)
            .with("id", Uuid([7; 16]))
            .and_then(|r| r.with("color", Value::Enum(20)))
            .and_then(|r| r.with("origin", Record::new(origin).with("x", 3).unwrap()))
            .and_then(|r| r.with("tags", vec![Value::from("a")]))
            .and_then(|r| r.with("mask", PropertySet::from_value(5)))
            .and_then(|r| r.with("weight", 0.5f32))
            .unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let json = record_to_json(sample().as_record_ref(), PropertySet::ALL);

        assert_eq!(json["id"], "07070707070707070707070707070707");
        assert_eq!(json["color"], "blue");
        assert_eq!(json["origin"], serde_json::json!({"x": 3}));
        assert_eq!(json["tags"], serde_json::json!(["a"]));
        assert_eq!(json["mask"], 5);
    }

    #[test]
    fn test_roundtrip_respects_included() {
        let record = sample();
        let included: PropertySet = [1, 2, 3, 7].into_iter().collect();
        let json = record_to_json(record.as_record_ref(), included);
        let decoded = record_from_json(record.descriptor(), &json).unwrap();

        assert_eq!(
            decoded.valid_properties(),
            included & record.valid_properties()
        );
        assert!(decoded.equal(&record, included));
    }

    #[test]
    fn test_unknown_property_rejected() {
        let json = serde_json::json!({"nope": 1});
        assert!(matches!(
            record_from_json(&shape(), &json),
            Err(CodecError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let d = shape();
        for json in [
            serde_json::json!({"color": "green"}),
            serde_json::json!({"mask": -1}),
            serde_json::json!({"id": "xyz"}),
            serde_json::json!({"tags": "a"}),
            serde_json::json!({"origin": {"x": "one"}}),
        ] {
            assert!(record_from_json(&d, &json).is_err(), "{}", json);
        }
    }

    #[test]
    fn test_non_finite_floats_roundtrip() {
        let d = Arc::new(
            StructDescriptor::builder("Reading")
                .key_property("id", 1, FundamentalType::UInt32)
                .property("value", 2, FundamentalType::Float64)
                .property("peak", 3, FundamentalType::Float32)
                .property("span", 4, FundamentalType::Duration)
                .build()
                .unwrap(),
        );
        let record = Record::new(d.clone())
            .with("id", Value::UInt32(1))
            .and_then(|r| r.with("value", Value::Float64(f64::NAN)))
            .and_then(|r| r.with("peak", Value::Float32(f32::INFINITY)))
            .and_then(|r| r.with("span", Value::Duration(f64::NEG_INFINITY)))
            .unwrap();

        let json = record_to_json(record.as_record_ref(), PropertySet::ALL);
        assert_eq!(json["value"], "NaN");
        assert_eq!(json["peak"], "inf");
        assert_eq!(json["span"], "-inf");

        let decoded = record_from_json(&d, &json).unwrap();
        assert_eq!(decoded.valid_properties(), record.valid_properties());
        assert!(matches!(decoded.get("value"), Some(ValueRef::Float64(v)) if v.is_nan()));
        assert!(matches!(decoded.get("peak"), Some(ValueRef::Float32(v)) if v == f32::INFINITY));
        assert!(matches!(decoded.get("span"), Some(ValueRef::Duration(v)) if v == f64::NEG_INFINITY));

        let bad = serde_json::json!({"value": "infinity"});
        assert!(record_from_json(&d, &bad).is_err());
    }

    #[test]
    fn test_frame_encode_decode() {
        let record = sample();
        let raw = RawFrame::new(TransportHeader::for_record(&record), record.as_record_ref());
        let bytes = raw.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();

        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - FRAME_PREFIX_LEN);
        let decoded = RawFrame::decode_body(&bytes[FRAME_PREFIX_LEN..]).unwrap();
        assert_eq!(decoded, raw);

        assert!(matches!(
            raw.encode(8),
            Err(CodecError::FrameTooLarge { max: 8, .. })
        ));
        assert!(matches!(
            RawFrame::decode_body(&[]),
            Err(CodecError::EmptyFrame)
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        let raw = RawFrame {
            header: TransportHeader::new("Unknown", PropertySet::NONE),
            payload: Json::Null,
        };
        assert!(matches!(
            raw.decode(&Registry::new()),
            Err(ProtocolError::UnknownType(name)) if name == "Unknown"
        ));
    }
}
