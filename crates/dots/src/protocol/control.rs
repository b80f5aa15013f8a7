// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in control types.
//!
//! Control messages are ordinary records of internal types, so they travel
//! through the same codec as application data. Each type has a typed view
//! implementing [`ControlRecord`].

use crate::protocol::ProtocolError;
use crate::types::{
    DescriptorError, EnumDescriptor, EnumElement, FromValueRef, FundamentalType, Record,
    RecordError, RecordRef, Registry, RegistryError, StructDescriptor, StructFlags, TimePoint,
    Value, ValueDescriptor, ValueRef,
};
use std::sync::Arc;

pub const STRUCT_FLAGS: &str = "DotsStructFlags";
pub const STRUCT_PROPERTY_DATA: &str = "StructPropertyData";
pub const STRUCT_DESCRIPTOR_DATA: &str = "StructDescriptorData";
pub const ENUM_ELEMENT_DATA: &str = "EnumElementData";
pub const ENUM_DESCRIPTOR_DATA: &str = "EnumDescriptorData";
pub const MEMBER_EVENT: &str = "DotsMemberEvent";
pub const MEMBER: &str = "DotsMember";
pub const MSG_HELLO: &str = "DotsMsgHello";
pub const MSG_CONNECT: &str = "DotsMsgConnect";
pub const MSG_CONNECT_RESPONSE: &str = "DotsMsgConnectResponse";
pub const MSG_ERROR: &str = "DotsMsgError";
pub const CLEAR_CACHE: &str = "DotsClearCache";
pub const DESCRIPTOR_REQUEST: &str = "DotsDescriptorRequest";
pub const CONNECTION_STATE: &str = "DotsConnectionState";
pub const CLIENT: &str = "DotsClient";
pub const CACHE_INFO: &str = "DotsCacheInfo";
pub const DAEMON_STATUS: &str = "DotsDaemonStatus";

/// Register every built-in type, dependencies first.
///
/// Already registered names are kept as they are.
pub fn register_builtin_types(registry: &mut Registry) -> Result<(), RegistryError> {
    use FundamentalType::{Bool, Int32, String as Str, TimePoint as Time, UInt32, UInt64};

    let internal = StructFlags::INTERNAL;
    let substruct = StructFlags::INTERNAL | StructFlags::SUBSTRUCT_ONLY;
    let cached = StructFlags::INTERNAL | StructFlags::CACHED;

    let flags = registry.register_struct(
        StructDescriptor::builder(STRUCT_FLAGS)
            .flags(substruct)
            .property("cached", 1, Bool)
            .property("internal", 2, Bool)
            .property("persistent", 3, Bool)
            .property("cleanup", 4, Bool)
            .property("local", 5, Bool)
            .property("substruct_only", 6, Bool)
            .build()?,
        false,
    )?;

    let property_data = registry.register_struct(
        StructDescriptor::builder(STRUCT_PROPERTY_DATA)
            .flags(substruct)
            .property("name", 1, Str)
            .property("tag", 2, UInt32)
            .property("is_key", 3, Bool)
            .property("type", 4, Str)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(STRUCT_DESCRIPTOR_DATA)
            .flags(cached)
            .key_property("name", 1, Str)
            .property("properties", 2, ValueDescriptor::vector(property_data))
            .property("flags", 3, flags)
            .build()?,
        false,
    )?;

    let element_data = registry.register_struct(
        StructDescriptor::builder(ENUM_ELEMENT_DATA)
            .flags(substruct)
            .property("value", 1, Int32)
            .property("name", 2, Str)
            .property("tag", 3, UInt32)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(ENUM_DESCRIPTOR_DATA)
            .flags(cached)
            .key_property("name", 1, Str)
            .property("elements", 2, ValueDescriptor::vector(element_data))
            .build()?,
        false,
    )?;

    let member_event = registry.register_enum(
        EnumDescriptor::new(
            MEMBER_EVENT,
            vec![
                EnumElement::new(1, "join", MemberEvent::Join as i32),
                EnumElement::new(2, "leave", MemberEvent::Leave as i32),
                EnumElement::new(3, "kill", MemberEvent::Kill as i32),
            ],
        )?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(MEMBER)
            .flags(internal)
            .key_property("group_name", 1, Str)
            .property("event", 2, member_event)
            .property("client", 3, UInt32)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(MSG_HELLO)
            .flags(internal)
            .property("server_name", 1, Str)
            .property("auth_challenge", 2, UInt64)
            .property("authentication_required", 3, Bool)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(MSG_CONNECT)
            .flags(internal)
            .property("client_name", 1, Str)
            .property("preload_cache", 2, Bool)
            .property("preload_client_finished", 3, Bool)
            .property("cnonce", 4, UInt64)
            .property("authentication_digest", 5, Str)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(MSG_CONNECT_RESPONSE)
            .flags(internal)
            .property("server_name", 1, Str)
            .property("client_id", 2, UInt32)
            .property("accepted", 3, Bool)
            .property("preload", 4, Bool)
            .property("preload_finished", 5, Bool)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(MSG_ERROR)
            .flags(internal)
            .property("error_code", 1, Int32)
            .property("error_text", 2, Str)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(CLEAR_CACHE)
            .flags(internal)
            .property("type_names", 1, ValueDescriptor::vector(Str))
            .property("origin", 2, UInt32)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(DESCRIPTOR_REQUEST)
            .flags(internal)
            .property("type_names", 1, ValueDescriptor::vector(Str))
            .property("blacklist", 2, ValueDescriptor::vector(Str))
            .build()?,
        false,
    )?;

    let connection_state = registry.register_enum(
        EnumDescriptor::new(
            CONNECTION_STATE,
            ConnectionState::ALL
                .iter()
                .enumerate()
                .map(|(i, s)| EnumElement::new(i as u32 + 1, s.name(), *s as i32))
                .collect(),
        )?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(CLIENT)
            .flags(cached)
            .key_property("id", 1, UInt32)
            .property("name", 2, Str)
            .property("connection_state", 3, connection_state)
            .build()?,
        false,
    )?;

    let cache_info = registry.register_struct(
        StructDescriptor::builder(CACHE_INFO)
            .flags(substruct)
            .property("num_cache_types", 1, UInt32)
            .property("num_cache_entries", 2, UInt32)
            .property("dynamic_memory", 3, UInt64)
            .build()?,
        false,
    )?;

    registry.register_struct(
        StructDescriptor::builder(DAEMON_STATUS)
            .flags(cached)
            .key_property("server_name", 1, Str)
            .property("start_time", 2, Time)
            .property("received_frames", 3, UInt64)
            .property("received_bytes", 4, UInt64)
            .property("cache", 5, cache_info)
            .build()?,
        false,
    )?;

    Ok(())
}

/// Typed view of a control record.
pub trait ControlRecord: Sized {
    const NAME: &'static str;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError>;

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError>;

    /// Encode with the descriptor registered under [`Self::NAME`].
    fn encode(&self, registry: &Registry) -> Result<Record, ProtocolError> {
        let descriptor = registry.get_struct(Self::NAME)?;
        Ok(self.to_record(&descriptor)?)
    }

    /// Decode a record, checking its type name.
    fn decode(record: &Record) -> Result<Self, ProtocolError> {
        if record.type_name() != Self::NAME {
            return Err(ProtocolError::MalformedControl {
                type_name: Self::NAME.to_owned(),
                reason: format!("got a '{}' record", record.type_name()),
            });
        }
        Self::from_record(record.as_record_ref())
    }
}

fn required<'a, T: FromValueRef<'a>>(
    record: RecordRef<'a>,
    name: &str,
) -> Result<T, ProtocolError> {
    record
        .get_as(name)
        .ok_or_else(|| ProtocolError::MalformedControl {
            type_name: record.descriptor().name().to_owned(),
            reason: format!("missing or invalid '{}'", name),
        })
}

fn strings(record: RecordRef<'_>, name: &str) -> Vec<String> {
    record
        .get_as::<&[Value]>(name)
        .map(|v| {
            v.iter()
                .filter_map(|e| e.as_value_ref().as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

fn strings_value(list: &[String]) -> Value {
    Value::Vector(list.iter().map(|s| Value::from(s.as_str())).collect())
}

/// Descriptor of a struct-typed property, or of the elements of a
/// vector-of-struct property.
fn nested_descriptor(
    descriptor: &StructDescriptor,
    name: &str,
) -> Result<Arc<StructDescriptor>, RecordError> {
    let p = descriptor
        .property(name)
        .ok_or_else(|| RecordError::UnknownProperty {
            type_name: descriptor.name().to_owned(),
            property: name.to_owned(),
        })?;
    let inner = match p.value_type() {
        ValueDescriptor::Vector(v) => v.value_type(),
        other => other,
    };
    inner
        .as_struct()
        .cloned()
        .ok_or_else(|| RecordError::TypeMismatch {
            type_name: descriptor.name().to_owned(),
            property: name.to_owned(),
            expected: "struct".to_owned(),
            found: inner.kind_name(),
        })
}

fn set_opt(record: &mut Record, name: &str, value: Option<impl Into<Value>>) -> Result<(), RecordError> {
    match value {
        Some(v) => record.set(name, v),
        None => Ok(()),
    }
}

fn enum_value<T: TryFrom<i32>>(record: RecordRef<'_>, name: &str) -> Result<Option<T>, ProtocolError> {
    match record.get(name) {
        None => Ok(None),
        Some(ValueRef::Enum(v)) => T::try_from(v)
            .map(Some)
            .map_err(|_| ProtocolError::MalformedControl {
                type_name: record.descriptor().name().to_owned(),
                reason: format!("invalid '{}' value {}", name, v),
            }),
        Some(other) => Err(ProtocolError::MalformedControl {
            type_name: record.descriptor().name().to_owned(),
            reason: format!("'{}' is a {}", name, other.kind_name()),
        }),
    }
}

// ---------------------------------------------------------------------------
// Type descriptions
// ---------------------------------------------------------------------------

impl ControlRecord for StructFlags {
    const NAME: &'static str = STRUCT_FLAGS;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        Record::new(descriptor.clone())
            .with("cached", self.cached())?
            .with("internal", self.internal())?
            .with("persistent", self.persistent())?
            .with("cleanup", self.cleanup())?
            .with("local", self.local())?
            .with("substruct_only", self.substruct_only())
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        let flag = |name: &str| record.get_as::<bool>(name).unwrap_or(false);
        let mut flags = StructFlags::NONE;
        for (name, bit) in [
            ("cached", StructFlags::CACHED),
            ("internal", StructFlags::INTERNAL),
            ("persistent", StructFlags::PERSISTENT),
            ("cleanup", StructFlags::CLEANUP),
            ("local", StructFlags::LOCAL),
            ("substruct_only", StructFlags::SUBSTRUCT_ONLY),
        ] {
            if flag(name) {
                flags = flags | bit;
            }
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructPropertyData {
    pub name: String,
    pub tag: u32,
    pub is_key: bool,
    pub type_name: String,
}

impl ControlRecord for StructPropertyData {
    const NAME: &'static str = STRUCT_PROPERTY_DATA;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        Record::new(descriptor.clone())
            .with("name", self.name.as_str())?
            .with("tag", self.tag)?
            .with("is_key", self.is_key)?
            .with("type", self.type_name.as_str())
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: required::<String>(record, "name")?,
            tag: required(record, "tag")?,
            is_key: record.get_as("is_key").unwrap_or(false),
            type_name: required::<String>(record, "type")?,
        })
    }
}

/// Wire description of a struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDescriptorData {
    pub name: String,
    pub flags: StructFlags,
    pub properties: Vec<StructPropertyData>,
}

impl StructDescriptorData {
    pub fn from_descriptor(descriptor: &StructDescriptor) -> Self {
        Self {
            name: descriptor.name().to_owned(),
            flags: descriptor.flags(),
            properties: descriptor
                .property_descriptors()
                .iter()
                .map(|p| StructPropertyData {
                    name: p.name().to_owned(),
                    tag: p.tag(),
                    is_key: p.is_key(),
                    type_name: p.value_type().name().to_owned(),
                })
                .collect(),
        }
    }

    /// Rebuild the descriptor, resolving property types through `registry`.
    pub fn to_descriptor(&self, registry: &Registry) -> Result<StructDescriptor, DescriptorError> {
        let mut builder = StructDescriptor::builder(self.name.as_str()).flags(self.flags);
        for p in &self.properties {
            let value_type =
                registry
                    .resolve(&p.type_name)
                    .map_err(|_| DescriptorError::MissingType {
                        property: p.name.clone(),
                        type_name: p.type_name.clone(),
                    })?;
            builder = if p.is_key {
                builder.key_property(p.name.as_str(), p.tag, value_type)
            } else {
                builder.property(p.name.as_str(), p.tag, value_type)
            };
        }
        builder.build()
    }
}

impl ControlRecord for StructDescriptorData {
    const NAME: &'static str = STRUCT_DESCRIPTOR_DATA;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let property_type = nested_descriptor(descriptor, "properties")?;
        let flags_type = nested_descriptor(descriptor, "flags")?;
        let properties = self
            .properties
            .iter()
            .map(|p| p.to_record(&property_type).map(Value::Struct))
            .collect::<Result<Vec<_>, _>>()?;

        Record::new(descriptor.clone())
            .with("name", self.name.as_str())?
            .with("properties", properties)?
            .with("flags", self.flags.to_record(&flags_type)?)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        let properties = record
            .get_as::<&[Value]>("properties")
            .unwrap_or_default()
            .iter()
            .map(|v| match v {
                Value::Struct(r) => StructPropertyData::from_record(r.as_record_ref()),
                other => Err(ProtocolError::MalformedControl {
                    type_name: STRUCT_DESCRIPTOR_DATA.to_owned(),
                    reason: format!("property entry is a {}", other.kind_name()),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let flags = match record.get_as::<RecordRef>("flags") {
            Some(r) => StructFlags::from_record(r)?,
            None => StructFlags::NONE,
        };

        Ok(Self {
            name: required::<String>(record, "name")?,
            flags,
            properties,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumElementData {
    pub value: i32,
    pub name: String,
    pub tag: u32,
}

impl ControlRecord for EnumElementData {
    const NAME: &'static str = ENUM_ELEMENT_DATA;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        Record::new(descriptor.clone())
            .with("value", self.value)?
            .with("name", self.name.as_str())?
            .with("tag", self.tag)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            value: required(record, "value")?,
            name: required::<String>(record, "name")?,
            tag: required(record, "tag")?,
        })
    }
}

/// Wire description of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptorData {
    pub name: String,
    pub elements: Vec<EnumElementData>,
}

impl EnumDescriptorData {
    pub fn from_descriptor(descriptor: &EnumDescriptor) -> Self {
        Self {
            name: descriptor.name().to_owned(),
            elements: descriptor
                .elements()
                .iter()
                .map(|e| EnumElementData {
                    value: e.value,
                    name: e.name.clone(),
                    tag: e.tag,
                })
                .collect(),
        }
    }

    pub fn to_descriptor(&self) -> Result<EnumDescriptor, DescriptorError> {
        EnumDescriptor::new(
            self.name.as_str(),
            self.elements
                .iter()
                .map(|e| EnumElement::new(e.tag, e.name.as_str(), e.value))
                .collect(),
        )
    }
}

impl ControlRecord for EnumDescriptorData {
    const NAME: &'static str = ENUM_DESCRIPTOR_DATA;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let element_type = nested_descriptor(descriptor, "elements")?;
        let elements = self
            .elements
            .iter()
            .map(|e| e.to_record(&element_type).map(Value::Struct))
            .collect::<Result<Vec<_>, _>>()?;

        Record::new(descriptor.clone())
            .with("name", self.name.as_str())?
            .with("elements", elements)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        let elements = record
            .get_as::<&[Value]>("elements")
            .unwrap_or_default()
            .iter()
            .map(|v| match v {
                Value::Struct(r) => EnumElementData::from_record(r.as_record_ref()),
                other => Err(ProtocolError::MalformedControl {
                    type_name: ENUM_DESCRIPTOR_DATA.to_owned(),
                    reason: format!("element entry is a {}", other.kind_name()),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: required::<String>(record, "name")?,
            elements,
        })
    }
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MemberEvent {
    Join = 1,
    Leave = 2,
    Kill = 3,
}

impl TryFrom<i32> for MemberEvent {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, i32> {
        match v {
            1 => Ok(Self::Join),
            2 => Ok(Self::Leave),
            3 => Ok(Self::Kill),
            other => Err(other),
        }
    }
}

/// Join or leave of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotsMember {
    pub group_name: String,
    pub event: MemberEvent,
    pub client: Option<u32>,
}

impl DotsMember {
    pub fn join(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            event: MemberEvent::Join,
            client: None,
        }
    }

    pub fn leave(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            event: MemberEvent::Leave,
            client: None,
        }
    }
}

impl ControlRecord for DotsMember {
    const NAME: &'static str = MEMBER;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let mut record = Record::new(descriptor.clone())
            .with("group_name", self.group_name.as_str())?
            .with("event", Value::Enum(self.event as i32))?;
        set_opt(&mut record, "client", self.client)?;
        Ok(record)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        let event = enum_value::<MemberEvent>(record, "event")?.ok_or_else(|| {
            ProtocolError::MalformedControl {
                type_name: MEMBER.to_owned(),
                reason: "missing 'event'".to_owned(),
            }
        })?;
        Ok(Self {
            group_name: required::<String>(record, "group_name")?,
            event,
            client: record.get_as("client"),
        })
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First message sent by the broker on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DotsMsgHello {
    pub server_name: String,
    pub auth_challenge: Option<u64>,
    pub authentication_required: bool,
}

impl ControlRecord for DotsMsgHello {
    const NAME: &'static str = MSG_HELLO;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let mut record = Record::new(descriptor.clone())
            .with("server_name", self.server_name.as_str())?
            .with("authentication_required", self.authentication_required)?;
        set_opt(&mut record, "auth_challenge", self.auth_challenge)?;
        Ok(record)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            server_name: required::<String>(record, "server_name")?,
            auth_challenge: record.get_as("auth_challenge"),
            authentication_required: record.get_as("authentication_required").unwrap_or(false),
        })
    }
}

/// Guest handshake message. The first one carries the client name, a
/// later one the preload-finished marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DotsMsgConnect {
    pub client_name: Option<String>,
    pub preload_cache: Option<bool>,
    pub preload_client_finished: Option<bool>,
    pub cnonce: Option<u64>,
    pub authentication_digest: Option<String>,
}

impl ControlRecord for DotsMsgConnect {
    const NAME: &'static str = MSG_CONNECT;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let mut record = Record::new(descriptor.clone());
        set_opt(&mut record, "client_name", self.client_name.as_deref())?;
        set_opt(&mut record, "preload_cache", self.preload_cache)?;
        set_opt(&mut record, "preload_client_finished", self.preload_client_finished)?;
        set_opt(&mut record, "cnonce", self.cnonce)?;
        set_opt(&mut record, "authentication_digest", self.authentication_digest.as_deref())?;
        Ok(record)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            client_name: record.get_as("client_name"),
            preload_cache: record.get_as("preload_cache"),
            preload_client_finished: record.get_as("preload_client_finished"),
            cnonce: record.get_as("cnonce"),
            authentication_digest: record.get_as("authentication_digest"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DotsMsgConnectResponse {
    pub server_name: Option<String>,
    pub client_id: Option<u32>,
    pub accepted: Option<bool>,
    pub preload: Option<bool>,
    pub preload_finished: Option<bool>,
}

impl ControlRecord for DotsMsgConnectResponse {
    const NAME: &'static str = MSG_CONNECT_RESPONSE;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let mut record = Record::new(descriptor.clone());
        set_opt(&mut record, "server_name", self.server_name.as_deref())?;
        set_opt(&mut record, "client_id", self.client_id)?;
        set_opt(&mut record, "accepted", self.accepted)?;
        set_opt(&mut record, "preload", self.preload)?;
        set_opt(&mut record, "preload_finished", self.preload_finished)?;
        Ok(record)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            server_name: record.get_as("server_name"),
            client_id: record.get_as("client_id"),
            accepted: record.get_as("accepted"),
            preload: record.get_as("preload"),
            preload_finished: record.get_as("preload_finished"),
        })
    }
}

/// Sent by the broker right before closing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotsMsgError {
    pub error_code: i32,
    pub error_text: String,
}

impl ControlRecord for DotsMsgError {
    const NAME: &'static str = MSG_ERROR;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        Record::new(descriptor.clone())
            .with("error_code", self.error_code)?
            .with("error_text", self.error_text.as_str())
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            error_code: record.get_as("error_code").unwrap_or(0),
            error_text: record.get_as("error_text").unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Cache and type requests
// ---------------------------------------------------------------------------

/// Remove cache entries of the listed types, optionally only those last
/// updated by `origin`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DotsClearCache {
    pub type_names: Vec<String>,
    pub origin: Option<u32>,
}

impl ControlRecord for DotsClearCache {
    const NAME: &'static str = CLEAR_CACHE;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let mut record =
            Record::new(descriptor.clone()).with("type_names", strings_value(&self.type_names))?;
        set_opt(&mut record, "origin", self.origin)?;
        Ok(record)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            type_names: strings(record, "type_names"),
            origin: record.get_as("origin"),
        })
    }
}

/// Ask for type descriptions. An empty list means every user type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DotsDescriptorRequest {
    pub type_names: Vec<String>,
    pub blacklist: Vec<String>,
}

impl ControlRecord for DotsDescriptorRequest {
    const NAME: &'static str = DESCRIPTOR_REQUEST;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        Record::new(descriptor.clone())
            .with("type_names", strings_value(&self.type_names))?
            .with("blacklist", strings_value(&self.blacklist))
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            type_names: strings(record, "type_names"),
            blacklist: strings(record, "blacklist"),
        })
    }
}

// ---------------------------------------------------------------------------
// Broker directory
// ---------------------------------------------------------------------------

/// Handshake state of a connection.
///
/// Wire value 4 is unassigned; decoding it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConnectionState {
    Connecting = 1,
    EarlySubscribe = 2,
    Connected = 3,
    Closed = 5,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 4] = [
        Self::Connecting,
        Self::EarlySubscribe,
        Self::Connected,
        Self::Closed,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::EarlySubscribe => "early_subscribe",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl TryFrom<i32> for ConnectionState {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, i32> {
        Self::ALL
            .into_iter()
            .find(|s| *s as i32 == v)
            .ok_or(v)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Entry of the broker's client directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotsClient {
    pub id: u32,
    pub name: Option<String>,
    pub connection_state: Option<ConnectionState>,
}

impl ControlRecord for DotsClient {
    const NAME: &'static str = CLIENT;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let mut record = Record::new(descriptor.clone()).with("id", self.id)?;
        set_opt(&mut record, "name", self.name.as_deref())?;
        set_opt(
            &mut record,
            "connection_state",
            self.connection_state.map(|s| Value::Enum(s as i32)),
        )?;
        Ok(record)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: required(record, "id")?,
            name: record.get_as("name"),
            connection_state: enum_value(record, "connection_state")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DotsCacheInfo {
    pub num_cache_types: u32,
    pub num_cache_entries: u32,
    pub dynamic_memory: u64,
}

impl ControlRecord for DotsCacheInfo {
    const NAME: &'static str = CACHE_INFO;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        Record::new(descriptor.clone())
            .with("num_cache_types", self.num_cache_types)?
            .with("num_cache_entries", self.num_cache_entries)?
            .with("dynamic_memory", self.dynamic_memory)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            num_cache_types: record.get_as("num_cache_types").unwrap_or(0),
            num_cache_entries: record.get_as("num_cache_entries").unwrap_or(0),
            dynamic_memory: record.get_as("dynamic_memory").unwrap_or(0),
        })
    }
}

/// Periodic broker statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct DotsDaemonStatus {
    pub server_name: String,
    pub start_time: TimePoint,
    pub received_frames: u64,
    pub received_bytes: u64,
    pub cache: DotsCacheInfo,
}

impl ControlRecord for DotsDaemonStatus {
    const NAME: &'static str = DAEMON_STATUS;

    fn to_record(&self, descriptor: &Arc<StructDescriptor>) -> Result<Record, RecordError> {
        let cache_type = nested_descriptor(descriptor, "cache")?;
        Record::new(descriptor.clone())
            .with("server_name", self.server_name.as_str())?
            .with("start_time", self.start_time)?
            .with("received_frames", self.received_frames)?
            .with("received_bytes", self.received_bytes)?
            .with("cache", self.cache.to_record(&cache_type)?)
    }

    fn from_record(record: RecordRef<'_>) -> Result<Self, ProtocolError> {
        let cache = match record.get_as::<RecordRef>("cache") {
            Some(r) => DotsCacheInfo::from_record(r)?,
            None => DotsCacheInfo::default(),
        };
        Ok(Self {
            server_name: required::<String>(record, "server_name")?,
            start_time: record.get_as("start_time").unwrap_or_default(),
            received_frames: record.get_as("received_frames").unwrap_or(0),
            received_bytes: record.get_as("received_bytes").unwrap_or(0),
            cache,
        })
    }
}

/// Whether `name` is one of the built-in control types.
pub fn is_builtin_type(name: &str) -> bool {
    [
        STRUCT_FLAGS,
        STRUCT_PROPERTY_DATA,
        STRUCT_DESCRIPTOR_DATA,
        ENUM_ELEMENT_DATA,
        ENUM_DESCRIPTOR_DATA,
        MEMBER_EVENT,
        MEMBER,
        MSG_HELLO,
        MSG_CONNECT,
        MSG_CONNECT_RESPONSE,
        MSG_ERROR,
        CLEAR_CACHE,
        DESCRIPTOR_REQUEST,
        CONNECTION_STATE,
        CLIENT,
        CACHE_INFO,
        DAEMON_STATUS,
    ]
    .contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        register_builtin_types(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_builtin_registration_idempotent() {
        let mut registry = registry();
        let count = registry.len();
        register_builtin_types(&mut registry).unwrap();
        assert_eq!(registry.len(), count);
        assert_eq!(count, 17);
        assert!(registry.user_structs().next().is_none());
    }

    #[test]
    fn test_member_roundtrip() {
        let registry = registry();
        let member = DotsMember {
            group_name: "Foo".into(),
            event: MemberEvent::Leave,
            client: Some(4),
        };
        let record = member.encode(&registry).unwrap();
        assert_eq!(DotsMember::decode(&record).unwrap(), member);
    }

    #[test]
    fn test_decode_checks_type() {
        let registry = registry();
        let record = DotsMsgError {
            error_code: 1,
            error_text: "x".into(),
        }
        .encode(&registry)
        .unwrap();
        assert!(DotsMember::decode(&record).is_err());
    }

    #[test]
    fn test_connect_partial_fields() {
        let registry = registry();
        let finished = DotsMsgConnect {
            preload_client_finished: Some(true),
            ..Default::default()
        };
        let record = finished.encode(&registry).unwrap();
        assert_eq!(record.valid_properties().count(), 1);
        assert_eq!(DotsMsgConnect::decode(&record).unwrap(), finished);
    }

    #[test]
    fn test_struct_descriptor_data_roundtrip() {
        let mut registry = registry();
        let color = registry
            .register_enum(
                EnumDescriptor::new("Color", vec![EnumElement::new(1, "red", 3)]).unwrap(),
                true,
            )
            .unwrap();
        let original = StructDescriptor::builder("Paint")
            .flags(StructFlags::CACHED | StructFlags::CLEANUP)
            .key_property("id", 1, FundamentalType::UInt32)
            .property("color", 2, color)
            .property("notes", 5, ValueDescriptor::vector(FundamentalType::String))
            .build()
            .unwrap();

        let data = StructDescriptorData::from_descriptor(&original);
        let record = data.encode(&registry).unwrap();
        let decoded = StructDescriptorData::decode(&record).unwrap();
        assert_eq!(decoded, data);

        let rebuilt = decoded.to_descriptor(&registry).unwrap();
        assert_eq!(rebuilt.size(), original.size());
        assert_eq!(rebuilt.flags(), original.flags());
        assert_eq!(rebuilt.key_properties(), original.key_properties());
        assert_eq!(rebuilt.property("notes").map(|p| p.tag()), Some(5));
    }

    #[test]
    fn test_descriptor_data_missing_type() {
        let registry = registry();
        let data = StructDescriptorData {
            name: "Broken".into(),
            flags: StructFlags::NONE,
            properties: vec![StructPropertyData {
                name: "x".into(),
                tag: 1,
                is_key: false,
                type_name: "Unknown".into(),
            }],
        };
        assert!(matches!(
            data.to_descriptor(&registry),
            Err(DescriptorError::MissingType { .. })
        ));
    }

    #[test]
    fn test_enum_descriptor_data_roundtrip() {
        let registry = registry();
        let original =
            EnumDescriptor::new("Mode", vec![EnumElement::new(1, "on", 1), EnumElement::new(2, "off", 0)])
                .unwrap();
        let data = EnumDescriptorData::from_descriptor(&original);
        let decoded = EnumDescriptorData::decode(&data.encode(&registry).unwrap()).unwrap();
        assert_eq!(decoded.to_descriptor().unwrap(), original);
    }

    #[test]
    fn test_client_state_roundtrip() {
        let registry = registry();
        let client = DotsClient {
            id: 2,
            name: Some("guest".into()),
            connection_state: Some(ConnectionState::EarlySubscribe),
        };
        let decoded = DotsClient::decode(&client.encode(&registry).unwrap()).unwrap();
        assert_eq!(decoded, client);
    }

    #[test]
    fn test_connection_state_values() {
        let registry = registry();
        let states = registry.find_enum(CONNECTION_STATE).unwrap();
        let names: Vec<&str> = states.elements().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["connecting", "early_subscribe", "connected", "closed"]);
        assert_eq!(states.element_by_name("closed").unwrap().value, 5);

        assert_eq!(ConnectionState::try_from(5), Ok(ConnectionState::Closed));
        assert_eq!(ConnectionState::try_from(4), Err(4));
    }

    #[test]
    fn test_daemon_status_nested_cache() {
        let registry = registry();
        let status = DotsDaemonStatus {
            server_name: "dotsd".into(),
            start_time: TimePoint(10.0),
            received_frames: 3,
            received_bytes: 300,
            cache: DotsCacheInfo {
                num_cache_types: 1,
                num_cache_entries: 2,
                dynamic_memory: 64,
            },
        };
        let record = status.encode(&registry).unwrap();
        assert_eq!(DotsDaemonStatus::decode(&record).unwrap(), status);
    }
}
