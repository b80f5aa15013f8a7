// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Property values.
//!
//! [`Value`] is an owned value used to hand data into and out of a record.
//! [`ValueRef`] borrows a value stored inside a record's property area, so
//! comparisons and encoding never have to clone strings, vectors or nested
//! records.

use crate::types::record::{Record, RecordRef};
use crate::types::PropertySet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Point in time, in seconds since the unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimePoint(pub f64);

impl TimePoint {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self(secs)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }
}

/// 128-bit identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    /// Parse from 32 hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Owned property value.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    PropertySet(PropertySet),
    TimePoint(TimePoint),
    /// Duration in seconds.
    Duration(f64),
    Uuid(Uuid),
    String(String),
    /// Enumerator value (not its tag).
    Enum(i32),
    Vector(Vec<Value>),
    Struct(Record),
}

/// Borrowed property value.
#[derive(Debug, Clone, Copy)]
pub enum ValueRef<'a> {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    PropertySet(PropertySet),
    TimePoint(TimePoint),
    Duration(f64),
    Uuid(Uuid),
    String(&'a str),
    Enum(i32),
    Vector(&'a [Value]),
    Struct(RecordRef<'a>),
}

impl Value {
    /// Borrow as a [`ValueRef`].
    pub fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Self::Bool(v) => ValueRef::Bool(*v),
            Self::Int8(v) => ValueRef::Int8(*v),
            Self::UInt8(v) => ValueRef::UInt8(*v),
            Self::Int16(v) => ValueRef::Int16(*v),
            Self::UInt16(v) => ValueRef::UInt16(*v),
            Self::Int32(v) => ValueRef::Int32(*v),
            Self::UInt32(v) => ValueRef::UInt32(*v),
            Self::Int64(v) => ValueRef::Int64(*v),
            Self::UInt64(v) => ValueRef::UInt64(*v),
            Self::Float32(v) => ValueRef::Float32(*v),
            Self::Float64(v) => ValueRef::Float64(*v),
            Self::PropertySet(v) => ValueRef::PropertySet(*v),
            Self::TimePoint(v) => ValueRef::TimePoint(*v),
            Self::Duration(v) => ValueRef::Duration(*v),
            Self::Uuid(v) => ValueRef::Uuid(*v),
            Self::String(v) => ValueRef::String(v),
            Self::Enum(v) => ValueRef::Enum(*v),
            Self::Vector(v) => ValueRef::Vector(v),
            Self::Struct(v) => ValueRef::Struct(v.as_record_ref()),
        }
    }

    /// Short kind name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        self.as_value_ref().kind_name()
    }
}

impl<'a> ValueRef<'a> {
    /// Copy into an owned [`Value`].
    pub fn to_value(self) -> Value {
        match self {
            Self::Bool(v) => Value::Bool(v),
            Self::Int8(v) => Value::Int8(v),
            Self::UInt8(v) => Value::UInt8(v),
            Self::Int16(v) => Value::Int16(v),
            Self::UInt16(v) => Value::UInt16(v),
            Self::Int32(v) => Value::Int32(v),
            Self::UInt32(v) => Value::UInt32(v),
            Self::Int64(v) => Value::Int64(v),
            Self::UInt64(v) => Value::UInt64(v),
            Self::Float32(v) => Value::Float32(v),
            Self::Float64(v) => Value::Float64(v),
            Self::PropertySet(v) => Value::PropertySet(v),
            Self::TimePoint(v) => Value::TimePoint(v),
            Self::Duration(v) => Value::Duration(v),
            Self::Uuid(v) => Value::Uuid(v),
            Self::String(v) => Value::String(v.to_owned()),
            Self::Enum(v) => Value::Enum(v),
            Self::Vector(v) => Value::Vector(v.to_vec()),
            Self::Struct(v) => Value::Struct(v.to_record()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int8(_) => "int8",
            Self::UInt8(_) => "uint8",
            Self::Int16(_) => "int16",
            Self::UInt16(_) => "uint16",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uint32",
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::PropertySet(_) => "property_set",
            Self::TimePoint(_) => "timepoint",
            Self::Duration(_) => "duration",
            Self::Uuid(_) => "uuid",
            Self::String(_) => "string",
            Self::Enum(_) => "enum",
            Self::Vector(_) => "vector",
            Self::Struct(_) => "struct",
        }
    }

    /// Total order used by record comparison and cache keys.
    ///
    /// Floats use IEEE total ordering. Values of different kinds compare
    /// by kind name so the order stays total.
    pub fn compare(&self, other: &ValueRef<'_>) -> Ordering {
        match (self, other) {
            (Self::Bool(a), ValueRef::Bool(b)) => a.cmp(b),
            (Self::Int8(a), ValueRef::Int8(b)) => a.cmp(b),
            (Self::UInt8(a), ValueRef::UInt8(b)) => a.cmp(b),
            (Self::Int16(a), ValueRef::Int16(b)) => a.cmp(b),
            (Self::UInt16(a), ValueRef::UInt16(b)) => a.cmp(b),
            (Self::Int32(a), ValueRef::Int32(b)) => a.cmp(b),
            (Self::UInt32(a), ValueRef::UInt32(b)) => a.cmp(b),
            (Self::Int64(a), ValueRef::Int64(b)) => a.cmp(b),
            (Self::UInt64(a), ValueRef::UInt64(b)) => a.cmp(b),
            (Self::Float32(a), ValueRef::Float32(b)) => a.total_cmp(b),
            (Self::Float64(a), ValueRef::Float64(b)) => a.total_cmp(b),
            (Self::PropertySet(a), ValueRef::PropertySet(b)) => a.value().cmp(&b.value()),
            (Self::TimePoint(a), ValueRef::TimePoint(b)) => a.0.total_cmp(&b.0),
            (Self::Duration(a), ValueRef::Duration(b)) => a.total_cmp(b),
            (Self::Uuid(a), ValueRef::Uuid(b)) => a.cmp(b),
            (Self::String(a), ValueRef::String(b)) => a.cmp(b),
            (Self::Enum(a), ValueRef::Enum(b)) => a.cmp(b),
            (Self::Vector(a), ValueRef::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.as_value_ref().compare(&y.as_value_ref()) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Struct(a), ValueRef::Struct(b)) => a.compare(b),
            (a, b) => a.kind_name().cmp(b.kind_name()),
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<RecordRef<'a>> {
        match self {
            Self::Struct(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&'a [Value]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for ValueRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.as_value_ref() == other.as_value_ref()
    }
}

impl fmt::Display for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int8(v) => write!(f, "{}", v),
            Self::UInt8(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::PropertySet(v) => write!(f, "{}", v),
            Self::TimePoint(v) => write!(f, "{:.6}", v.0),
            Self::Duration(v) => write!(f, "{}s", v),
            Self::Uuid(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{:?}", v),
            Self::Enum(v) => write!(f, "#{}", v),
            Self::Vector(v) => {
                f.write_str("[")?;
                for (i, e) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e.as_value_ref())?;
                }
                f.write_str("]")
            }
            Self::Struct(r) => write!(f, "{}", r),
        }
    }
}

macro_rules! impl_value_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_value_from!(bool, Bool);
impl_value_from!(i8, Int8);
impl_value_from!(u8, UInt8);
impl_value_from!(i16, Int16);
impl_value_from!(u16, UInt16);
impl_value_from!(i32, Int32);
impl_value_from!(u32, UInt32);
impl_value_from!(i64, Int64);
impl_value_from!(u64, UInt64);
impl_value_from!(f32, Float32);
impl_value_from!(f64, Float64);
impl_value_from!(PropertySet, PropertySet);
impl_value_from!(TimePoint, TimePoint);
impl_value_from!(Uuid, Uuid);
impl_value_from!(String, String);
impl_value_from!(Vec<Value>, Vector);
impl_value_from!(Record, Struct);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

/// Conversion out of a borrowed value, used by [`Record::get_as`].
pub trait FromValueRef<'a>: Sized {
    fn from_value_ref(value: ValueRef<'a>) -> Option<Self>;
}

macro_rules! impl_from_value_ref {
    ($ty:ty, $variant:ident) => {
        impl<'a> FromValueRef<'a> for $ty {
            fn from_value_ref(value: ValueRef<'a>) -> Option<Self> {
                match value {
                    ValueRef::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_from_value_ref!(bool, Bool);
impl_from_value_ref!(i8, Int8);
impl_from_value_ref!(u8, UInt8);
impl_from_value_ref!(i16, Int16);
impl_from_value_ref!(u16, UInt16);
impl_from_value_ref!(i32, Int32);
impl_from_value_ref!(u32, UInt32);
impl_from_value_ref!(i64, Int64);
impl_from_value_ref!(u64, UInt64);
impl_from_value_ref!(f32, Float32);
impl_from_value_ref!(f64, Float64);
impl_from_value_ref!(PropertySet, PropertySet);
impl_from_value_ref!(TimePoint, TimePoint);
impl_from_value_ref!(Uuid, Uuid);
impl_from_value_ref!(&'a str, String);
impl_from_value_ref!(&'a [Value], Vector);
impl_from_value_ref!(RecordRef<'a>, Struct);

impl<'a> FromValueRef<'a> for String {
    fn from_value_ref(value: ValueRef<'a>) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}
