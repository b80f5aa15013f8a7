// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record instances and the descriptor-driven generic operations.
//!
//! Every operation here works for any record type: it walks the property
//! descriptors of the type and dispatches per-value work on the value
//! descriptor kind. No type-specific code is involved.

use crate::types::area::{PropertyArea, Slot};
use crate::types::descriptor::{
    FundamentalType, PropertyDescriptor, StructDescriptor, ValueDescriptor,
};
use crate::types::value::{FromValueRef, TimePoint, Uuid, Value, ValueRef};
use crate::types::PropertySet;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("type '{type_name}' has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    #[error("property '{type_name}.{property}' expects {expected}, got {found}")]
    TypeMismatch {
        type_name: String,
        property: String,
        expected: String,
        found: &'static str,
    },

    #[error("record of type '{found}' used where '{expected}' is required")]
    WrongType { expected: String, found: String },

    #[error("type '{type_name}' is missing properties {missing}")]
    MissingProperties {
        type_name: String,
        missing: PropertySet,
    },
}

/// Owned instance of a record type.
#[derive(Clone)]
pub struct Record {
    descriptor: Arc<StructDescriptor>,
    area: PropertyArea,
}

/// Borrowed view of a record, either a root instance or a nested one.
#[derive(Clone, Copy)]
pub struct RecordRef<'a> {
    descriptor: &'a Arc<StructDescriptor>,
    area: &'a PropertyArea,
    base: usize,
}

// ---------------------------------------------------------------------------
// Per-value storage
// ---------------------------------------------------------------------------

fn load<'a>(area: &'a PropertyArea, offset: usize, value_type: &'a ValueDescriptor) -> ValueRef<'a> {
    match value_type {
        ValueDescriptor::Fundamental(t) => load_fundamental(area, offset, *t),
        ValueDescriptor::Enum(_) => ValueRef::Enum(i32::from_le_bytes(area.read(offset))),
        ValueDescriptor::Vector(_) => match area.slot(offset) {
            Some(Slot::Vector(v)) => ValueRef::Vector(v),
            _ => ValueRef::Vector(&[]),
        },
        ValueDescriptor::Struct(d) => ValueRef::Struct(RecordRef {
            descriptor: d,
            area,
            base: offset,
        }),
    }
}

fn load_fundamental(area: &PropertyArea, offset: usize, t: FundamentalType) -> ValueRef<'_> {
    match t {
        FundamentalType::Bool => ValueRef::Bool(area.read::<1>(offset)[0] != 0),
        FundamentalType::Int8 => ValueRef::Int8(i8::from_le_bytes(area.read(offset))),
        FundamentalType::UInt8 => ValueRef::UInt8(u8::from_le_bytes(area.read(offset))),
        FundamentalType::Int16 => ValueRef::Int16(i16::from_le_bytes(area.read(offset))),
        FundamentalType::UInt16 => ValueRef::UInt16(u16::from_le_bytes(area.read(offset))),
        FundamentalType::Int32 => ValueRef::Int32(i32::from_le_bytes(area.read(offset))),
        FundamentalType::UInt32 => ValueRef::UInt32(u32::from_le_bytes(area.read(offset))),
        FundamentalType::Int64 => ValueRef::Int64(i64::from_le_bytes(area.read(offset))),
        FundamentalType::UInt64 => ValueRef::UInt64(u64::from_le_bytes(area.read(offset))),
        FundamentalType::Float32 => ValueRef::Float32(f32::from_le_bytes(area.read(offset))),
        FundamentalType::Float64 => ValueRef::Float64(f64::from_le_bytes(area.read(offset))),
        FundamentalType::PropertySet => {
            ValueRef::PropertySet(PropertySet::from_value(area.read_u32(offset)))
        }
        FundamentalType::TimePoint => {
            ValueRef::TimePoint(TimePoint(f64::from_le_bytes(area.read(offset))))
        }
        FundamentalType::Duration => ValueRef::Duration(f64::from_le_bytes(area.read(offset))),
        FundamentalType::Uuid => ValueRef::Uuid(Uuid(area.read(offset))),
        FundamentalType::String => match area.slot(offset) {
            Some(Slot::String(s)) => ValueRef::String(s),
            _ => ValueRef::String(""),
        },
    }
}

/// Construct `value` at `offset`. The slot must not hold a constructed
/// value and `value` must have been accepted by the property's type.
fn construct(area: &mut PropertyArea, offset: usize, value: ValueRef<'_>) {
    match value {
        ValueRef::Bool(v) => area.write(offset, [u8::from(v)]),
        ValueRef::Int8(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::UInt8(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::Int16(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::UInt16(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::Int32(v) | ValueRef::Enum(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::UInt32(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::Int64(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::UInt64(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::Float32(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::Float64(v) | ValueRef::Duration(v) => area.write(offset, v.to_le_bytes()),
        ValueRef::PropertySet(v) => area.write(offset, v.value().to_le_bytes()),
        ValueRef::TimePoint(v) => area.write(offset, v.0.to_le_bytes()),
        ValueRef::Uuid(v) => area.write(offset, v.0),
        ValueRef::String(s) => area.alloc(offset, Slot::String(s.to_owned())),
        ValueRef::Vector(v) => area.alloc(offset, Slot::Vector(v.to_vec())),
        ValueRef::Struct(src) => {
            let mut presence = PropertySet::NONE;
            for p in src.descriptor.property_descriptors() {
                if let Some(v) = src.value(p) {
                    construct(area, offset + p.offset(), v);
                    presence += p.set();
                }
            }
            area.set_presence(offset, presence);
        }
    }
}

/// Destroy the constructed value at `offset`.
fn destroy(area: &mut PropertyArea, offset: usize, value_type: &ValueDescriptor) {
    match value_type {
        ValueDescriptor::Fundamental(FundamentalType::String) | ValueDescriptor::Vector(_) => {
            area.release(offset);
        }
        ValueDescriptor::Struct(d) => {
            clear_at(area, offset, d, PropertySet::ALL);
        }
        other => area.zero(offset, other.size()),
    }
}

fn dynamic_memory_usage_of(value: ValueRef<'_>) -> usize {
    match value {
        ValueRef::String(s) => s.len(),
        ValueRef::Vector(v) => {
            v.len() * std::mem::size_of::<Value>()
                + v.iter()
                    .map(|e| dynamic_memory_usage_of(e.as_value_ref()))
                    .sum::<usize>()
        }
        ValueRef::Struct(r) => r.dynamic_memory_usage(),
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Generic operations on an instance located at `base`
// ---------------------------------------------------------------------------

fn overwrite(area: &mut PropertyArea, base: usize, p: &PropertyDescriptor, value: ValueRef<'_>) {
    let mut presence = area.presence(base);
    let offset = base + p.offset();
    if presence.contains(p.tag()) {
        destroy(area, offset, p.value_type());
    }
    construct(area, offset, value);
    presence += p.set();
    area.set_presence(base, presence);
}

fn remove(area: &mut PropertyArea, base: usize, p: &PropertyDescriptor) -> bool {
    let presence = area.presence(base);
    if !presence.contains(p.tag()) {
        return false;
    }
    destroy(area, base + p.offset(), p.value_type());
    area.set_presence(base, presence - p.set());
    true
}

fn clear_at(area: &mut PropertyArea, base: usize, d: &StructDescriptor, included: PropertySet) {
    for p in d.property_descriptors() {
        if included.contains(p.tag()) {
            remove(area, base, p);
        }
    }
}

fn assign_at(
    area: &mut PropertyArea,
    base: usize,
    d: &StructDescriptor,
    src: RecordRef<'_>,
    included: PropertySet,
) {
    for p in d.property_descriptors() {
        if !included.contains(p.tag()) {
            continue;
        }
        match src.value(p) {
            Some(v) => overwrite(area, base, p, v),
            None => {
                remove(area, base, p);
            }
        }
    }
}

fn merge_at(
    area: &mut PropertyArea,
    base: usize,
    d: &StructDescriptor,
    src: RecordRef<'_>,
    included: PropertySet,
) {
    for p in d.property_descriptors() {
        if !included.contains(p.tag()) {
            continue;
        }
        let Some(v) = src.value(p) else {
            continue;
        };
        match (p.value_type(), v) {
            (ValueDescriptor::Struct(sub), ValueRef::Struct(nested)) => {
                let mut presence = area.presence(base);
                let offset = base + p.offset();
                if !presence.contains(p.tag()) {
                    area.set_presence(offset, PropertySet::NONE);
                    presence += p.set();
                    area.set_presence(base, presence);
                }
                merge_at(area, offset, sub, nested, PropertySet::ALL);
            }
            _ => overwrite(area, base, p, v),
        }
    }
}

fn check_type(expected: &StructDescriptor, found: &StructDescriptor) -> Result<(), RecordError> {
    if expected.name() == found.name() {
        Ok(())
    } else {
        Err(RecordError::WrongType {
            expected: expected.name().to_owned(),
            found: found.name().to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordRef
// ---------------------------------------------------------------------------

impl<'a> RecordRef<'a> {
    pub fn descriptor(&self) -> &'a Arc<StructDescriptor> {
        self.descriptor
    }

    /// Properties with a constructed value.
    pub fn valid_properties(&self) -> PropertySet {
        self.area.presence(self.base)
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.descriptor
            .property(name)
            .is_some_and(|p| self.valid_properties().contains(p.tag()))
    }

    fn value(&self, p: &PropertyDescriptor) -> Option<ValueRef<'a>> {
        // Re-resolve through our own descriptor so the borrow lives for 'a.
        let p = self.descriptor.property_by_tag(p.tag())?;
        if self.valid_properties().contains(p.tag()) {
            Some(load(self.area, self.base + p.offset(), p.value_type()))
        } else {
            None
        }
    }

    /// Value of a present property.
    pub fn get(&self, name: &str) -> Option<ValueRef<'a>> {
        let p = self.descriptor.property(name)?;
        self.value(p)
    }

    pub fn get_as<T: FromValueRef<'a>>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(T::from_value_ref)
    }

    pub fn property_by_tag(&self, tag: u32) -> Option<ValueRef<'a>> {
        let p = self.descriptor.property_by_tag(tag)?;
        self.value(p)
    }

    /// Present properties in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&'a PropertyDescriptor, ValueRef<'a>)> + 'a {
        let this = *self;
        let descriptor: &'a StructDescriptor = self.descriptor;
        descriptor
            .property_descriptors()
            .iter()
            .filter_map(move |p| this.value(p).map(|v| (p, v)))
    }

    /// Copy into a new root instance.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new(self.descriptor.clone());
        assign_at(
            &mut record.area,
            0,
            self.descriptor,
            *self,
            PropertySet::ALL,
        );
        record
    }

    /// Presence and values agree for every property in `included`.
    pub fn equal(&self, other: &RecordRef<'_>, included: PropertySet) -> bool {
        self.descriptor.name() == other.descriptor.name()
            && self.diff_properties(other, included).is_empty()
    }

    /// `equal` restricted to key properties.
    pub fn same(&self, other: &RecordRef<'_>) -> bool {
        self.equal(other, self.descriptor.key_properties())
    }

    /// Lexicographic comparison in declaration order over `included`.
    ///
    /// A present property sorts before an absent one; two absent
    /// properties compare equal.
    pub fn compare_properties(&self, other: &RecordRef<'_>, included: PropertySet) -> Ordering {
        if self.descriptor.name() != other.descriptor.name() {
            return self.descriptor.name().cmp(other.descriptor.name());
        }
        for p in self.descriptor.property_descriptors() {
            if !included.contains(p.tag()) {
                continue;
            }
            let ord = match (self.value(p), other.value(p)) {
                (Some(a), Some(b)) => a.compare(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Comparison over all properties.
    pub fn compare(&self, other: &RecordRef<'_>) -> Ordering {
        self.compare_properties(other, PropertySet::ALL)
    }

    pub fn less(&self, other: &RecordRef<'_>, included: PropertySet) -> bool {
        self.compare_properties(other, included) == Ordering::Less
    }

    /// Properties in `included` whose presence differs, plus properties
    /// present on both sides with different values.
    pub fn diff_properties(&self, other: &RecordRef<'_>, included: PropertySet) -> PropertySet {
        let mine = self.valid_properties() & included;
        let theirs = other.valid_properties() & included;
        let mut diff = mine ^ theirs;

        if self.descriptor.name() != other.descriptor.name() {
            return diff;
        }
        for p in self.descriptor.property_descriptors() {
            if !(mine & theirs).contains(p.tag()) {
                continue;
            }
            if let (Some(a), Some(b)) = (self.value(p), other.value(p)) {
                if a != b {
                    diff += p.set();
                }
            }
        }
        diff
    }

    /// Heap bytes owned by present properties.
    pub fn dynamic_memory_usage(&self) -> usize {
        let dynamic = self.descriptor.dynamic_memory_properties();
        self.values()
            .filter(|(p, _)| dynamic.contains(p.tag()))
            .map(|(_, v)| dynamic_memory_usage_of(v))
            .sum()
    }
}

impl fmt::Display for RecordRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.descriptor.name())?;
        for (i, (p, v)) in self.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", p.name(), v)?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for RecordRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

impl Record {
    /// Empty instance: no property present.
    pub fn new(descriptor: Arc<StructDescriptor>) -> Self {
        let area = PropertyArea::new(descriptor.size());
        Self { descriptor, area }
    }

    pub fn descriptor(&self) -> &Arc<StructDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn as_record_ref(&self) -> RecordRef<'_> {
        RecordRef {
            descriptor: &self.descriptor,
            area: &self.area,
            base: 0,
        }
    }

    pub fn valid_properties(&self) -> PropertySet {
        self.area.presence(0)
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.as_record_ref().is_valid(name)
    }

    pub fn get(&self, name: &str) -> Option<ValueRef<'_>> {
        self.as_record_ref().get(name)
    }

    /// Typed read, `None` when absent or of another kind.
    pub fn get_as<'a, T: FromValueRef<'a>>(&'a self, name: &str) -> Option<T> {
        self.as_record_ref().get_as(name)
    }

    pub fn property_by_tag(&self, tag: u32) -> Option<ValueRef<'_>> {
        self.as_record_ref().property_by_tag(tag)
    }

    fn property_descriptor(&self, name: &str) -> Result<PropertyDescriptor, RecordError> {
        self.descriptor
            .property(name)
            .cloned()
            .ok_or_else(|| RecordError::UnknownProperty {
                type_name: self.descriptor.name().to_owned(),
                property: name.to_owned(),
            })
    }

    /// Construct or overwrite a property, checking its type.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RecordError> {
        let value = value.into();
        self.set_ref(name, value.as_value_ref())
    }

    pub fn set_ref(&mut self, name: &str, value: ValueRef<'_>) -> Result<(), RecordError> {
        let p = self.property_descriptor(name)?;
        if !p.value_type().accepts(&value) {
            return Err(RecordError::TypeMismatch {
                type_name: self.descriptor.name().to_owned(),
                property: name.to_owned(),
                expected: p.value_type().name().to_owned(),
                found: value.kind_name(),
            });
        }
        overwrite(&mut self.area, 0, &p, value);
        Ok(())
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self, RecordError> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Destroy a property. Returns whether it was present.
    pub fn unset(&mut self, name: &str) -> Result<bool, RecordError> {
        let p = self.property_descriptor(name)?;
        Ok(remove(&mut self.area, 0, &p))
    }

    /// Remove and return a property's value.
    pub fn take(&mut self, name: &str) -> Result<Option<Value>, RecordError> {
        let p = self.property_descriptor(name)?;
        let value = self.get(name).map(ValueRef::to_value);
        remove(&mut self.area, 0, &p);
        Ok(value)
    }

    /// Within `included`, become an exact mirror of `other`.
    pub fn assign(&mut self, other: &Record, included: PropertySet) -> Result<(), RecordError> {
        self.assign_ref(other.as_record_ref(), included)
    }

    pub fn assign_ref(&mut self, other: RecordRef<'_>, included: PropertySet) -> Result<(), RecordError> {
        check_type(&self.descriptor, other.descriptor)?;
        assign_at(&mut self.area, 0, &self.descriptor, other, included);
        Ok(())
    }

    /// Like [`assign`](Self::assign), restricted to properties present on
    /// either side.
    pub fn copy(&mut self, other: &Record, included: PropertySet) -> Result<(), RecordError> {
        let touched = included & (self.valid_properties() + other.valid_properties());
        self.assign(other, touched)
    }

    /// Overwrite with every property of `other` present in `included`,
    /// merging nested records. Never removes a property.
    pub fn merge(&mut self, other: &Record, included: PropertySet) -> Result<(), RecordError> {
        self.merge_ref(other.as_record_ref(), included)
    }

    pub fn merge_ref(&mut self, other: RecordRef<'_>, included: PropertySet) -> Result<(), RecordError> {
        check_type(&self.descriptor, other.descriptor)?;
        merge_at(&mut self.area, 0, &self.descriptor, other, included);
        Ok(())
    }

    /// Exchange presence and value of every property in `included`.
    pub fn swap(&mut self, other: &mut Record, included: PropertySet) -> Result<(), RecordError> {
        check_type(&self.descriptor, &other.descriptor)?;
        let descriptor = self.descriptor.clone();
        for p in descriptor.property_descriptors() {
            if !included.contains(p.tag()) {
                continue;
            }
            let mine = self.take(p.name())?;
            let theirs = other.take(p.name())?;
            if let Some(v) = theirs {
                overwrite(&mut self.area, 0, p, v.as_value_ref());
            }
            if let Some(v) = mine {
                overwrite(&mut other.area, 0, p, v.as_value_ref());
            }
        }
        Ok(())
    }

    /// Destroy every property in `included`.
    pub fn clear(&mut self, included: PropertySet) {
        clear_at(&mut self.area, 0, &self.descriptor, included);
    }

    pub fn equal(&self, other: &Record, included: PropertySet) -> bool {
        self.as_record_ref().equal(&other.as_record_ref(), included)
    }

    pub fn same(&self, other: &Record) -> bool {
        self.as_record_ref().same(&other.as_record_ref())
    }

    pub fn less(&self, other: &Record, included: PropertySet) -> bool {
        self.as_record_ref().less(&other.as_record_ref(), included)
    }

    pub fn diff_properties(&self, other: &Record, included: PropertySet) -> PropertySet {
        self.as_record_ref()
            .diff_properties(&other.as_record_ref(), included)
    }

    pub fn dynamic_memory_usage(&self) -> usize {
        self.as_record_ref().dynamic_memory_usage()
    }

    /// New instance holding only `included` properties of this one.
    pub fn project(&self, included: PropertySet) -> Record {
        let mut record = Record::new(self.descriptor.clone());
        assign_at(
            &mut record.area,
            0,
            &self.descriptor,
            self.as_record_ref(),
            included,
        );
        record
    }

    /// Fail unless every key property is in `included` and present.
    pub fn check_keys(&self, included: PropertySet) -> Result<(), RecordError> {
        let keys = self.descriptor.key_properties();
        let missing = keys - (included & self.valid_properties());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RecordError::MissingProperties {
                type_name: self.descriptor.name().to_owned(),
                missing,
            })
        }
    }

    #[cfg(test)]
    pub(crate) fn live_slots(&self) -> usize {
        self.area.live_slots()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other, PropertySet::ALL)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_record_ref(), f)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_record_ref(), f)
    }
}
