// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime type descriptors.
//!
//! A [`StructDescriptor`] describes one record type: its properties, their
//! tags, their byte offsets inside an instance and the flags that drive the
//! broker's caching policy. Descriptors are immutable once built and shared
//! through `Arc`.
//!
//! Instance layout:
//!
//! ```text
//! offset 0      presence word (u32, one bit per property tag)
//! offset 4..    properties in declaration order, each aligned
//!               to its own value alignment
//! ```
//!
//! Nested records are stored inline, including their own presence word.

use crate::types::value::ValueRef;
use crate::types::PropertySet;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Byte size of the presence word at the start of every instance.
pub const PRESENCE_SIZE: usize = 4;

/// Byte size of a string or vector slot handle.
pub(crate) const SLOT_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("type '{type_name}' of property '{property}' is not known")]
    MissingType { property: String, type_name: String },

    #[error("type '{type_name}' declares tag {tag} more than once")]
    DuplicateTag { type_name: String, tag: u32 },

    #[error("type '{type_name}' declares '{name}' more than once")]
    DuplicateName { type_name: String, name: String },

    #[error("type '{type_name}' declares {count} properties (max {max})", max = PropertySet::MAX_PROPERTIES)]
    TooManyProperties { type_name: String, count: usize },

    #[error("type '{type_name}' uses out-of-range tag {tag}")]
    InvalidTag { type_name: String, tag: u32 },

    #[error("'{0}' is not a struct type")]
    NotAStruct(String),

    #[error("type name must not be empty")]
    EmptyName,
}

/// Built-in value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FundamentalType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    PropertySet,
    TimePoint,
    Duration,
    Uuid,
    String,
}

impl FundamentalType {
    pub const ALL: [FundamentalType; 16] = [
        Self::Bool,
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
        Self::PropertySet,
        Self::TimePoint,
        Self::Duration,
        Self::Uuid,
        Self::String,
    ];

    /// Wire name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::PropertySet => "property_set",
            Self::TimePoint => "timepoint",
            Self::Duration => "duration",
            Self::Uuid => "uuid",
            Self::String => "string",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Bytes occupied inside an instance.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::PropertySet => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::TimePoint | Self::Duration => 8,
            Self::Uuid => 16,
            Self::String => SLOT_SIZE,
        }
    }

    pub const fn alignment(self) -> usize {
        match self {
            Self::Uuid => 1,
            Self::String => SLOT_SIZE,
            other => other.size(),
        }
    }

    fn accepts(self, value: &ValueRef<'_>) -> bool {
        matches!(
            (self, value),
            (Self::Bool, ValueRef::Bool(_))
                | (Self::Int8, ValueRef::Int8(_))
                | (Self::UInt8, ValueRef::UInt8(_))
                | (Self::Int16, ValueRef::Int16(_))
                | (Self::UInt16, ValueRef::UInt16(_))
                | (Self::Int32, ValueRef::Int32(_))
                | (Self::UInt32, ValueRef::UInt32(_))
                | (Self::Int64, ValueRef::Int64(_))
                | (Self::UInt64, ValueRef::UInt64(_))
                | (Self::Float32, ValueRef::Float32(_))
                | (Self::Float64, ValueRef::Float64(_))
                | (Self::PropertySet, ValueRef::PropertySet(_))
                | (Self::TimePoint, ValueRef::TimePoint(_))
                | (Self::Duration, ValueRef::Duration(_))
                | (Self::Uuid, ValueRef::Uuid(_))
                | (Self::String, ValueRef::String(_))
        )
    }
}

/// One enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumElement {
    pub tag: u32,
    pub name: String,
    pub value: i32,
}

impl EnumElement {
    pub fn new(tag: u32, name: impl Into<String>, value: i32) -> Self {
        Self {
            tag,
            name: name.into(),
            value,
        }
    }
}

/// Enumeration type. Values are stored as `i32`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    name: String,
    elements: Vec<EnumElement>,
}

impl EnumDescriptor {
    pub fn new(
        name: impl Into<String>,
        elements: Vec<EnumElement>,
    ) -> Result<Self, DescriptorError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        let mut tags = HashSet::new();
        let mut names = HashSet::new();
        for e in &elements {
            if !tags.insert(e.tag) {
                return Err(DescriptorError::DuplicateTag {
                    type_name: name,
                    tag: e.tag,
                });
            }
            if !names.insert(e.name.as_str()) {
                return Err(DescriptorError::DuplicateName {
                    type_name: name.clone(),
                    name: e.name.clone(),
                });
            }
        }

        Ok(Self { name, elements })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elements(&self) -> &[EnumElement] {
        &self.elements
    }

    pub fn element_by_name(&self, name: &str) -> Option<&EnumElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn element_by_value(&self, value: i32) -> Option<&EnumElement> {
        self.elements.iter().find(|e| e.value == value)
    }

    pub fn element_by_tag(&self, tag: u32) -> Option<&EnumElement> {
        self.elements.iter().find(|e| e.tag == tag)
    }
}

/// Homogeneous collection type, named `vector<T>`.
#[derive(Debug, Clone)]
pub struct VectorDescriptor {
    name: String,
    value_type: ValueDescriptor,
}

impl VectorDescriptor {
    pub fn new(value_type: ValueDescriptor) -> Self {
        Self {
            name: format!("vector<{}>", value_type.name()),
            value_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &ValueDescriptor {
        &self.value_type
    }
}

/// Descriptor of any value a property can hold.
///
/// The set of kinds is closed; per-value operations (storage, comparison,
/// memory accounting) dispatch on the variant.
#[derive(Debug, Clone)]
pub enum ValueDescriptor {
    Fundamental(FundamentalType),
    Enum(Arc<EnumDescriptor>),
    Struct(Arc<StructDescriptor>),
    Vector(Arc<VectorDescriptor>),
}

impl ValueDescriptor {
    /// Vector of `value_type`.
    pub fn vector(value_type: impl Into<ValueDescriptor>) -> Self {
        Self::Vector(Arc::new(VectorDescriptor::new(value_type.into())))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Fundamental(t) => t.name(),
            Self::Enum(d) => d.name(),
            Self::Struct(d) => d.name(),
            Self::Vector(d) => d.name(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Fundamental(t) => t.size(),
            Self::Enum(_) => 4,
            Self::Struct(d) => d.size(),
            Self::Vector(_) => SLOT_SIZE,
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Self::Fundamental(t) => t.alignment(),
            Self::Enum(_) => 4,
            Self::Struct(d) => d.alignment(),
            Self::Vector(_) => SLOT_SIZE,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Fundamental(t) => t.name(),
            Self::Enum(_) => "enum",
            Self::Struct(_) => "struct",
            Self::Vector(_) => "vector",
        }
    }

    /// Whether values of this type own heap memory.
    pub fn uses_dynamic_memory(&self) -> bool {
        match self {
            Self::Fundamental(t) => *t == FundamentalType::String,
            Self::Enum(_) => false,
            Self::Struct(d) => d.uses_dynamic_memory(),
            Self::Vector(_) => true,
        }
    }

    /// Runtime type check of a value against this descriptor.
    pub fn accepts(&self, value: &ValueRef<'_>) -> bool {
        match (self, value) {
            (Self::Fundamental(t), v) => t.accepts(v),
            (Self::Enum(d), ValueRef::Enum(v)) => d.element_by_value(*v).is_some(),
            (Self::Vector(d), ValueRef::Vector(elements)) => elements
                .iter()
                .all(|e| d.value_type().accepts(&e.as_value_ref())),
            (Self::Struct(d), ValueRef::Struct(r)) => r.descriptor().name() == d.name(),
            _ => false,
        }
    }

    /// Named types this value depends on, innermost first.
    pub fn collect_dependencies(&self, out: &mut Vec<ValueDescriptor>) {
        match self {
            Self::Fundamental(_) => {}
            Self::Enum(_) => push_unique(out, self.clone()),
            Self::Vector(d) => d.value_type().collect_dependencies(out),
            Self::Struct(d) => {
                for p in d.property_descriptors() {
                    p.value_type().collect_dependencies(out);
                }
                push_unique(out, self.clone());
            }
        }
    }

    pub fn as_struct(&self) -> Option<&Arc<StructDescriptor>> {
        match self {
            Self::Struct(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Arc<EnumDescriptor>> {
        match self {
            Self::Enum(d) => Some(d),
            _ => None,
        }
    }
}

fn push_unique(out: &mut Vec<ValueDescriptor>, descriptor: ValueDescriptor) {
    if !out.iter().any(|d| d.name() == descriptor.name()) {
        out.push(descriptor);
    }
}

impl From<FundamentalType> for ValueDescriptor {
    fn from(t: FundamentalType) -> Self {
        Self::Fundamental(t)
    }
}

impl From<Arc<EnumDescriptor>> for ValueDescriptor {
    fn from(d: Arc<EnumDescriptor>) -> Self {
        Self::Enum(d)
    }
}

impl From<Arc<StructDescriptor>> for ValueDescriptor {
    fn from(d: Arc<StructDescriptor>) -> Self {
        Self::Struct(d)
    }
}

impl From<Arc<VectorDescriptor>> for ValueDescriptor {
    fn from(d: Arc<VectorDescriptor>) -> Self {
        Self::Vector(d)
    }
}

/// Record type flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StructFlags(u8);

impl StructFlags {
    pub const NONE: Self = Self(0);
    /// The broker keeps the latest instance per key.
    pub const CACHED: Self = Self(1 << 0);
    /// Middleware control type.
    pub const INTERNAL: Self = Self(1 << 1);
    pub const PERSISTENT: Self = Self(1 << 2);
    /// Instances are purged when their last publisher disconnects.
    pub const CLEANUP: Self = Self(1 << 3);
    /// Never leaves the process.
    pub const LOCAL: Self = Self(1 << 4);
    /// Only usable nested inside another record.
    pub const SUBSTRUCT_ONLY: Self = Self(1 << 5);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x3f)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn cached(self) -> bool {
        self.contains(Self::CACHED)
    }

    pub const fn internal(self) -> bool {
        self.contains(Self::INTERNAL)
    }

    pub const fn persistent(self) -> bool {
        self.contains(Self::PERSISTENT)
    }

    pub const fn cleanup(self) -> bool {
        self.contains(Self::CLEANUP)
    }

    pub const fn local(self) -> bool {
        self.contains(Self::LOCAL)
    }

    pub const fn substruct_only(self) -> bool {
        self.contains(Self::SUBSTRUCT_ONLY)
    }
}

impl std::ops::BitOr for StructFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Debug for StructFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::CACHED, "cached"),
            (Self::INTERNAL, "internal"),
            (Self::PERSISTENT, "persistent"),
            (Self::CLEANUP, "cleanup"),
            (Self::LOCAL, "local"),
            (Self::SUBSTRUCT_ONLY, "substruct_only"),
        ];
        let mut list = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                list.entry(&format_args!("{}", name));
            }
        }
        list.finish()
    }
}

/// Metadata of one property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    tag: u32,
    offset: usize,
    is_key: bool,
    set: PropertySet,
    value_type: ValueDescriptor,
}

impl PropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable wire tag.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Byte offset relative to the start of the owning instance.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    /// Set containing only this property's tag.
    pub fn set(&self) -> PropertySet {
        self.set
    }

    pub fn value_type(&self) -> &ValueDescriptor {
        &self.value_type
    }
}

/// Metadata of one record type.
#[derive(Debug)]
pub struct StructDescriptor {
    name: String,
    flags: StructFlags,
    properties: Vec<PropertyDescriptor>,
    key_properties: PropertySet,
    property_set: PropertySet,
    dynamic_memory_properties: PropertySet,
    size: usize,
    alignment: usize,
    num_sub_structs: usize,
}

impl StructDescriptor {
    pub fn builder(name: impl Into<String>) -> StructDescriptorBuilder {
        StructDescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> StructFlags {
        self.flags
    }

    pub fn cached(&self) -> bool {
        self.flags.cached()
    }

    pub fn internal(&self) -> bool {
        self.flags.internal()
    }

    pub fn cleanup(&self) -> bool {
        self.flags.cleanup()
    }

    pub fn local(&self) -> bool {
        self.flags.local()
    }

    pub fn substruct_only(&self) -> bool {
        self.flags.substruct_only()
    }

    /// Properties in declaration order.
    pub fn property_descriptors(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_by_tag(&self, tag: u32) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.tag == tag)
    }

    pub fn key_properties(&self) -> PropertySet {
        self.key_properties
    }

    /// Set of every declared property.
    pub fn properties(&self) -> PropertySet {
        self.property_set
    }

    pub fn dynamic_memory_properties(&self) -> PropertySet {
        self.dynamic_memory_properties
    }

    pub fn uses_dynamic_memory(&self) -> bool {
        !self.dynamic_memory_properties.is_empty()
    }

    /// Instance size in bytes, presence word included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Number of directly nested record-typed properties.
    pub fn num_sub_structs(&self) -> usize {
        self.num_sub_structs
    }
}

/// Builds a [`StructDescriptor`] and computes its layout.
#[derive(Debug)]
pub struct StructDescriptorBuilder {
    name: String,
    flags: StructFlags,
    properties: Vec<(String, u32, bool, ValueDescriptor)>,
}

impl StructDescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: StructFlags::NONE,
            properties: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: StructFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        tag: u32,
        value_type: impl Into<ValueDescriptor>,
    ) -> Self {
        self.properties
            .push((name.into(), tag, false, value_type.into()));
        self
    }

    pub fn key_property(
        mut self,
        name: impl Into<String>,
        tag: u32,
        value_type: impl Into<ValueDescriptor>,
    ) -> Self {
        self.properties
            .push((name.into(), tag, true, value_type.into()));
        self
    }

    /// Validate and lay out the type.
    pub fn build(self) -> Result<StructDescriptor, DescriptorError> {
        let type_name = self.name;
        if type_name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if self.properties.len() > PropertySet::MAX_PROPERTIES as usize {
            return Err(DescriptorError::TooManyProperties {
                type_name,
                count: self.properties.len(),
            });
        }

        let mut properties = Vec::with_capacity(self.properties.len());
        let mut names = HashSet::new();
        let mut property_set = PropertySet::NONE;
        let mut key_properties = PropertySet::NONE;
        let mut dynamic_memory_properties = PropertySet::NONE;
        let mut num_sub_structs = 0;
        let mut end = PRESENCE_SIZE;
        let mut alignment = PRESENCE_SIZE;

        for (name, tag, is_key, value_type) in self.properties {
            let Some(set) = PropertySet::from_tag(tag) else {
                return Err(DescriptorError::InvalidTag { type_name, tag });
            };
            if property_set.contains(tag) {
                return Err(DescriptorError::DuplicateTag { type_name, tag });
            }
            if !names.insert(name.clone()) {
                return Err(DescriptorError::DuplicateName { type_name, name });
            }

            let offset = align_up(end, value_type.alignment());
            end = offset + value_type.size();
            alignment = alignment.max(value_type.alignment());

            property_set += set;
            if is_key {
                key_properties += set;
            }
            if value_type.uses_dynamic_memory() {
                dynamic_memory_properties += set;
            }
            if matches!(value_type, ValueDescriptor::Struct(_)) {
                num_sub_structs += 1;
            }

            properties.push(PropertyDescriptor {
                name,
                tag,
                offset,
                is_key,
                set,
                value_type,
            });
        }

        Ok(StructDescriptor {
            name: type_name,
            flags: self.flags,
            properties,
            key_properties,
            property_set,
            dynamic_memory_properties,
            size: align_up(end, alignment),
            alignment,
            num_sub_structs,
        })
    }
}

const fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> StructDescriptor {
        StructDescriptor::builder("Point")
            .key_property("id", 1, FundamentalType::UInt8)
            .property("x", 2, FundamentalType::Float64)
            .property("label", 3, FundamentalType::String)
            .property("flag", 4, FundamentalType::Bool)
            .build()
            .unwrap()
    }

    #[test]
    fn test_layout_offsets() {
        let d = point();
        let offsets: Vec<usize> = d
            .property_descriptors()
            .iter()
            .map(PropertyDescriptor::offset)
            .collect();

        // presence(4) id@4 pad x@8 label@16 flag@20, padded to 8
        assert_eq!(offsets, vec![4, 8, 16, 20]);
        assert_eq!(d.alignment(), 8);
        assert_eq!(d.size(), 24);
    }

    #[test]
    fn test_layout_monotonic_and_aligned() {
        let d = point();
        let mut last_end = PRESENCE_SIZE;
        for p in d.property_descriptors() {
            assert!(p.offset() >= last_end);
            assert_eq!(p.offset() % p.value_type().alignment(), 0);
            last_end = p.offset() + p.value_type().size();
        }
    }

    #[test]
    fn test_nested_struct_inline() {
        let inner = Arc::new(
            StructDescriptor::builder("Inner")
                .flags(StructFlags::SUBSTRUCT_ONLY)
                .property("a", 1, FundamentalType::Int32)
                .build()
                .unwrap(),
        );
        assert_eq!(inner.size(), 8);

        let outer = StructDescriptor::builder("Outer")
            .property("flag", 1, FundamentalType::Bool)
            .property("inner", 2, inner.clone())
            .build()
            .unwrap();

        let p = outer.property("inner").unwrap();
        assert_eq!(p.offset(), 8);
        assert_eq!(outer.size(), 16);
        assert_eq!(outer.num_sub_structs(), 1);
    }

    #[test]
    fn test_property_sets() {
        let d = point();
        assert_eq!(d.key_properties(), PropertySet::from_value(0b10));
        assert_eq!(d.properties(), PropertySet::from_value(0b11110));
        assert_eq!(d.dynamic_memory_properties(), PropertySet::from_value(0b1000));
        assert_eq!(d.property_by_tag(2).map(|p| p.name()), Some("x"));
    }

    #[test]
    fn test_schema_errors() {
        let dup_tag = StructDescriptor::builder("T")
            .property("a", 1, FundamentalType::Int32)
            .property("b", 1, FundamentalType::Int32)
            .build();
        assert!(matches!(dup_tag, Err(DescriptorError::DuplicateTag { tag: 1, .. })));

        let dup_name = StructDescriptor::builder("T")
            .property("a", 1, FundamentalType::Int32)
            .property("a", 2, FundamentalType::Int32)
            .build();
        assert!(matches!(dup_name, Err(DescriptorError::DuplicateName { .. })));

        let bad_tag = StructDescriptor::builder("T")
            .property("a", 32, FundamentalType::Int32)
            .build();
        assert!(matches!(bad_tag, Err(DescriptorError::InvalidTag { tag: 32, .. })));

        let mut many = StructDescriptor::builder("T");
        for i in 0..33 {
            many = many.property(format!("p{}", i), i % 32, FundamentalType::Bool);
        }
        assert!(matches!(
            many.build(),
            Err(DescriptorError::TooManyProperties { count: 33, .. })
        ));
    }

    #[test]
    fn test_enum_lookup() {
        let e = EnumDescriptor::new(
            "Color",
            vec![EnumElement::new(1, "red", 10), EnumElement::new(2, "green", 20)],
        )
        .unwrap();
        assert_eq!(e.element_by_name("green").map(|e| e.value), Some(20));
        assert_eq!(e.element_by_value(10).map(|e| e.name.as_str()), Some("red"));
        assert!(EnumDescriptor::new(
            "Bad",
            vec![EnumElement::new(1, "a", 0), EnumElement::new(1, "b", 1)]
        )
        .is_err());
    }

    #[test]
    fn test_vector_name_and_dependencies() {
        let color = Arc::new(
            EnumDescriptor::new("Color", vec![EnumElement::new(1, "red", 0)]).unwrap(),
        );
        let v = ValueDescriptor::vector(color);
        assert_eq!(v.name(), "vector<Color>");

        let mut deps = Vec::new();
        v.collect_dependencies(&mut deps);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name(), "Color");
    }

    #[test]
    fn test_flags() {
        let f = StructFlags::CACHED | StructFlags::CLEANUP;
        assert!(f.cached());
        assert!(f.cleanup());
        assert!(!f.local());
        assert_eq!(StructFlags::from_bits(f.bits()), f);
    }
}
