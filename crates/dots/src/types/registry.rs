// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-local type directory.

use crate::types::descriptor::{
    DescriptorError, EnumDescriptor, FundamentalType, StructDescriptor, ValueDescriptor,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    #[error("type '{0}' is not registered")]
    UnknownType(String),

    #[error("'{0}' is not a struct type")]
    NotAStruct(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Callback invoked for every newly registered named type.
pub type NewTypeHandler = Box<dyn FnMut(&ValueDescriptor) + Send>;

/// Name → descriptor directory.
///
/// Fundamental types and `vector<T>` names always resolve; enums and
/// structs must be registered. A name maps to at most one descriptor.
#[derive(Default)]
pub struct Registry {
    types: BTreeMap<String, ValueDescriptor>,
    new_type_handler: Option<NewTypeHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the registration hook. Replaces any previous hook.
    pub fn set_new_type_handler(&mut self, handler: NewTypeHandler) {
        self.new_type_handler = Some(handler);
    }

    /// Register an enum or struct type.
    ///
    /// With `assert_new`, registering an existing name fails; otherwise it
    /// is a no-op returning the existing descriptor.
    pub fn register(
        &mut self,
        descriptor: ValueDescriptor,
        assert_new: bool,
    ) -> Result<ValueDescriptor, RegistryError> {
        let name = descriptor.name().to_owned();
        if FundamentalType::from_name(&name).is_some() || name.starts_with("vector<") {
            return Err(RegistryError::DuplicateType(name));
        }

        if let Some(existing) = self.types.get(&name) {
            if assert_new {
                return Err(RegistryError::DuplicateType(name));
            }
            return Ok(existing.clone());
        }

        log::debug!("[registry] registered type '{}'", name);
        self.types.insert(name, descriptor.clone());
        if let Some(handler) = self.new_type_handler.as_mut() {
            handler(&descriptor);
        }
        Ok(descriptor)
    }

    pub fn register_struct(
        &mut self,
        descriptor: StructDescriptor,
        assert_new: bool,
    ) -> Result<Arc<StructDescriptor>, RegistryError> {
        let registered = self.register(ValueDescriptor::Struct(Arc::new(descriptor)), assert_new)?;
        registered
            .as_struct()
            .cloned()
            .ok_or_else(|| RegistryError::NotAStruct(registered.name().to_owned()))
    }

    pub fn register_enum(
        &mut self,
        descriptor: EnumDescriptor,
        assert_new: bool,
    ) -> Result<Arc<EnumDescriptor>, RegistryError> {
        let registered = self.register(ValueDescriptor::Enum(Arc::new(descriptor)), assert_new)?;
        match registered {
            ValueDescriptor::Enum(d) => Ok(d),
            other => Err(RegistryError::DuplicateType(other.name().to_owned())),
        }
    }

    /// Remove a type. With `assert_registered`, a missing name fails.
    pub fn deregister(&mut self, name: &str, assert_registered: bool) -> Result<(), RegistryError> {
        if self.types.remove(name).is_none() && assert_registered {
            return Err(RegistryError::UnknownType(name.to_owned()));
        }
        Ok(())
    }

    /// Registered enum or struct.
    pub fn find(&self, name: &str) -> Option<&ValueDescriptor> {
        self.types.get(name)
    }

    pub fn find_struct(&self, name: &str) -> Option<&Arc<StructDescriptor>> {
        self.types.get(name).and_then(ValueDescriptor::as_struct)
    }

    pub fn find_enum(&self, name: &str) -> Option<&Arc<EnumDescriptor>> {
        self.types.get(name).and_then(ValueDescriptor::as_enum)
    }

    pub fn get_struct(&self, name: &str) -> Result<Arc<StructDescriptor>, RegistryError> {
        match self.types.get(name) {
            Some(ValueDescriptor::Struct(d)) => Ok(d.clone()),
            Some(_) => Err(RegistryError::NotAStruct(name.to_owned())),
            None => Err(RegistryError::UnknownType(name.to_owned())),
        }
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Resolve any type name, including fundamentals and `vector<T>`.
    pub fn resolve(&self, name: &str) -> Result<ValueDescriptor, RegistryError> {
        if let Some(t) = FundamentalType::from_name(name) {
            return Ok(ValueDescriptor::Fundamental(t));
        }
        if let Some(inner) = name
            .strip_prefix("vector<")
            .and_then(|s| s.strip_suffix('>'))
        {
            return Ok(ValueDescriptor::vector(self.resolve(inner)?));
        }
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(name.to_owned()))
    }

    /// Registered types in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ValueDescriptor> {
        self.types.values()
    }

    /// Struct types not flagged internal.
    pub fn user_structs(&self) -> impl Iterator<Item = &Arc<StructDescriptor>> {
        self.types
            .values()
            .filter_map(ValueDescriptor::as_struct)
            .filter(|d| !d.internal())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("new_type_handler", &self.new_type_handler.is_some())
            .finish()
    }
}
