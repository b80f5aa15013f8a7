// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-type instance caches.
//!
//! A [`Container`] holds the latest known state of every key of one cached
//! type. Updates are merged into the stored instance; removals erase it.
//! Keyless types hold at most one instance.

use crate::protocol::{DotsCacheInfo, TransportHeader};
use crate::types::{PropertySet, Record, RecordError, StructDescriptor, TimePoint};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What happened to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Created,
    Updated,
    Removed,
}

/// Bookkeeping attached to every cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneInfo {
    pub last_operation: UpdateKind,
    /// Connection id of the first publisher.
    pub created_from: Option<u32>,
    pub created: TimePoint,
    /// Connection id of the latest publisher, once updated.
    pub last_updated_from: Option<u32>,
    pub modified: Option<TimePoint>,
}

impl CloneInfo {
    fn created(header: &TransportHeader) -> Self {
        Self {
            last_operation: UpdateKind::Created,
            created_from: header.sender,
            created: header.sent_time,
            last_updated_from: None,
            modified: None,
        }
    }

    fn touch(&mut self, kind: UpdateKind, header: &TransportHeader) {
        self.last_operation = kind;
        self.last_updated_from = header.sender;
        self.modified = Some(header.sent_time);
    }

    /// Connection that last wrote the entry.
    pub fn last_publisher(&self) -> Option<u32> {
        self.last_updated_from.or(self.created_from)
    }
}

/// Stored instance and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub instance: Record,
    pub info: CloneInfo,
}

/// Result of applying one transmission to a container.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub kind: UpdateKind,
    /// Properties that changed. Every present property on creation.
    pub updated: PropertySet,
    pub entry: CacheEntry,
}

/// Key properties of an instance, ordered by the type's key properties.
#[derive(Clone)]
struct Key(Record);

impl Key {
    fn of(instance: &Record) -> Self {
        Key(instance.project(instance.descriptor().key_properties()))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        let keys = self.0.descriptor().key_properties();
        self.0
            .as_record_ref()
            .compare_properties(&other.0.as_record_ref(), keys)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

pub struct Container {
    descriptor: Arc<StructDescriptor>,
    entries: BTreeMap<Key, CacheEntry>,
}

impl Container {
    pub fn new(descriptor: Arc<StructDescriptor>) -> Self {
        Self {
            descriptor,
            entries: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<StructDescriptor> {
        &self.descriptor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry whose key properties equal those of `instance`.
    pub fn get(&self, instance: &Record) -> Option<&CacheEntry> {
        self.entries.get(&Key::of(instance))
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Apply a received instance.
    ///
    /// Returns `None` for the removal of an unknown key.
    pub fn insert(
        &mut self,
        header: &TransportHeader,
        instance: &Record,
    ) -> Result<Option<CacheUpdate>, RecordError> {
        let key = Key::of(instance);

        if header.remove {
            return Ok(self.entries.remove(&key).map(|mut entry| {
                entry.info.touch(UpdateKind::Removed, header);
                CacheUpdate {
                    kind: UpdateKind::Removed,
                    updated: entry.instance.valid_properties(),
                    entry,
                }
            }));
        }

        match self.entries.get_mut(&key) {
            Some(entry) => {
                let received = instance.valid_properties();
                let updated = entry.instance.diff_properties(instance, received);
                entry.instance.merge(instance, received)?;
                entry.info.touch(UpdateKind::Updated, header);
                Ok(Some(CacheUpdate {
                    kind: UpdateKind::Updated,
                    updated,
                    entry: entry.clone(),
                }))
            }
            None => {
                let entry = CacheEntry {
                    instance: instance.clone(),
                    info: CloneInfo::created(header),
                };
                self.entries.insert(key, entry.clone());
                Ok(Some(CacheUpdate {
                    kind: UpdateKind::Created,
                    updated: instance.valid_properties(),
                    entry,
                }))
            }
        }
    }

    /// Remove and return every entry matching `predicate`, in key order.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&CacheEntry) -> bool) -> Vec<CacheEntry> {
        let keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    /// Heap bytes held by all cached instances.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.entries
            .values()
            .map(|entry| entry.instance.dynamic_memory_usage())
            .sum()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("type", &self.descriptor.name())
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Containers of every cached type seen so far.
#[derive(Debug, Default)]
pub struct ContainerPool {
    containers: BTreeMap<String, Container>,
}

impl ContainerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str) -> Option<&Container> {
        self.containers.get(type_name)
    }

    pub fn get_mut(&mut self, type_name: &str) -> Option<&mut Container> {
        self.containers.get_mut(type_name)
    }

    pub fn get_or_create(&mut self, descriptor: &Arc<StructDescriptor>) -> &mut Container {
        self.containers
            .entry(descriptor.name().to_owned())
            .or_insert_with(|| Container::new(descriptor.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    /// Totals over user types. Internal containers are left out.
    pub fn cache_info(&self) -> DotsCacheInfo {
        let mut info = DotsCacheInfo::default();
        for container in self.containers.values().filter(|c| !c.descriptor().internal()) {
            info.num_cache_types += 1;
            info.num_cache_entries += container.len() as u32;
            info.dynamic_memory += container.dynamic_memory_usage() as u64;
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundamentalType, StructFlags};

    fn descriptor() -> Arc<StructDescriptor> {
        Arc::new(
            StructDescriptor::builder("Item")
                .flags(StructFlags::CACHED)
                .key_property("id", 1, FundamentalType::UInt32)
                .property("name", 2, FundamentalType::String)
                .property("count", 3, FundamentalType::Int32)
                .build()
                .unwrap(),
        )
    }

    fn item(d: &Arc<StructDescriptor>, id: u32) -> Record {
        Record::new(d.clone()).with("id", id).unwrap()
    }

    fn header(sender: u32, remove: bool) -> TransportHeader {
        let mut header = TransportHeader::new("Item", PropertySet::ALL).with_remove(remove);
        header.sender = Some(sender);
        header
    }

    #[test]
    fn test_create_update_remove() {
        let d = descriptor();
        let mut c = Container::new(d.clone());

        let created = c
            .insert(&header(2, false), &item(&d, 1).with("name", "a").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(created.kind, UpdateKind::Created);
        assert_eq!(created.entry.info.created_from, Some(2));
        assert_eq!(c.len(), 1);

        let updated = c
            .insert(&header(3, false), &item(&d, 1).with("count", 5).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(updated.kind, UpdateKind::Updated);
        assert_eq!(updated.updated, PropertySet::from_tag(3).unwrap());
        // Merge keeps properties the update did not carry.
        assert_eq!(updated.entry.instance.get_as::<&str>("name"), Some("a"));
        assert_eq!(updated.entry.info.last_publisher(), Some(3));

        let removed = c.insert(&header(3, true), &item(&d, 1)).unwrap().unwrap();
        assert_eq!(removed.kind, UpdateKind::Removed);
        assert!(c.is_empty());

        assert!(c.insert(&header(3, true), &item(&d, 1)).unwrap().is_none());
    }

    #[test]
    fn test_unchanged_update_reports_nothing() {
        let d = descriptor();
        let mut c = Container::new(d.clone());
        let instance = item(&d, 4).with("count", 1).unwrap();
        c.insert(&header(2, false), &instance).unwrap();
        let again = c.insert(&header(2, false), &instance).unwrap().unwrap();
        assert_eq!(again.kind, UpdateKind::Updated);
        assert!(again.updated.is_empty());
    }

    #[test]
    fn test_entries_in_key_order() {
        let d = descriptor();
        let mut c = Container::new(d.clone());
        for id in [3u32, 1, 2] {
            c.insert(&header(2, false), &item(&d, id)).unwrap();
        }
        let ids: Vec<u32> = c.iter().filter_map(|e| e.instance.get_as("id")).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(c.get(&item(&d, 2)).is_some());
    }

    #[test]
    fn test_keyless_type_is_singleton() {
        let d = Arc::new(
            StructDescriptor::builder("Settings")
                .flags(StructFlags::CACHED)
                .property("level", 1, FundamentalType::Int32)
                .build()
                .unwrap(),
        );
        let mut c = Container::new(d.clone());
        c.insert(&header(2, false), &Record::new(d.clone()).with("level", 1).unwrap())
            .unwrap();
        c.insert(&header(2, false), &Record::new(d.clone()).with("level", 2).unwrap())
            .unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.iter().next().unwrap().instance.get_as::<i32>("level"), Some(2));
    }

    #[test]
    fn test_remove_where_by_publisher() {
        let d = descriptor();
        let mut c = Container::new(d.clone());
        c.insert(&header(2, false), &item(&d, 1)).unwrap();
        c.insert(&header(3, false), &item(&d, 2)).unwrap();
        c.insert(&header(2, false), &item(&d, 3)).unwrap();

        let removed = c.remove_where(|e| e.info.last_publisher() == Some(2));
        assert_eq!(removed.len(), 2);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_pool_cache_info() {
        let d = descriptor();
        let mut pool = ContainerPool::new();
        pool.get_or_create(&d)
            .insert(&header(2, false), &item(&d, 1).with("name", "abc").unwrap())
            .unwrap();
        let info = pool.cache_info();
        assert_eq!(info.num_cache_types, 1);
        assert_eq!(info.num_cache_entries, 1);
        assert!(info.dynamic_memory >= 3);
    }
}
