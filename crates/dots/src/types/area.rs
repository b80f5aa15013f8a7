// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance storage.
//!
//! A [`PropertyArea`] is a zeroed byte buffer of exactly the descriptor's
//! instance size. Fixed-size values live in the buffer at their property
//! offset in little-endian form. Strings and vectors live in a side heap of
//! slots; the buffer only stores the slot index.
//!
//! All accesses go through bounds-checked `offset + size` accessors.

use crate::types::value::Value;
use crate::types::PropertySet;

/// Heap-allocated property payload.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    String(String),
    Vector(Vec<Value>),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PropertyArea {
    bytes: Vec<u8>,
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl PropertyArea {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn read<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        match self.bytes.get(offset..offset + N) {
            Some(src) => out.copy_from_slice(src),
            None => debug_assert!(false, "read {}..{} out of {}", offset, offset + N, self.size()),
        }
        out
    }

    pub(crate) fn write<const N: usize>(&mut self, offset: usize, value: [u8; N]) {
        let size = self.size();
        match self.bytes.get_mut(offset..offset + N) {
            Some(dst) => dst.copy_from_slice(&value),
            None => debug_assert!(false, "write {}..{} out of {}", offset, offset + N, size),
        }
    }

    pub(crate) fn zero(&mut self, offset: usize, len: usize) {
        if let Some(dst) = self.bytes.get_mut(offset..offset + len) {
            dst.fill(0);
        }
    }

    /// Presence word of the record starting at `base`.
    pub(crate) fn presence(&self, base: usize) -> PropertySet {
        PropertySet::from_value(u32::from_le_bytes(self.read(base)))
    }

    pub(crate) fn set_presence(&mut self, base: usize, set: PropertySet) {
        self.write(base, set.value().to_le_bytes());
    }

    pub(crate) fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.read(offset))
    }

    /// Store `slot` on the heap and write its index at `offset`.
    pub(crate) fn alloc(&mut self, offset: usize, slot: Slot) {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };
        self.write(offset, index.to_le_bytes());
    }

    /// Heap payload referenced from `offset`.
    pub(crate) fn slot(&self, offset: usize) -> Option<&Slot> {
        let index = self.read_u32(offset) as usize;
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Remove the heap payload referenced from `offset`.
    pub(crate) fn release(&mut self, offset: usize) -> Option<Slot> {
        let index = self.read_u32(offset);
        let slot = self.slots.get_mut(index as usize)?.take()?;
        self.free.push(index);
        self.zero(offset, 4);
        Some(slot)
    }

    /// Number of live heap slots.
    pub(crate) fn live_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_access() {
        let mut area = PropertyArea::new(16);
        area.write(8, 0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(u64::from_le_bytes(area.read(8)), 0x1122_3344_5566_7788);

        area.set_presence(0, PropertySet::from_value(0b101));
        assert_eq!(area.presence(0).value(), 0b101);
    }

    #[test]
    fn test_slot_reuse() {
        let mut area = PropertyArea::new(8);
        area.alloc(4, Slot::String("a".into()));
        assert!(matches!(area.slot(4), Some(Slot::String(s)) if s == "a"));
        assert!(area.release(4).is_some());
        assert_eq!(area.live_slots(), 0);

        area.alloc(4, Slot::String("b".into()));
        assert_eq!(area.read_u32(4), 0);
        assert_eq!(area.live_slots(), 1);
    }

    #[test]
    fn test_release_twice() {
        let mut area = PropertyArea::new(8);
        area.alloc(4, Slot::Vector(vec![]));
        assert!(area.release(4).is_some());
        assert!(area.release(4).is_none());
    }
}
