// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity property bitset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, BitAnd, BitAndAssign, BitXor, Not, Sub, SubAssign};

/// Set of property tags of a record, one bit per tag.
///
/// Tags range from `0` to [`PropertySet::MAX_PROPERTIES`]` - 1`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet(u32);

impl PropertySet {
    /// Maximum number of properties a record type can declare.
    pub const MAX_PROPERTIES: u32 = u32::BITS;

    /// The empty set.
    pub const NONE: Self = Self(0);

    /// The set containing every possible tag.
    pub const ALL: Self = Self(u32::MAX);

    /// Create a set from a raw mask.
    pub const fn from_value(value: u32) -> Self {
        Self(value)
    }

    /// Create a set containing exactly `tag`.
    ///
    /// Returns `None` if `tag` is out of range.
    pub const fn from_tag(tag: u32) -> Option<Self> {
        if tag < Self::MAX_PROPERTIES {
            Some(Self(1 << tag))
        } else {
            None
        }
    }

    /// Raw mask.
    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of tags in the set.
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn contains(self, tag: u32) -> bool {
        tag < Self::MAX_PROPERTIES && self.0 & (1 << tag) != 0
    }

    /// `self ⊆ other`.
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & other.0 == self.0
    }

    /// `self ⊇ other`.
    pub const fn is_superset_of(self, other: Self) -> bool {
        other.is_subset_of(self)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn symmetric_difference(self, other: Self) -> Self {
        Self(self.0 ^ other.0)
    }

    pub const fn complement(self) -> Self {
        Self(!self.0)
    }

    /// Lowest tag in the set that is `>= start`.
    pub const fn first(self, start: u32) -> Option<u32> {
        if start >= Self::MAX_PROPERTIES {
            return None;
        }
        let masked = self.0 & (u32::MAX << start);
        if masked == 0 {
            None
        } else {
            Some(masked.trailing_zeros())
        }
    }

    /// Highest tag in the set that is `<= start`.
    pub const fn last(self, start: u32) -> Option<u32> {
        if start >= Self::MAX_PROPERTIES {
            return self.last(Self::MAX_PROPERTIES - 1);
        }
        let masked = self.0 & (u32::MAX >> (Self::MAX_PROPERTIES - 1 - start));
        if masked == 0 {
            None
        } else {
            Some(Self::MAX_PROPERTIES - 1 - masked.leading_zeros())
        }
    }

    /// Iterate over tags in ascending order.
    pub fn tags(self) -> Tags {
        Tags(self.0)
    }
}

/// Iterator over the tags of a [`PropertySet`].
#[derive(Debug, Clone)]
pub struct Tags(u32);

impl Iterator for Tags {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let tag = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(tag)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl Add for PropertySet {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl AddAssign for PropertySet {
    fn add_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Sub for PropertySet {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.difference(rhs)
    }
}

impl SubAssign for PropertySet {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 &= !rhs.0;
    }
}

impl BitAnd for PropertySet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitAndAssign for PropertySet {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitXor for PropertySet {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        self.symmetric_difference(rhs)
    }
}

impl Not for PropertySet {
    type Output = Self;

    fn not(self) -> Self {
        self.complement()
    }
}

impl FromIterator<u32> for PropertySet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        iter.into_iter()
            .filter_map(Self::from_tag)
            .fold(Self::NONE, Self::union)
    }
}

impl fmt::Debug for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertySet({:032b})", self.0)
    }
}

impl fmt::Display for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, tag) in self.tags().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", tag)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: &[u32]) -> PropertySet {
        tags.iter().copied().collect()
    }

    #[test]
    fn test_set_algebra() {
        let a = set(&[1, 2, 3]);
        let b = set(&[3, 4]);

        assert_eq!(a + b, set(&[1, 2, 3, 4]));
        assert_eq!(a - b, set(&[1, 2]));
        assert_eq!(a & b, set(&[3]));
        assert_eq!(a ^ b, set(&[1, 2, 4]));
        assert_eq!((!a) & a, PropertySet::NONE);
        assert_eq!(a.count(), 3);
    }

    #[test]
    fn test_subset() {
        let a = set(&[1, 2]);
        let b = set(&[1, 2, 5]);

        assert!(a.is_subset_of(b));
        assert!(!b.is_subset_of(a));
        assert!(b.is_superset_of(a));
        assert!(PropertySet::NONE.is_subset_of(a));
        assert!(a.is_subset_of(PropertySet::ALL));
    }

    #[test]
    fn test_from_tag_bounds() {
        assert_eq!(PropertySet::from_tag(0).map(PropertySet::value), Some(1));
        assert_eq!(
            PropertySet::from_tag(31).map(PropertySet::value),
            Some(0x8000_0000)
        );
        assert!(PropertySet::from_tag(32).is_none());
    }

    #[test]
    fn test_first_last() {
        let s = set(&[2, 7, 31]);

        assert_eq!(s.first(0), Some(2));
        assert_eq!(s.first(3), Some(7));
        assert_eq!(s.first(8), Some(31));
        assert_eq!(set(&[2]).first(3), None);

        assert_eq!(s.last(31), Some(31));
        assert_eq!(s.last(30), Some(7));
        assert_eq!(s.last(6), Some(2));
        assert_eq!(s.last(1), None);
        assert_eq!(PropertySet::NONE.first(0), None);
    }

    #[test]
    fn test_tags_iteration() {
        let tags: Vec<u32> = set(&[9, 1, 4]).tags().collect();
        assert_eq!(tags, vec![1, 4, 9]);
    }

    #[test]
    fn test_display() {
        assert_eq!(set(&[1, 3]).to_string(), "{1, 3}");
        assert_eq!(PropertySet::NONE.to_string(), "{}");
    }
}
