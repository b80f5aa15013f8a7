// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tests for the generic record operations.

use super::*;
use std::sync::Arc;

fn sub_type() -> Arc<StructDescriptor> {
    Arc::new(
        StructDescriptor::builder("TestSubStruct")
            .flags(StructFlags::SUBSTRUCT_ONLY)
            .property("flag1", 1, FundamentalType::Bool)
            .property("count", 2, FundamentalType::Int32)
            .build()
            .unwrap(),
    )
}

fn test_type() -> Arc<StructDescriptor> {
    Arc::new(
        StructDescriptor::builder("TestStruct")
            .flags(StructFlags::CACHED)
            .key_property("k1", 1, FundamentalType::String)
            .key_property("k2", 2, FundamentalType::Int32)
            .property("value", 3, FundamentalType::Float64)
            .property("label", 4, FundamentalType::String)
            .property("sub", 5, sub_type())
            .property("names", 6, ValueDescriptor::vector(FundamentalType::String))
            .build()
            .unwrap(),
    )
}

fn sub(flag1: bool, count: Option<i32>) -> Record {
    let mut r = Record::new(sub_type());
    r.set("flag1", flag1).unwrap();
    if let Some(c) = count {
        r.set("count", c).unwrap();
    }
    r
}

fn full() -> Record {
    Record::new(test_type())
        .with("k1", "foo")
        .and_then(|r| r.with("k2", 1))
        .and_then(|r| r.with("value", 2.5))
        .and_then(|r| r.with("label", "hello"))
        .and_then(|r| r.with("sub", sub(true, Some(7))))
        .and_then(|r| r.with("names", vec![Value::from("a"), Value::from("b")]))
        .unwrap()
}

fn tags(list: &[u32]) -> PropertySet {
    list.iter().copied().collect()
}

#[test]
fn test_set_get_unset() {
    let mut r = full();
    assert_eq!(r.get_as::<&str>("k1"), Some("foo"));
    assert_eq!(r.get_as::<i32>("k2"), Some(1));
    assert_eq!(r.valid_properties(), tags(&[1, 2, 3, 4, 5, 6]));

    assert!(r.unset("label").unwrap());
    assert!(!r.unset("label").unwrap());
    assert!(r.get("label").is_none());

    let nested = r.get_as::<RecordRef>("sub").unwrap();
    assert_eq!(nested.get_as::<i32>("count"), Some(7));
}

#[test]
fn test_set_type_mismatch() {
    let mut r = Record::new(test_type());
    let err = r.set("k2", "not a number").unwrap_err();
    assert!(matches!(err, RecordError::TypeMismatch { found: "string", .. }));

    let err = r.set("missing", 1).unwrap_err();
    assert!(matches!(err, RecordError::UnknownProperty { .. }));
    assert!(r.valid_properties().is_empty());
}

#[test]
fn test_assign_mirrors_source() {
    let src = full();
    let mut dst = Record::new(test_type()).with("k2", 99).unwrap();
    let p = tags(&[1, 2, 3, 4]);

    dst.assign(&src, p).unwrap();
    assert!(dst.diff_properties(&src, p).is_empty());
    // Properties outside the set are left alone.
    assert!(dst.get("sub").is_none());
}

#[test]
fn test_assign_destroys_absent() {
    let mut dst = full();
    let src = Record::new(test_type()).with("k1", "bar").unwrap();

    dst.assign(&src, tags(&[1, 3])).unwrap();
    assert_eq!(dst.get_as::<&str>("k1"), Some("bar"));
    assert!(dst.get("value").is_none());
    assert_eq!(dst.get_as::<i32>("k2"), Some(1));
}

#[test]
fn test_copy_only_touches_present() {
    let mut dst = Record::new(test_type()).with("label", "keep").unwrap();
    let src = Record::new(test_type()).with("k1", "x").unwrap();

    dst.copy(&src, tags(&[1, 3])).unwrap();
    assert_eq!(dst.get_as::<&str>("k1"), Some("x"));
    assert_eq!(dst.get_as::<&str>("label"), Some("keep"));
}

#[test]
fn test_clear_all_present() {
    let mut r = full();
    let present = r.valid_properties();
    r.clear(present);
    assert!(r.valid_properties().is_empty());
    assert_eq!(r.live_slots(), 0);
}

#[test]
fn test_merge_idempotent() {
    let update = Record::new(test_type())
        .with("value", 9.0)
        .and_then(|r| r.with("sub", sub(false, None)))
        .unwrap();

    let mut once = full();
    once.merge(&update, PropertySet::ALL).unwrap();
    let mut twice = once.clone();
    twice.merge(&update, PropertySet::ALL).unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.get_as::<f64>("value"), Some(9.0));
    // Nested records merge property by property.
    let nested = once.get_as::<RecordRef>("sub").unwrap();
    assert_eq!(nested.get_as::<bool>("flag1"), Some(false));
    assert_eq!(nested.get_as::<i32>("count"), Some(7));
}

#[test]
fn test_merge_never_removes() {
    let mut r = full();
    let empty = Record::new(test_type());
    r.merge(&empty, PropertySet::ALL).unwrap();
    assert_eq!(r, full());
}

#[test]
fn test_merge_constructs_absent_nested() {
    let mut r = Record::new(test_type());
    let update = Record::new(test_type())
        .with("sub", sub(true, None))
        .unwrap();
    r.merge(&update, PropertySet::ALL).unwrap();

    let nested = r.get_as::<RecordRef>("sub").unwrap();
    assert_eq!(nested.valid_properties(), tags(&[1]));
}

#[test]
fn test_swap_twice_restores() {
    let a0 = full();
    let b0 = Record::new(test_type())
        .with("k1", "other")
        .and_then(|r| r.with("label", "b"))
        .unwrap();
    let p = tags(&[1, 3, 4, 6]);

    let mut a = a0.clone();
    let mut b = b0.clone();
    a.swap(&mut b, p).unwrap();
    assert_eq!(a.get_as::<&str>("k1"), Some("other"));
    assert!(a.get("value").is_none());
    assert_eq!(b.get_as::<f64>("value"), Some(2.5));

    a.swap(&mut b, p).unwrap();
    assert_eq!(a, a0);
    assert_eq!(b, b0);
}

#[test]
fn test_same_ignores_non_keys() {
    let a = full();
    let mut b = full();
    b.set("value", -1.0).unwrap();
    b.unset("label").unwrap();

    assert!(a.same(&b));
    assert!(b.same(&a));
    assert!(!a.equal(&b, PropertySet::ALL));

    b.set("k2", 2).unwrap();
    assert!(!a.same(&b));
}

#[test]
fn test_less_first_differing_property() {
    let x = Record::new(test_type())
        .with("k1", "foo")
        .and_then(|r| r.with("k2", 1))
        .unwrap();
    let y = Record::new(test_type())
        .with("k1", "bar")
        .and_then(|r| r.with("k2", 2))
        .unwrap();

    assert!(y.less(&x, PropertySet::ALL));
    assert!(!x.less(&y, PropertySet::ALL));
    // Restricted to k2 the order flips.
    assert!(x.less(&y, tags(&[2])));
}

#[test]
fn test_less_presence_rule() {
    let missing = Record::new(test_type()).with("k1", "foo").unwrap();
    let present = Record::new(test_type())
        .with("k1", "foo")
        .and_then(|r| r.with("k2", 1))
        .unwrap();

    // A record missing a property the other has is not less.
    assert!(!missing.less(&present, PropertySet::ALL));
    assert!(present.less(&missing, PropertySet::ALL));

    // Both absent: never less.
    let empty = Record::new(test_type());
    assert!(!empty.less(&Record::new(test_type()), PropertySet::ALL));

    // Empty selection: never less.
    assert!(!present.less(&missing, PropertySet::NONE));
}

#[test]
fn test_diff_properties() {
    let a = full();
    let mut b = full();
    b.set("value", 3.5).unwrap();
    b.unset("label").unwrap();

    assert_eq!(a.diff_properties(&b, PropertySet::ALL), tags(&[3, 4]));
    assert_eq!(a.diff_properties(&b, tags(&[4])), tags(&[4]));
    assert!(a.diff_properties(&a.clone(), PropertySet::ALL).is_empty());
}

#[test]
fn test_project_keys() {
    let r = full();
    let key = r.project(r.descriptor().key_properties());
    assert_eq!(key.valid_properties(), tags(&[1, 2]));
    assert!(key.same(&r));
}

#[test]
fn test_check_keys() {
    let r = full();
    assert!(r.check_keys(tags(&[1, 2, 3])).is_ok());
    assert_eq!(
        r.check_keys(tags(&[1])).unwrap_err(),
        RecordError::MissingProperties {
            type_name: "TestStruct".into(),
            missing: tags(&[2]),
        }
    );
}

#[test]
fn test_dynamic_memory_usage() {
    let r = Record::new(test_type()).with("label", "hello").unwrap();
    assert_eq!(r.dynamic_memory_usage(), 5);

    let empty = Record::new(test_type());
    assert_eq!(empty.dynamic_memory_usage(), 0);
    assert!(full().dynamic_memory_usage() > 5);
}

#[test]
fn test_wrong_type_rejected() {
    let mut r = full();
    let other = sub(true, None);
    assert!(matches!(
        r.assign(&other, PropertySet::ALL),
        Err(RecordError::WrongType { .. })
    ));
}

#[test]
fn test_display() {
    let r = Record::new(test_type())
        .with("k1", "foo")
        .and_then(|r| r.with("k2", 1))
        .unwrap();
    assert_eq!(r.to_string(), "TestStruct{k1=\"foo\", k2=1}");
}

#[test]
fn test_overwrite_releases_heap() {
    let mut r = Record::new(test_type());
    for i in 0..10 {
        r.set("label", format!("v{}", i)).unwrap();
    }
    assert_eq!(r.live_slots(), 1);
    assert_eq!(r.get_as::<String>("label").as_deref(), Some("v9"));
}
