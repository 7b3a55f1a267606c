//! Integration tests for type descriptors

mod common;

use std::mem::offset_of;
use std::sync::Arc;

use common::*;
use tether_engine::{shape_of, Bridged, BridgeOptions, DataType, Kind, TypeCache, TypeShape};
use tether_sdk::{MethodTarget, ToStringMode, TypeDescriptor};

fn describe<T: Bridged>() -> Arc<TypeDescriptor> {
    TypeCache::new(BridgeOptions::default()).describe(&shape_of::<T>())
}

fn member_names(descriptor: &TypeDescriptor) -> Vec<&str> {
    descriptor.members.iter().map(|m| descriptor.member_name(m)).collect()
}

// ============================================================================
// Fields and properties
// ============================================================================

#[test]
fn test_field_with_setter() {
    let descriptor = describe::<Counter>();
    assert_eq!(member_names(&descriptor), vec!["count", "increment", "toString"]);
    assert_eq!(descriptor.fields_len, 1);
    assert_eq!(descriptor.methods_len, 2);

    let count = descriptor.member("count").unwrap();
    assert_eq!(count.member_type, DataType::NumberI);
    assert_eq!(count.offset, offset_of!(Counter, count));
    let shape = shape_of::<Counter>();
    let setter = count.set_index.unwrap();
    assert_eq!(shape.methods()[setter].name(), "SetCount");
    // The setter is not exposed on its own.
    assert!(descriptor.member("setCount").is_none());
}

#[test]
fn test_getter_setter_property() {
    let descriptor = describe::<Labeled>();
    assert_eq!(descriptor.fields_len, 1);
    let label = descriptor.member("label").unwrap();
    assert_eq!(label.member_type, DataType::String);
    assert!(label.field.is_none());
    assert!(label.get_index.is_some());
    assert!(label.set_index.is_some());
    assert!(!label.is_method());
}

#[test]
fn test_promoted_fields() {
    let descriptor = describe::<Derived>();
    assert_eq!(member_names(&descriptor), vec!["base", "name", "url", "id", "toString"]);

    let id = descriptor.member("id").unwrap();
    assert_eq!(id.offset, offset_of!(Derived, base) + offset_of!(Base, id));
    assert_eq!(descriptor.field_paths[id.field.unwrap()], vec![0, 0]);

    // Derived.URL shadows Base.URL.
    let url: Vec<_> = descriptor.fields().iter().filter(|m| descriptor.member_name(m) == "url").collect();
    assert_eq!(url.len(), 1);
    assert_eq!(url[0].offset, offset_of!(Derived, url));
    assert!(descriptor.member("name").is_some());
}

#[test]
fn test_nested_struct_field() {
    let descriptor = describe::<Holder>();
    let inner = descriptor.member("inner").unwrap();
    assert_eq!(inner.member_type, DataType::Object);
    assert_eq!(descriptor.fields_len, 1);
}

#[test]
fn test_object_list_field() {
    let descriptor = describe::<Playlist>();
    let items = descriptor.member("items").unwrap();
    assert_eq!(items.member_type, DataType::ListProperty);
    assert!(items.set_index.is_some());

    let descriptor = describe::<Gallery>();
    assert!(descriptor.member("items").unwrap().set_index.is_none());
}

// ============================================================================
// Methods
// ============================================================================

#[test]
fn test_method_signatures() {
    let descriptor = describe::<Greeter>();
    let greet = descriptor.member("greet").unwrap();
    assert_eq!(greet.signature, "greet(QVariant)");
    assert_eq!(greet.result, "QVariant");
    assert_eq!(greet.num_in, 1);
    assert!(matches!(greet.method, Some(MethodTarget::Method(_))));

    let split = descriptor.member("split").unwrap();
    assert_eq!(split.result, "QVariantList");
    assert_eq!(split.num_out, 2);

    let add = descriptor.member("add").unwrap();
    assert_eq!(add.signature, "add(QVariant,QVariant)");
}

#[test]
fn test_void_method_has_empty_result() {
    let descriptor = describe::<Level>();
    let raise = descriptor.member("raise").unwrap();
    assert_eq!(raise.signature, "raise()");
    assert_eq!(raise.result, "");
}

#[test]
fn test_to_string_modes() {
    let mode = |d: &TypeDescriptor| match d.member("toString").and_then(|m| m.method) {
        Some(MethodTarget::ToString(mode)) => mode,
        other => panic!("unexpected toString target {:?}", other),
    };
    assert_eq!(mode(&describe::<Point>()), ToStringMode::Stringer);
    assert_eq!(mode(&describe::<Temperature>()), ToStringMode::Stringer);
    assert_eq!(mode(&describe::<Level>()), ToStringMode::ValueOf);
    assert_eq!(mode(&describe::<Counter>()), ToStringMode::TypeName);
}

#[test]
fn test_value_of_for_named_primitives() {
    let level = describe::<Level>();
    let value_of = level.member("valueOf").unwrap();
    assert_eq!(value_of.method, Some(MethodTarget::ValueOf));
    assert_eq!(value_of.signature, "valueOf()");

    assert!(describe::<Temperature>().member("valueOf").is_some());
    assert!(describe::<Counter>().member("valueOf").is_none());
}

#[test]
fn test_paint_detection() {
    let descriptor = describe::<Canvas>();
    let paint = descriptor.paint.unwrap();
    assert_eq!(descriptor.member_name(&descriptor.members[paint]), "paint");
    assert!(describe::<Counter>().paint.is_none());
}

#[test]
fn test_custom_paint_method_name() {
    let cache = TypeCache::new(BridgeOptions::default().with_paint_method("Render"));
    assert!(cache.describe(&shape_of::<Canvas>()).paint.is_none());
}

// ============================================================================
// Rejected types
// ============================================================================

#[test]
#[should_panic(expected = "at most 1 are supported")]
fn test_too_many_parameters_is_fatal() {
    let cache = TypeCache::new(BridgeOptions::default().with_max_params(1));
    cache.describe(&shape_of::<Greeter>());
}

#[test]
#[should_panic(expected = "returns several values")]
fn test_multiple_results_disabled_is_fatal() {
    let options = BridgeOptions {
        multiple_results: false,
        ..BridgeOptions::default()
    };
    TypeCache::new(options).describe(&shape_of::<Greeter>());
}

struct Pipe;

impl Bridged for Pipe {
    fn shape() -> TypeShape {
        TypeShape::builder::<Pipe>("Pipe").kind(Kind::Chan).build()
    }
}

#[test]
#[should_panic(expected = "channels have no native representation")]
fn test_disallowed_kind_is_fatal() {
    describe::<Pipe>();
}

// ============================================================================
// Cache
// ============================================================================

#[test]
fn test_cache_memoizes() {
    let cache = TypeCache::new(BridgeOptions::default());
    assert!(cache.is_empty());
    let a = cache.describe(&shape_of::<Counter>());
    let b = cache.describe(&shape_of::<Counter>());
    assert!(Arc::ptr_eq(&a, &b));
    cache.describe(&shape_of::<Greeter>());
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_global_cache_is_shared() {
    let a = TypeCache::global().describe(&shape_of::<Point>());
    let b = TypeCache::global().describe(&shape_of::<Point>());
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_names_are_nul_separated() {
    let descriptor = describe::<Counter>();
    let names = String::from_utf8(descriptor.names.clone()).unwrap();
    assert_eq!(names, "count\0increment\0toString\0");
}
