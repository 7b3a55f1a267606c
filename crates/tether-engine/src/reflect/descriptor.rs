//! Type descriptor cache
//!
//! Builds, once per bridged type, the native-readable [`TypeDescriptor`]:
//! exported fields (promoted through embedded structs), getter/setter pairs
//! promoted to properties, plain methods with generic signatures, the
//! synthesized `valueOf`/`toString` members, and the paint callback.
//!
//! Descriptors are immutable and shared; the cache only ever grows.

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};
use tether_sdk::{DataType, MemberInfo, MethodTarget, ToStringMode, TypeDescriptor};

use super::naming::{append_lowered_name, lowered_name, method_signature, result_signature};
use super::shape::{FieldShape, Kind, TypeShape};
use crate::defaults::{TO_STRING, VALUE_OF};
use crate::fatal::fatal;
use crate::options::BridgeOptions;
use crate::value::Painter;

/// A field found while scanning a struct, with its index path.
struct ScannedField<'a> {
    path: Vec<usize>,
    field: &'a FieldShape,
}

/// Fields of `shape` and of its embedded structs, breadth first.
///
/// A name seen at a shallower level shadows deeper fields of the same name,
/// whether or not it is exported.
fn type_fields(shape: &TypeShape) -> Vec<ScannedField<'_>> {
    let mut fields = Vec::new();
    if shape.kind != Kind::Struct {
        return fields;
    }
    let mut names: FxHashSet<&str> = FxHashSet::default();
    let mut level: VecDeque<(&TypeShape, Vec<usize>)> = VecDeque::new();
    level.push_back((shape, Vec::new()));

    while !level.is_empty() {
        let current: Vec<_> = level.drain(..).collect();
        for (scan, prefix) in current {
            if scan.kind != Kind::Struct {
                continue;
            }
            for (i, field) in scan.fields.iter().enumerate() {
                if !names.insert(field.name.as_str()) {
                    continue;
                }
                let mut path = Vec::with_capacity(prefix.len() + 1);
                path.extend_from_slice(&prefix);
                path.push(i);
                if field.anonymous {
                    if let Some(nested) = &field.nested {
                        level.push_back((nested.as_ref(), path.clone()));
                    }
                }
                fields.push(ScannedField { path, field });
            }
        }
    }
    fields
}

/// Incremental member table.
struct Members {
    names: String,
    members: Vec<MemberInfo>,
}

impl Members {
    fn push(&mut self, name: &str, lower: bool, member: MemberInfo) {
        let start = self.names.len();
        if lower {
            append_lowered_name(&mut self.names, name);
        } else {
            self.names.push_str(name);
        }
        let len = self.names.len() - start;
        self.names.push('\0');
        self.members.push(MemberInfo {
            name_offset: start,
            name_len: len,
            ..member
        });
    }
}

fn blank(member_type: DataType) -> MemberInfo {
    MemberInfo {
        name_offset: 0,
        name_len: 0,
        member_type,
        field: None,
        offset: 0,
        get_index: None,
        set_index: None,
        method: None,
        signature: String::new(),
        result: String::new(),
        num_in: 0,
        num_out: 0,
    }
}

/// Build the descriptor for `shape`.
pub fn build_descriptor(shape: &TypeShape, options: &BridgeOptions) -> TypeDescriptor {
    match shape.kind {
        Kind::Chan => fatal(format!("cannot bridge {}: channels have no native representation", shape.name)),
        Kind::UnsafePointer => fatal(format!("cannot bridge {}: raw pointers have no native representation", shape.name)),
        Kind::Func | Kind::Complex64 | Kind::Complex128 => fatal(format!(
            "cannot bridge {} of kind {:?}: no native representation",
            shape.name, shape.kind
        )),
        _ => {}
    }

    let fields = type_fields(shape);
    let exported: Vec<&ScannedField<'_>> = fields.iter().filter(|f| f.field.is_exported()).collect();
    let field_names: FxHashSet<&str> = exported.iter().map(|f| f.field.name.as_str()).collect();

    // Classify exported methods.
    let mut setters: FxHashMap<&str, usize> = FxHashMap::default();
    let mut getters: Vec<usize> = Vec::new();
    let mut has_own_value_of = false;
    for (i, method) in shape.methods.iter().enumerate() {
        if !method.is_exported() {
            continue;
        }
        if method.num_in() > options.max_params {
            fatal(format!(
                "method {}.{} declares {} parameters; at most {} are supported",
                shape.name,
                method.name,
                method.num_in(),
                options.max_params
            ));
        }
        if method.num_out > 1 && !options.multiple_results {
            fatal(format!("method {}.{} returns several values", shape.name, method.name));
        }
        if method.name.len() > 3 && method.name.starts_with("Set") && method.num_in() == 1 {
            setters.insert(&method.name[3..], i);
        } else if method.num_in() == 0 && method.num_out == 1 {
            getters.push(i);
            has_own_value_of |= method.name == VALUE_OF;
        }
    }

    let mut properties: Vec<(usize, usize)> = Vec::new();
    let mut consumed: FxHashSet<usize> = FxHashSet::default();
    for &g in &getters {
        let name = shape.methods[g].name.as_str();
        if field_names.contains(name) {
            // The field already exposes this value.
            consumed.insert(g);
        } else if let Some(&s) = setters.get(name) {
            properties.push((g, s));
            consumed.insert(g);
            consumed.insert(s);
        }
    }
    for field in &exported {
        if let Some(&s) = setters.get(field.field.name.as_str()) {
            consumed.insert(s);
        }
    }
    let plain: Vec<usize> = (0..shape.methods.len())
        .filter(|i| shape.methods[*i].is_exported() && !consumed.contains(i))
        .collect();

    let mut table = Members {
        names: String::with_capacity(256),
        members: Vec::with_capacity(exported.len() + properties.len() + plain.len() + 2),
    };
    let mut field_paths = Vec::with_capacity(exported.len());

    for scanned in &exported {
        let field = scanned.field;
        field_paths.push(scanned.path.clone());
        table.push(
            &field.name,
            true,
            MemberInfo {
                field: Some(field_paths.len() - 1),
                offset: path_offset(shape, &scanned.path),
                set_index: setters.get(field.name.as_str()).copied(),
                ..blank(field.data_type)
            },
        );
    }
    for &(g, s) in &properties {
        let getter = &shape.methods[g];
        table.push(
            &getter.name,
            true,
            MemberInfo {
                get_index: Some(g),
                set_index: Some(s),
                ..blank(getter.result_type)
            },
        );
    }
    let fields_len = table.members.len();

    let painter = TypeId::of::<Painter>();
    let mut paint = None;
    let mut shadowed: FxHashSet<String> = FxHashSet::default();
    for &i in &plain {
        let method = &shape.methods[i];
        let lowered = lowered_name(&method.name);
        if method.name == options.paint_method
            && method.num_in() == 1
            && method.num_out == 0
            && method.params[0].type_id == painter
        {
            paint = Some(table.members.len());
        }
        table.push(
            &method.name,
            true,
            MemberInfo {
                method: Some(MethodTarget::Method(i)),
                signature: method_signature(&lowered, method.num_in()),
                result: result_signature(method.num_out).to_string(),
                num_in: method.num_in(),
                num_out: method.num_out,
                ..blank(DataType::Method)
            },
        );
        shadowed.insert(lowered);
    }

    let value_of = !has_own_value_of && shape.kind != Kind::Struct && shape.caps.underlying.is_some();
    let value_of_name = lowered_name(VALUE_OF);
    if value_of && !shadowed.contains(&value_of_name) {
        table.push(
            &value_of_name,
            false,
            MemberInfo {
                method: Some(MethodTarget::ValueOf),
                signature: method_signature(&value_of_name, 0),
                result: result_signature(1).to_string(),
                num_out: 1,
                ..blank(DataType::Method)
            },
        );
    }
    if !shadowed.contains(TO_STRING) {
        let mode = if shape.caps.stringer.is_some() {
            ToStringMode::Stringer
        } else if shape.caps.underlying.is_some() {
            ToStringMode::ValueOf
        } else {
            ToStringMode::TypeName
        };
        table.push(
            TO_STRING,
            false,
            MemberInfo {
                method: Some(MethodTarget::ToString(mode)),
                signature: method_signature(TO_STRING, 0),
                result: result_signature(1).to_string(),
                num_out: 1,
                ..blank(DataType::Method)
            },
        );
    }

    let methods_len = table.members.len() - fields_len;
    tracing::debug!(
        type_name = %shape.name,
        fields = fields_len,
        methods = methods_len,
        paint = paint.is_some(),
        "described type"
    );

    TypeDescriptor {
        type_name: shape.name.clone(),
        names: table.names.into_bytes(),
        members: table.members,
        fields_len,
        methods_len,
        paint,
        field_paths,
    }
}

/// Byte offset of the field at `path` from the start of the outer value.
fn path_offset(shape: &TypeShape, path: &[usize]) -> usize {
    let mut offset = 0;
    let mut current = shape;
    for (depth, &index) in path.iter().enumerate() {
        let field = &current.fields[index];
        offset += field.offset;
        if depth + 1 < path.len() {
            match &field.nested {
                Some(nested) => current = nested,
                None => fatal(format!("field path {:?} of {} crosses a non-struct field", path, shape.name)),
            }
        }
    }
    offset
}

// ============================================================================
// TypeCache
// ============================================================================

/// Memoized descriptors, keyed by type identity.
pub struct TypeCache {
    options: BridgeOptions,
    descriptors: DashMap<TypeId, Arc<TypeDescriptor>>,
}

static GLOBAL: Lazy<Arc<TypeCache>> = Lazy::new(|| Arc::new(TypeCache::new(BridgeOptions::default())));

impl TypeCache {
    /// Create an empty cache
    pub fn new(options: BridgeOptions) -> Self {
        Self {
            options,
            descriptors: DashMap::new(),
        }
    }

    /// The process-wide cache built with default options
    pub fn global() -> Arc<TypeCache> {
        GLOBAL.clone()
    }

    /// Options used to build descriptors
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Descriptor for `shape`, built on first use.
    pub fn describe(&self, shape: &TypeShape) -> Arc<TypeDescriptor> {
        if let Some(found) = self.descriptors.get(&shape.type_id) {
            return found.clone();
        }
        let built = Arc::new(build_descriptor(shape, &self.options));
        self.descriptors.entry(shape.type_id).or_insert(built).clone()
    }

    /// Number of cached descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when nothing was described yet
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
