//! Registration-time type shapes
//!
//! A [`TypeShape`] is the explicit table a bridged type provides in place of
//! runtime reflection: its fields with erased accessors, its methods with
//! erased invokers, and optional capabilities (string rendering, primitive
//! coercion, custom marshaling, content equality).

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tether_sdk::{ConversionError, ConvertResult, DataType};

use crate::convert::{FromValue, ToValue};
use crate::fatal::fatal;
use crate::value::{Managed, Map, ObjectRef, Value};
use crate::BridgeResult;

// ============================================================================
// Kind
// ============================================================================

/// Underlying kind of a bridged type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Boolean
    Bool,
    /// Signed integers
    Int8,
    /// 16-bit signed
    Int16,
    /// 32-bit signed
    Int32,
    /// 64-bit signed
    Int64,
    /// 8-bit unsigned
    Uint8,
    /// 16-bit unsigned
    Uint16,
    /// 32-bit unsigned
    Uint32,
    /// 64-bit unsigned
    Uint64,
    /// Pointer-sized unsigned handle
    Uintptr,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// 64-bit complex
    Complex64,
    /// 128-bit complex
    Complex128,
    /// String
    String,
    /// Struct with named fields
    Struct,
    /// Sequence
    Slice,
    /// Key/value map
    Map,
    /// Indirection to another value
    Ptr,
    /// Channel
    Chan,
    /// Function
    Func,
    /// Raw pointer
    UnsafePointer,
}

impl Kind {
    /// Kinds that have no representation on the native side.
    pub fn is_disallowed(self) -> bool {
        matches!(
            self,
            Kind::Chan | Kind::UnsafePointer | Kind::Func | Kind::Complex64 | Kind::Complex128
        )
    }

    /// Numeric, boolean and string kinds.
    pub fn is_primitive(self) -> bool {
        !matches!(
            self,
            Kind::Struct
                | Kind::Slice
                | Kind::Map
                | Kind::Ptr
                | Kind::Chan
                | Kind::Func
                | Kind::UnsafePointer
                | Kind::Complex64
                | Kind::Complex128
        )
    }
}

// ============================================================================
// Erased accessors
// ============================================================================

/// Erased access to one field of a bridged struct.
pub(crate) trait Accessor: Send + Sync {
    /// Read the field as a managed value.
    fn get(&self, owner: &dyn Any) -> Value;

    /// Assign the field, converting `value` first.
    fn set(&self, owner: &mut dyn Any, value: Value) -> ConvertResult<()>;

    /// Borrow a nested struct for promoted field access.
    fn project<'a>(&self, _owner: &'a dyn Any) -> Option<&'a dyn Any> {
        None
    }

    /// Mutably borrow a nested struct for promoted field access.
    fn project_mut<'a>(&self, _owner: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        None
    }

    /// Mutably borrow an object-list field.
    fn object_list<'a>(&self, _owner: &'a mut dyn Any) -> Option<&'a mut Vec<ObjectRef>> {
        None
    }
}

pub(crate) fn downcast<T: 'static>(owner: &dyn Any) -> &T {
    match owner.downcast_ref::<T>() {
        Some(v) => v,
        None => fatal(format!(
            "accessor for {} applied to a value of another type",
            std::any::type_name::<T>()
        )),
    }
}

pub(crate) fn downcast_mut<T: 'static>(owner: &mut dyn Any) -> &mut T {
    match owner.downcast_mut::<T>() {
        Some(v) => v,
        None => fatal(format!(
            "accessor for {} applied to a value of another type",
            std::any::type_name::<T>()
        )),
    }
}

/// Plain value field.
pub(crate) struct ValueField<T, F> {
    pub(crate) get: fn(&T) -> &F,
    pub(crate) get_mut: fn(&mut T) -> &mut F,
}

impl<T, F> Accessor for ValueField<T, F>
where
    T: Send + Sync + 'static,
    F: ToValue + FromValue + 'static,
{
    fn get(&self, owner: &dyn Any) -> Value {
        (self.get)(downcast::<T>(owner)).to_value()
    }

    fn set(&self, owner: &mut dyn Any, value: Value) -> ConvertResult<()> {
        let converted = F::from_value(value)?;
        *(self.get_mut)(downcast_mut::<T>(owner)) = converted;
        Ok(())
    }
}

/// Field holding another bridged struct, possibly embedded.
pub(crate) struct NestedField<T, E> {
    pub(crate) get: fn(&T) -> &E,
    pub(crate) get_mut: fn(&mut T) -> &mut E,
}

impl<T, E> Accessor for NestedField<T, E>
where
    T: Send + Sync + 'static,
    E: Bridged + Clone,
{
    fn get(&self, owner: &dyn Any) -> Value {
        Value::Managed(Managed::new((self.get)(downcast::<T>(owner)).clone()))
    }

    fn set(&self, owner: &mut dyn Any, value: Value) -> ConvertResult<()> {
        let target = (self.get_mut)(downcast_mut::<T>(owner));
        match value {
            Value::Managed(m) if m.is::<E>() => {
                if let Some(copy) = m.get::<E>() {
                    *target = copy;
                }
                Ok(())
            }
            Value::Map(map) => shape_of::<E>().unmarshal_map(target, map),
            Value::Dict(pairs) => shape_of::<E>().unmarshal_map(target, Map::from_pairs(pairs)),
            other => shape_of::<E>().unmarshal_custom(target, other),
        }
    }

    fn project<'a>(&self, owner: &'a dyn Any) -> Option<&'a dyn Any> {
        Some((self.get)(downcast::<T>(owner)))
    }

    fn project_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        Some((self.get_mut)(downcast_mut::<T>(owner)))
    }
}

/// Field holding native objects, exposed as a list property.
pub(crate) struct ObjectListField<T> {
    pub(crate) get: fn(&T) -> &Vec<ObjectRef>,
    pub(crate) get_mut: fn(&mut T) -> &mut Vec<ObjectRef>,
}

impl<T: Send + Sync + 'static> Accessor for ObjectListField<T> {
    fn get(&self, owner: &dyn Any) -> Value {
        (self.get)(downcast::<T>(owner)).to_value()
    }

    fn set(&self, owner: &mut dyn Any, value: Value) -> ConvertResult<()> {
        let converted = Vec::<ObjectRef>::from_value(value)?;
        *(self.get_mut)(downcast_mut::<T>(owner)) = converted;
        Ok(())
    }

    fn object_list<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut Vec<ObjectRef>> {
        Some((self.get_mut)(downcast_mut::<T>(owner)))
    }
}

/// Field that takes part in name shadowing but cannot be accessed.
pub(crate) struct HiddenField<T>(pub(crate) PhantomData<fn(&T)>);

impl<T: 'static> Accessor for HiddenField<T> {
    fn get(&self, _owner: &dyn Any) -> Value {
        Value::Nil
    }

    fn set(&self, _owner: &mut dyn Any, value: Value) -> ConvertResult<()> {
        Err(ConversionError::mismatch(value.type_name(), "unexported field"))
    }
}

// ============================================================================
// Fields and methods
// ============================================================================

/// One field of a bridged struct.
pub struct FieldShape {
    pub(crate) name: String,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) data_type: DataType,
    pub(crate) anonymous: bool,
    pub(crate) nested: Option<Arc<TypeShape>>,
    pub(crate) accessor: Arc<dyn Accessor>,
}

impl FieldShape {
    /// Declared name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset within the struct
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the field in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Data type advertised for the field
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// True for embedded fields whose own fields are promoted
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Exported fields start with an uppercase letter
    pub fn is_exported(&self) -> bool {
        is_exported(&self.name)
    }
}

impl fmt::Debug for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldShape")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("data_type", &self.data_type)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Erased method body: receives the receiver and the converted arguments.
pub(crate) type Invoker = Arc<dyn Fn(&Managed, Vec<Value>) -> BridgeResult<Vec<Value>> + Send + Sync>;

/// Declared parameter of a method.
#[derive(Debug, Clone)]
pub struct ParamShape {
    pub(crate) type_id: TypeId,
}

/// One method of a bridged type.
pub struct MethodShape {
    pub(crate) name: String,
    pub(crate) params: Vec<ParamShape>,
    pub(crate) num_out: usize,
    pub(crate) result_type: DataType,
    pub(crate) invoker: Invoker,
}

impl MethodShape {
    /// Declared name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parameters, receiver excluded
    pub fn num_in(&self) -> usize {
        self.params.len()
    }

    /// Number of results
    pub fn num_out(&self) -> usize {
        self.num_out
    }

    /// Exported methods start with an uppercase letter
    pub fn is_exported(&self) -> bool {
        is_exported(&self.name)
    }

    /// Call on `receiver` with already unpacked arguments.
    pub fn invoke(&self, receiver: &Managed, args: Vec<Value>) -> BridgeResult<Vec<Value>> {
        (self.invoker)(receiver, args)
    }
}

impl fmt::Debug for MethodShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodShape")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("num_out", &self.num_out)
            .finish()
    }
}

pub(crate) fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

// ============================================================================
// Capabilities
// ============================================================================

pub(crate) type RenderFn = Arc<dyn Fn(&dyn Any) -> String + Send + Sync>;
pub(crate) type ProduceFn = Arc<dyn Fn(&dyn Any) -> Value + Send + Sync>;
pub(crate) type AbsorbFn = Arc<dyn Fn(&mut dyn Any, Value) -> ConvertResult<()> + Send + Sync>;
pub(crate) type ConstructFn = Arc<dyn Fn() -> Managed + Send + Sync>;

/// Optional behavior attached to a shape.
#[derive(Clone, Default)]
pub(crate) struct Capabilities {
    /// String rendering
    pub stringer: Option<RenderFn>,
    /// Coercion to the underlying primitive value
    pub underlying: Option<ProduceFn>,
    /// Replacement value used when packing
    pub marshal: Option<ProduceFn>,
    /// Custom assignment from an arbitrary value
    pub unmarshal: Option<AbsorbFn>,
    /// Content equality
    pub eq: Option<fn(&dyn Any, &dyn Any) -> bool>,
    /// Content hash, consistent with `eq`
    pub hash: Option<fn(&dyn Any) -> u64>,
}

// ============================================================================
// TypeShape
// ============================================================================

/// Explicit description of a bridged type.
pub struct TypeShape {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) kind: Kind,
    pub(crate) size: usize,
    pub(crate) fields: Vec<FieldShape>,
    pub(crate) methods: Vec<MethodShape>,
    pub(crate) caps: Capabilities,
}

impl TypeShape {
    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type identity
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Underlying kind
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Size of the type in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Declared fields
    pub fn fields(&self) -> &[FieldShape] {
        &self.fields
    }

    /// Declared methods
    pub fn methods(&self) -> &[MethodShape] {
        &self.methods
    }

    /// Number of exported methods
    pub fn exported_methods(&self) -> usize {
        self.methods.iter().filter(|m| m.is_exported()).count()
    }

    pub(crate) fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// True if values can be identified by content
    pub fn is_comparable(&self) -> bool {
        self.caps.eq.is_some() && self.caps.hash.is_some()
    }

    fn field_at(&self, index: usize) -> &FieldShape {
        match self.fields.get(index) {
            Some(field) => field,
            None => fatal(format!("{} has no field {}", self.name, index)),
        }
    }

    /// Read the field at `path`.
    pub(crate) fn read_path(&self, data: &dyn Any, path: &[usize]) -> Value {
        let field = self.field_at(path[0]);
        if path.len() == 1 {
            return field.accessor.get(data);
        }
        match (&field.nested, field.accessor.project(data)) {
            (Some(nested), Some(inner)) => nested.read_path(inner, &path[1..]),
            _ => fatal(format!("field path {:?} of {} crosses a non-struct field", path, self.name)),
        }
    }

    /// Assign the field at `path`.
    pub(crate) fn write_path(&self, data: &mut dyn Any, path: &[usize], value: Value) -> ConvertResult<()> {
        let field = self.field_at(path[0]);
        if path.len() == 1 {
            return field.accessor.set(data, value);
        }
        match (&field.nested, field.accessor.project_mut(data)) {
            (Some(nested), Some(inner)) => nested.write_path(inner, &path[1..], value),
            _ => fatal(format!("field path {:?} of {} crosses a non-struct field", path, self.name)),
        }
    }

    /// Run `f` on the object-list field at `path`.
    pub(crate) fn with_object_list<R>(
        &self,
        data: &mut dyn Any,
        path: &[usize],
        f: impl FnOnce(&mut Vec<ObjectRef>) -> R,
    ) -> R {
        let field = self.field_at(path[0]);
        if path.len() == 1 {
            return match field.accessor.object_list(data) {
                Some(list) => f(list),
                None => fatal(format!("field {}.{} is not an object list", self.name, field.name)),
            };
        }
        match (&field.nested, field.accessor.project_mut(data)) {
            (Some(nested), Some(inner)) => nested.with_object_list(inner, &path[1..], f),
            _ => fatal(format!("field path {:?} of {} crosses a non-struct field", path, self.name)),
        }
    }

    /// Assign fields from a map keyed by lowered or declared field names.
    ///
    /// Keys naming no exported field are ignored.
    pub(crate) fn unmarshal_map(&self, data: &mut dyn Any, map: Map) -> ConvertResult<()> {
        for (key, value) in map.into_pairs() {
            let Some(key) = key.as_str() else {
                return Err(ConversionError::Incompatible {
                    from: "map".to_string(),
                    to: self.name.clone(),
                    reason: format!("incompatible key types: {} is not a field name", key.type_name()),
                });
            };
            let found = self.fields.iter().enumerate().find(|(_, f)| {
                f.is_exported() && (f.name == key || super::naming::lowered_name(&f.name) == key)
            });
            if let Some((index, _)) = found {
                self.write_path(data, &[index], value).map_err(|e| ConversionError::Incompatible {
                    from: "map".to_string(),
                    to: self.name.clone(),
                    reason: format!("field {}: {}", key, e),
                })?;
            }
        }
        Ok(())
    }

    /// Assign through the unmarshal capability, if any.
    pub(crate) fn unmarshal_custom(&self, data: &mut dyn Any, value: Value) -> ConvertResult<()> {
        match &self.caps.unmarshal {
            Some(unmarshal) => unmarshal(data, value),
            None => Err(ConversionError::mismatch(value.type_name(), self.name.clone())),
        }
    }

    /// Render through the stringer, if any.
    pub(crate) fn render(&self, data: &dyn Any) -> Option<String> {
        self.caps.stringer.as_ref().map(|f| f(data))
    }

    /// Coerce to the underlying primitive value, if possible.
    pub(crate) fn underlying(&self, data: &dyn Any) -> Option<Value> {
        self.caps.underlying.as_ref().map(|f| f(data))
    }
}

impl fmt::Debug for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeShape")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}

// ============================================================================
// Bridged types and the shape cache
// ============================================================================

/// A Rust type that can be handed to the native side.
///
/// ```ignore
/// #[derive(Default)]
/// struct Counter { count: i32 }
///
/// impl Bridged for Counter {
///     fn shape() -> TypeShape {
///         TypeShape::builder::<Counter>("Counter")
///             .field("Count", offset_of!(Counter, count), |c| &c.count, |c| &mut c.count)
///             .method1("SetCount", |c: &mut Counter, n: i32| c.count = n)
///             .build()
///     }
/// }
/// ```
pub trait Bridged: Any + Send + Sync + Sized {
    /// Describe the type. Called once per process.
    fn shape() -> TypeShape;
}

static SHAPES: Lazy<DashMap<TypeId, Arc<TypeShape>>> = Lazy::new(DashMap::new);

/// Cached shape of `T`.
pub fn shape_of<T: Bridged>() -> Arc<TypeShape> {
    let id = TypeId::of::<T>();
    if let Some(shape) = SHAPES.get(&id) {
        return shape.clone();
    }
    // Built outside the map so nested shapes can be resolved recursively.
    let built = Arc::new(T::shape());
    SHAPES.entry(id).or_insert(built).clone()
}

/// Constructor producing a fresh shared default value of `T`.
pub(crate) fn constructor<T: Bridged + Default>() -> ConstructFn {
    Arc::new(|| Managed::new(T::default()))
}
