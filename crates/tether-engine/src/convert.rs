//! Conversion traits between Rust types and [`Value`]
//!
//! `ToValue` describes how a field or result is exposed, `FromValue` is the
//! assignment conversion applied to field writes, setter arguments and method
//! parameters.
//!
//! Numbers convert freely between numeric kinds. Lists convert element by
//! element into `Vec<T>`, maps convert key and value by key and value into
//! map types. Anything else must match the destination type.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use tether_sdk::{ConversionError, ConvertResult, DataType, Rgba};

use crate::value::{List, Managed, Map, ObjectRef, Painter, Value};

// ============================================================================
// Traits
// ============================================================================

/// Expose a Rust value as a [`Value`].
pub trait ToValue {
    /// Member data type advertised in descriptors
    const DATA_TYPE: DataType = DataType::Object;

    /// Produce the managed value
    fn to_value(&self) -> Value;
}

/// Assign a [`Value`] to a Rust type.
pub trait FromValue: Sized {
    /// Convert, or explain why the value does not fit
    fn from_value(value: Value) -> ConvertResult<Self>;
}

/// Results of a bridged method: nothing, one value, or a tuple.
pub trait Returns {
    /// Number of declared results
    const NUM_OUT: usize;

    /// Data type of a single result
    const DATA_TYPE: DataType;

    /// Flatten into result values
    fn into_values(self) -> Vec<Value>;
}

impl Returns for () {
    const NUM_OUT: usize = 0;
    const DATA_TYPE: DataType = DataType::Invalid;

    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

impl<T: ToValue> Returns for T {
    const NUM_OUT: usize = 1;
    const DATA_TYPE: DataType = T::DATA_TYPE;

    fn into_values(self) -> Vec<Value> {
        vec![self.to_value()]
    }
}

impl<A: ToValue, B: ToValue> Returns for (A, B) {
    const NUM_OUT: usize = 2;
    const DATA_TYPE: DataType = DataType::List;

    fn into_values(self) -> Vec<Value> {
        vec![self.0.to_value(), self.1.to_value()]
    }
}

impl<A: ToValue, B: ToValue, C: ToValue> Returns for (A, B, C) {
    const NUM_OUT: usize = 3;
    const DATA_TYPE: DataType = DataType::List;

    fn into_values(self) -> Vec<Value> {
        vec![self.0.to_value(), self.1.to_value(), self.2.to_value()]
    }
}

fn mismatch<T>(value: &Value) -> ConversionError {
    ConversionError::mismatch(value.type_name(), short_type_name::<T>())
}

/// Type name without module paths, e.g. `Vec<i32>`.
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for c in full.chars() {
        match c {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                out.push_str(&segment);
                segment.clear();
                out.push(c);
            }
            _ => segment.push(c),
        }
    }
    out.push_str(&segment);
    out
}

// ============================================================================
// Numbers
// ============================================================================

macro_rules! numeric_conversions {
    ($($ty:ty => $variant:ident, $tag:ident);* $(;)?) => {
        $(
            impl ToValue for $ty {
                const DATA_TYPE: DataType = DataType::$tag;

                fn to_value(&self) -> Value {
                    Value::$variant(*self as _)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> ConvertResult<Self> {
                    Ok(match value {
                        Value::I8(n) => n as $ty,
                        Value::I16(n) => n as $ty,
                        Value::I32(n) => n as $ty,
                        Value::I64(n) => n as $ty,
                        Value::U8(n) => n as $ty,
                        Value::U16(n) => n as $ty,
                        Value::U32(n) => n as $ty,
                        Value::U64(n) => n as $ty,
                        Value::Uintptr(n) => n as $ty,
                        Value::F32(n) => n as $ty,
                        Value::F64(n) => n as $ty,
                        other => return Err(mismatch::<$ty>(&other)),
                    })
                }
            }
        )*
    };
}

numeric_conversions! {
    i8 => I8, NumberI;
    i16 => I16, NumberI;
    i32 => I32, NumberI;
    i64 => I64, Number;
    isize => I64, Number;
    u8 => U8, NumberU;
    u16 => U16, NumberU;
    u32 => U32, NumberU;
    u64 => U64, Number;
    usize => U64, Number;
    f32 => F32, Number;
    f64 => F64, Number;
}

// ============================================================================
// Scalars
// ============================================================================

impl ToValue for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch::<bool>(&other)),
        }
    }
}

impl ToValue for String {
    const DATA_TYPE: DataType = DataType::String;

    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl ToValue for str {
    const DATA_TYPE: DataType = DataType::String;

    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for &'static str {
    const DATA_TYPE: DataType = DataType::String;

    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch::<String>(&other)),
        }
    }
}

impl ToValue for DateTime<Utc> {
    const DATA_TYPE: DataType = DataType::Time;

    fn to_value(&self) -> Value {
        Value::Time(*self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Time(t) => Ok(t),
            other => Err(mismatch::<DateTime<Utc>>(&other)),
        }
    }
}

impl ToValue for Rgba {
    const DATA_TYPE: DataType = DataType::Color;

    fn to_value(&self) -> Value {
        Value::Color(*self)
    }
}

impl FromValue for Rgba {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Color(c) => Ok(c),
            other => Err(mismatch::<Rgba>(&other)),
        }
    }
}

// ============================================================================
// References
// ============================================================================

impl ToValue for ObjectRef {
    fn to_value(&self) -> Value {
        Value::Object(*self)
    }
}

impl FromValue for ObjectRef {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Object(obj) => Ok(obj),
            Value::Painter(p) => Ok(p.object),
            other => Err(mismatch::<ObjectRef>(&other)),
        }
    }
}

impl ToValue for Painter {
    fn to_value(&self) -> Value {
        Value::Painter(*self)
    }
}

impl FromValue for Painter {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Painter(p) => Ok(p),
            other => Err(mismatch::<Painter>(&other)),
        }
    }
}

impl ToValue for Managed {
    fn to_value(&self) -> Value {
        Value::Managed(self.clone())
    }
}

impl FromValue for Managed {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Managed(m) => Ok(m),
            // A bare handle has no struct to assign the fields into.
            Value::Map(_) | Value::Dict(_) => Err(ConversionError::NotAddressable {
                to: short_type_name::<Managed>(),
            }),
            other => Err(mismatch::<Managed>(&other)),
        }
    }
}

impl ToValue for Value {
    const DATA_TYPE: DataType = DataType::Any;

    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> ConvertResult<Self> {
        Ok(value)
    }
}

// ============================================================================
// Containers
// ============================================================================

impl ToValue for List {
    const DATA_TYPE: DataType = DataType::List;

    fn to_value(&self) -> Value {
        Value::List(self.clone())
    }
}

impl FromValue for List {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::List(list) => Ok(list),
            Value::Seq(items) => Ok(List::new(items)),
            other => Err(mismatch::<List>(&other)),
        }
    }
}

impl ToValue for Map {
    const DATA_TYPE: DataType = DataType::Map;

    fn to_value(&self) -> Value {
        Value::Map(self.clone())
    }
}

impl FromValue for Map {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Map(map) => Ok(map),
            Value::Dict(pairs) => Ok(Map::from_pairs(pairs)),
            other => Err(mismatch::<Map>(&other)),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    const DATA_TYPE: DataType = T::DATA_TYPE;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Nil,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> ConvertResult<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    const DATA_TYPE: DataType = DataType::List;

    fn to_value(&self) -> Value {
        Value::Seq(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> ConvertResult<Self> {
        let (from, items) = match value {
            Value::List(list) => ("list", list.data),
            Value::Seq(items) => ("sequence", items),
            other => return Err(mismatch::<Vec<T>>(&other)),
        };
        items
            .into_iter()
            .map(T::from_value)
            .collect::<ConvertResult<Vec<T>>>()
            .map_err(|e| ConversionError::Incompatible {
                from: from.to_string(),
                to: short_type_name::<Vec<T>>(),
                reason: format!("incompatible element types: {}", e),
            })
    }
}

fn map_pairs<M>(value: Value) -> ConvertResult<Vec<(Value, Value)>> {
    match value {
        Value::Map(map) => Ok(map.into_pairs()),
        Value::Dict(pairs) => Ok(pairs),
        other => Err(mismatch::<M>(&other)),
    }
}

fn convert_pairs<K: FromValue, V: FromValue, M>(value: Value) -> ConvertResult<Vec<(K, V)>> {
    let pairs = map_pairs::<M>(value)?;
    let mut out = Vec::with_capacity(pairs.len());
    for (k, v) in pairs {
        let key = K::from_value(k).map_err(|e| ConversionError::Incompatible {
            from: "map".to_string(),
            to: short_type_name::<M>(),
            reason: format!("incompatible key types: {}", e),
        })?;
        let value = V::from_value(v).map_err(|e| ConversionError::Incompatible {
            from: "map".to_string(),
            to: short_type_name::<M>(),
            reason: format!("incompatible value types: {}", e),
        })?;
        out.push((key, value));
    }
    Ok(out)
}

impl<K: ToValue, V: ToValue, S> ToValue for HashMap<K, V, S> {
    const DATA_TYPE: DataType = DataType::Map;

    fn to_value(&self) -> Value {
        Value::Dict(self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect())
    }
}

impl<K, V, S> FromValue for HashMap<K, V, S>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
    S: std::hash::BuildHasher + Default,
{
    fn from_value(value: Value) -> ConvertResult<Self> {
        Ok(convert_pairs::<K, V, Self>(value)?.into_iter().collect())
    }
}

impl<K: ToValue, V: ToValue> ToValue for BTreeMap<K, V> {
    const DATA_TYPE: DataType = DataType::Map;

    fn to_value(&self) -> Value {
        Value::Dict(self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect())
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: Value) -> ConvertResult<Self> {
        Ok(convert_pairs::<K, V, Self>(value)?.into_iter().collect())
    }
}
