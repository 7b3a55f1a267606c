//! Managed-side dynamically typed values
//!
//! [`Value`] is what flows through method calls, field accessors and the
//! codec on the managed side. Native objects appear as [`ObjectRef`],
//! bridged managed data as [`Managed`].

mod managed;

pub use managed::Managed;
pub(crate) use managed::ValueKey;

use std::fmt;

use chrono::{DateTime, Utc};
use tether_sdk::{EngineAddr, NativeHandle, Rgba};

use crate::convert::FromValue;
use tether_sdk::ConvertResult;

// ============================================================================
// Value
// ============================================================================

/// Dynamically typed managed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 8-bit unsigned integer
    U8(u8),
    /// 16-bit unsigned integer
    U16(u16),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit unsigned integer
    U64(u64),
    /// Raw native pointer handle
    Uintptr(usize),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// String
    Str(String),
    /// Time instant
    Time(DateTime<Utc>),
    /// Color
    Color(Rgba),
    /// Native object
    Object(ObjectRef),
    /// Render-callback painter
    Painter(Painter),
    /// List received from the native side
    List(List),
    /// Map received from the native side
    Map(Map),
    /// Managed ordered sequence
    Seq(Vec<Value>),
    /// Managed key/value pairs
    Dict(Vec<(Value, Value)>),
    /// Bridged managed data
    Managed(Managed),
}

impl Value {
    /// Type name used in conversion errors.
    pub fn type_name(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::I8(_) => "i8".to_string(),
            Value::I16(_) => "i16".to_string(),
            Value::I32(_) => "i32".to_string(),
            Value::I64(_) => "i64".to_string(),
            Value::U8(_) => "u8".to_string(),
            Value::U16(_) => "u16".to_string(),
            Value::U32(_) => "u32".to_string(),
            Value::U64(_) => "u64".to_string(),
            Value::Uintptr(_) => "uintptr".to_string(),
            Value::F32(_) => "f32".to_string(),
            Value::F64(_) => "f64".to_string(),
            Value::Str(_) => "String".to_string(),
            Value::Time(_) => "DateTime".to_string(),
            Value::Color(_) => "Rgba".to_string(),
            Value::Object(_) => "Object".to_string(),
            Value::Painter(_) => "Painter".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::Seq(_) => "Vec<Value>".to_string(),
            Value::Dict(_) => "Dict".to_string(),
            Value::Managed(m) => m.type_name().to_string(),
        }
    }

    /// Check if the value is absent
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`, for any numeric variant
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::I8(n) => n as f64,
            Value::I16(n) => n as f64,
            Value::I32(n) => n as f64,
            Value::I64(n) => n as f64,
            Value::U8(n) => n as f64,
            Value::U16(n) => n as f64,
            Value::U32(n) => n as f64,
            Value::U64(n) => n as f64,
            Value::Uintptr(n) => n as f64,
            Value::F32(n) => n as f64,
            Value::F64(n) => n,
            _ => return None,
        })
    }

    /// Borrow as native object
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Borrow as bridged managed data
    pub fn as_managed(&self) -> Option<&Managed> {
        match self {
            Value::Managed(m) => Some(m),
            _ => None,
        }
    }

    /// Convert into a concrete type
    pub fn convert<T: FromValue>(self) -> ConvertResult<T> {
        T::from_value(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("<nil>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I8(n) => write!(f, "{}", n),
            Value::I16(n) => write!(f, "{}", n),
            Value::I32(n) => write!(f, "{}", n),
            Value::I64(n) => write!(f, "{}", n),
            Value::U8(n) => write!(f, "{}", n),
            Value::U16(n) => write!(f, "{}", n),
            Value::U32(n) => write!(f, "{}", n),
            Value::U64(n) => write!(f, "{}", n),
            Value::Uintptr(n) => write!(f, "{:#x}", n),
            Value::F32(n) => write!(f, "{}", n),
            Value::F64(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::Time(t) => write!(f, "{}", t),
            Value::Color(c) => write!(f, "#{:08x}", c.to_argb()),
            Value::Object(obj) => write!(f, "{}", obj.handle),
            Value::Painter(p) => write!(f, "Painter({})", p.object.handle),
            Value::List(list) => write_seq(f, &list.data),
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.pairs().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Seq(items) => write_seq(f, items),
            Value::Dict(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Managed(m) => write!(f, "{}", m.type_name()),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

// ============================================================================
// Native references
// ============================================================================

/// Reference to an object living on the native side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Engine the object was received through
    pub engine: Option<EngineAddr>,
    /// Native handle
    pub handle: NativeHandle,
}

impl ObjectRef {
    /// Create a reference
    pub fn new(engine: Option<EngineAddr>, handle: NativeHandle) -> Self {
        Self { engine, handle }
    }
}

/// Handed to paint methods while the render callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Painter {
    /// Engine of the painted object
    pub engine: EngineAddr,
    /// The painted object
    pub object: ObjectRef,
}

// ============================================================================
// Containers received from the native side
// ============================================================================

/// Ordered list unpacked from the native side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    pub(crate) data: Vec<Value>,
}

impl List {
    /// Create a list from already unpacked elements
    pub fn new(data: Vec<Value>) -> Self {
        Self { data }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the list has no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.data.get(index)
    }

    /// Iterate over the elements
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.data.iter()
    }

    /// Convert every element into `T`
    pub fn convert<T: FromValue>(&self) -> ConvertResult<Vec<T>> {
        self.data.iter().cloned().map(T::from_value).collect()
    }

    /// Take the elements
    pub fn into_vec(self) -> Vec<Value> {
        self.data
    }
}

/// Key/value map unpacked from the native side.
///
/// Stored as flat key, value pairs in native order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Map {
    pub(crate) data: Vec<Value>,
}

impl Map {
    /// Create a map from flat key, value pairs
    pub fn new(data: Vec<Value>) -> Self {
        Self { data }
    }

    /// Create a map from pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut data = Vec::new();
        for (k, v) in pairs {
            data.push(k);
            data.push(v);
        }
        Self { data }
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.data.len() / 2
    }

    /// True when the map has no pairs
    pub fn is_empty(&self) -> bool {
        self.data.len() < 2
    }

    /// Iterate over the pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.data.chunks_exact(2).map(|pair| (&pair[0], &pair[1]))
    }

    /// Value stored under a string key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.pairs()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Take the pairs
    pub fn into_pairs(self) -> Vec<(Value, Value)> {
        let mut pairs = Vec::with_capacity(self.len());
        let mut it = self.data.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            pairs.push((k, v));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::I32(1).type_name(), "i32");
        assert_eq!(Value::Str("x".into()).type_name(), "String");
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::List(List::default()).type_name(), "List");
    }

    #[test]
    fn test_as_f64_widening() {
        assert_eq!(Value::I8(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::U64(7).as_f64(), Some(7.0));
        assert_eq!(Value::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_map_pairs() {
        let map = Map::from_pairs(vec![
            (Value::Str("a".into()), Value::I32(1)),
            (Value::Str("b".into()), Value::I32(2)),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("b"), Some(&Value::I32(2)));
        assert_eq!(map.get("c"), None);
        let pairs = map.into_pairs();
        assert_eq!(pairs[0].0, Value::Str("a".into()));
    }

    #[test]
    fn test_display() {
        let list = Value::Seq(vec![Value::I32(1), Value::Str("x".into())]);
        assert_eq!(list.to_string(), "[1, x]");
        let dict = Value::Dict(vec![(Value::Str("k".into()), Value::Bool(false))]);
        assert_eq!(dict.to_string(), "{k: false}");
        assert_eq!(Value::Color(Rgba::new(1, 2, 3, 255)).to_string(), "#ff010203");
    }
}
