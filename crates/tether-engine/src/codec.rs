//! Packing and unpacking of tagged values
//!
//! Managed values cross into the native runtime as [`TaggedValue`]s. Wrapped
//! values travel as the handle of their native wrapper. On the way back
//! either the wrapper handle or the bridge record may arrive; both resolve
//! through the registry.

use chrono::{TimeZone, Utc};
use tether_sdk::{ConversionError, EngineAddr, NativeHandle, Ownership, Rgba, TaggedValue, MAX_SAFE_INTEGER};

use crate::bridge::Bridge;
use crate::defaults::{PLAIN_OBJECT_TYPE, PLAIN_TYPE_PROPERTY};
use crate::fatal::fatal;
use crate::reflect::Kind;
use crate::value::{List, Managed, Map, ObjectRef, Value};
use crate::{BridgeError, BridgeResult};

fn check_i64(n: i64) -> f64 {
    if !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n) {
        fatal(format!("value {} does not fit in a double without losing precision", n));
    }
    n as f64
}

fn check_u64(n: u64) -> f64 {
    if n > MAX_SAFE_INTEGER as u64 {
        fatal(format!("value {} does not fit in a double without losing precision", n));
    }
    n as f64
}

/// Strip reference markers and qualifiers from a declared type name.
pub(crate) fn plain_type_name(declared: &str) -> &str {
    let trimmed = declared.trim_matches(|c| c == '&' || c == '*');
    trimmed.strip_prefix("const ").unwrap_or(trimmed)
}

impl Bridge {
    // ========================================================================
    // Packing
    // ========================================================================

    /// Pack `value` for the native side.
    ///
    /// Wrapped values are allocated in `engine` with the given ownership.
    pub(crate) fn pack(&self, value: &Value, engine: Option<EngineAddr>, owner: Ownership) -> BridgeResult<TaggedValue> {
        let packed = match value {
            Value::Nil => TaggedValue::Invalid,
            Value::Bool(b) => TaggedValue::Bool(*b),
            Value::I8(n) => TaggedValue::NumberI(*n as i32),
            Value::I16(n) => TaggedValue::NumberI(*n as i32),
            Value::I32(n) => TaggedValue::NumberI(*n),
            Value::I64(n) => TaggedValue::Number(check_i64(*n)),
            Value::U8(n) => TaggedValue::NumberU(*n as u32),
            Value::U16(n) => TaggedValue::NumberU(*n as u32),
            Value::U32(n) => TaggedValue::NumberU(*n),
            Value::U64(n) => TaggedValue::Number(check_u64(*n)),
            Value::Uintptr(p) => TaggedValue::Uintptr(*p),
            Value::F32(f) => TaggedValue::Number(*f as f64),
            Value::F64(f) => TaggedValue::Number(*f),
            Value::Str(s) => TaggedValue::string(s.as_str()),
            Value::Time(t) => TaggedValue::Time(t.timestamp_millis()),
            Value::Color(c) => TaggedValue::Color(c.to_argb()),
            Value::Object(obj) => TaggedValue::Object(obj.handle),
            Value::Painter(painter) => TaggedValue::Object(painter.object.handle),
            Value::List(list) => self.pack_list(&list.data, engine, owner)?,
            Value::Seq(items) => self.pack_list(items, engine, owner)?,
            Value::Map(map) => self.pack_map(map.pairs(), engine, owner)?,
            Value::Dict(pairs) => self.pack_map(pairs.iter().map(|(k, v)| (k, v)), engine, owner)?,
            Value::Managed(managed) => self.pack_managed(managed, engine, owner)?,
        };
        Ok(packed)
    }

    fn pack_list(&self, items: &[Value], engine: Option<EngineAddr>, owner: Ownership) -> BridgeResult<TaggedValue> {
        let packed = items
            .iter()
            .map(|item| self.pack(item, engine, owner))
            .collect::<BridgeResult<Vec<_>>>()?;
        Ok(TaggedValue::List(packed.into_boxed_slice()))
    }

    fn pack_map<'a>(
        &self,
        pairs: impl Iterator<Item = (&'a Value, &'a Value)>,
        engine: Option<EngineAddr>,
        owner: Ownership,
    ) -> BridgeResult<TaggedValue> {
        let mut flat = Vec::new();
        for (key, value) in pairs {
            flat.push(self.pack_key(key)?);
            flat.push(self.pack(value, engine, owner)?);
        }
        Ok(TaggedValue::Map(flat.into_boxed_slice()))
    }

    fn pack_key(&self, key: &Value) -> BridgeResult<TaggedValue> {
        match key {
            Value::Str(s) => Ok(TaggedValue::string(s.as_str())),
            Value::Managed(m) => {
                let rendered = {
                    let data = m.read_any();
                    m.shape().render(&*data)
                };
                match rendered {
                    Some(s) => Ok(TaggedValue::string(s)),
                    None => Err(ConversionError::MapKey { key: m.type_name().to_string() }.into()),
                }
            }
            Value::Bool(_)
            | Value::I8(_)
            | Value::I16(_)
            | Value::I32(_)
            | Value::I64(_)
            | Value::U8(_)
            | Value::U16(_)
            | Value::U32(_)
            | Value::U64(_)
            | Value::F32(_)
            | Value::F64(_) => Ok(TaggedValue::string(key.to_string())),
            other => Err(ConversionError::MapKey { key: other.type_name() }.into()),
        }
    }

    fn pack_managed(&self, managed: &Managed, engine: Option<EngineAddr>, owner: Ownership) -> BridgeResult<TaggedValue> {
        let shape = managed.shape().clone();
        if let Some(marshal) = &shape.caps().marshal {
            let replaced = {
                let data = managed.read_any();
                marshal(&*data)
            };
            return self.pack(&replaced, engine, owner);
        }
        if shape.kind() == Kind::Struct || shape.exported_methods() > 0 {
            let Some(engine) = engine else {
                fatal(format!("cannot hand {} to native logic without an engine", shape.name()))
            };
            return Ok(TaggedValue::Object(self.wrap_value(engine, managed, owner)));
        }
        let underlying = {
            let data = managed.read_any();
            shape.underlying(&*data)
        };
        match underlying {
            Some(primitive) => self.pack(&primitive, engine, owner),
            None => Err(BridgeError::Unsupported(format!(
                "{} of kind {:?} has no native representation",
                shape.name(),
                shape.kind()
            ))),
        }
    }

    // ========================================================================
    // Unpacking
    // ========================================================================

    /// Unpack a value received from the native side.
    pub(crate) fn unpack(&self, tagged: TaggedValue, engine: Option<EngineAddr>) -> BridgeResult<Value> {
        let value = match tagged {
            TaggedValue::Invalid => Value::Nil,
            TaggedValue::String(s) => Value::Str(s.into_string()),
            TaggedValue::Bool(b) => Value::Bool(b),
            TaggedValue::Number(f) => Value::F64(f),
            TaggedValue::NumberI(n) => Value::I32(n),
            TaggedValue::NumberU(n) => Value::U32(n),
            TaggedValue::Uintptr(p) => Value::Uintptr(p),
            TaggedValue::Color(argb) => Value::Color(Rgba::from_argb(argb)),
            TaggedValue::Time(ms) => match Utc.timestamp_millis_opt(ms).single() {
                Some(t) => Value::Time(t),
                None => return Err(ConversionError::Custom(format!("time {}ms is out of range", ms)).into()),
            },
            TaggedValue::Object(handle) => self.unpack_object(handle, engine),
            TaggedValue::Record(record) => Value::Managed(self.ensure_engine(engine, record).value),
            TaggedValue::List(items) => {
                let data = items
                    .into_vec()
                    .into_iter()
                    .map(|item| self.unpack(item, engine))
                    .collect::<BridgeResult<Vec<_>>>()?;
                Value::List(List::new(data))
            }
            TaggedValue::Map(flat) => {
                let data = flat
                    .into_vec()
                    .into_iter()
                    .map(|item| self.unpack(item, engine))
                    .collect::<BridgeResult<Vec<_>>>()?;
                if data.len() % 2 != 0 {
                    return Err(BridgeError::Unsupported(format!("map with {} flat entries", data.len())));
                }
                Value::Map(Map::new(data))
            }
            TaggedValue::ListProperty(_) => {
                return Err(BridgeError::Unsupported("list properties cannot be read back".to_string()))
            }
        };
        Ok(value)
    }

    fn unpack_object(&self, handle: NativeHandle, engine: Option<EngineAddr>) -> Value {
        // Wrappers of managed values come back as the value itself.
        let record = self.registry.lock().record_for(handle);
        if let Some(record) = record {
            return Value::Managed(self.ensure_engine(engine, record).value);
        }
        let object = ObjectRef::new(engine, handle);
        if !self.has_converters() {
            return Value::Object(object);
        }
        let mut type_name = self.runtime().object_type_name(handle);
        if type_name == PLAIN_OBJECT_TYPE {
            if let Some(declared) = self.runtime().object_property(handle, PLAIN_TYPE_PROPERTY).as_str() {
                type_name = plain_type_name(declared).to_string();
            }
        }
        match self.converter(&type_name) {
            Some(convert) => convert(object),
            None => Value::Object(object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_type_name() {
        assert_eq!(plain_type_name("Point"), "Point");
        assert_eq!(plain_type_name("Point*"), "Point");
        assert_eq!(plain_type_name("&Point"), "Point");
        assert_eq!(plain_type_name("const Point&"), "Point");
    }

    #[test]
    fn test_range_checks() {
        assert_eq!(check_i64(MAX_SAFE_INTEGER), MAX_SAFE_INTEGER as f64);
        assert_eq!(check_i64(-MAX_SAFE_INTEGER), -(MAX_SAFE_INTEGER as f64));
        assert_eq!(check_u64(42), 42.0);
    }

    #[test]
    #[should_panic(expected = "without losing precision")]
    fn test_i64_out_of_range() {
        check_i64(MAX_SAFE_INTEGER + 1);
    }

    #[test]
    #[should_panic(expected = "without losing precision")]
    fn test_u64_out_of_range() {
        check_u64(u64::MAX);
    }
}
