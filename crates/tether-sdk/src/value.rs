//! Wire values crossing the native boundary
//!
//! Every argument, result and property value exchanged with the native
//! runtime travels as a [`TaggedValue`]. The discriminant of each variant is
//! a [`DataType`] tag, which is also what the descriptor tables advertise for
//! fields and properties.
//!
//! ```text
//! Invalid       absent value (null/undefined on the script side)
//! String        UTF-8 bytes owned by a native buffer
//! Bool          boolean
//! NumberI       signed 32-bit integer
//! NumberU       unsigned 32-bit integer
//! Number        double (also the carrier for 64-bit integers)
//! Time          milliseconds since the Unix epoch
//! Color         packed ARGB
//! Uintptr       raw native pointer handle
//! Object        native object reference
//! Record        bridge record of a wrapped managed value
//! List/Map      contiguous buffers (maps are flat key, value pairs)
//! ListProperty  native list-property over a managed object list
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ListPropertyRef, NativeHandle, RecordId};

// ============================================================================
// DataType
// ============================================================================

/// Data-type tag of a [`TaggedValue`] or of a described member.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type could not be determined
    Unknown = 0,
    /// Absent value
    Invalid = 1,

    /// UTF-8 string
    String = 10,
    /// Boolean
    Bool = 11,
    /// Double-precision number
    Number = 12,
    /// Signed 32-bit integer
    NumberI = 13,
    /// Unsigned 32-bit integer
    NumberU = 14,
    /// Native pointer handle
    Uintptr = 15,
    /// ARGB color
    Color = 16,
    /// Time instant
    Time = 17,

    /// Native object reference
    Object = 100,
    /// Bridge record reference
    Record = 101,
    /// Ordered list
    List = 102,
    /// Key/value map
    Map = 103,
    /// List property over a managed object list
    ListProperty = 104,

    /// Any value (generic member type)
    Any = 200,
    /// Callable method member
    Method = 201,
}

impl DataType {
    const ALL: [DataType; 17] = [
        DataType::Unknown,
        DataType::Invalid,
        DataType::String,
        DataType::Bool,
        DataType::Number,
        DataType::NumberI,
        DataType::NumberU,
        DataType::Uintptr,
        DataType::Color,
        DataType::Time,
        DataType::Object,
        DataType::Record,
        DataType::List,
        DataType::Map,
        DataType::ListProperty,
        DataType::Any,
        DataType::Method,
    ];

    /// Look up a tag by its raw wire discriminant.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as i32 == raw)
    }

    /// Printable name of the tag.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Unknown => "Unknown",
            DataType::Invalid => "Invalid",
            DataType::String => "String",
            DataType::Bool => "Bool",
            DataType::Number => "Number",
            DataType::NumberI => "NumberI",
            DataType::NumberU => "NumberU",
            DataType::Uintptr => "Uintptr",
            DataType::Color => "Color",
            DataType::Time => "Time",
            DataType::Object => "Object",
            DataType::Record => "Record",
            DataType::List => "List",
            DataType::Map => "Map",
            DataType::ListProperty => "ListProperty",
            DataType::Any => "Any",
            DataType::Method => "Method",
        }
    }

    /// Render a raw discriminant, falling back to `DataType(<n>)`.
    pub fn describe_raw(raw: i32) -> String {
        match Self::from_raw(raw) {
            Some(tag) => tag.name().to_string(),
            None => format!("DataType({})", raw),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// NativeString
// ============================================================================

/// String buffer allocated by the native side.
///
/// The buffer is only valid for the duration of the call that produced it.
/// [`NativeString::into_string`] copies the bytes out and releases the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct NativeString {
    bytes: Box<[u8]>,
}

impl NativeString {
    /// Create a buffer from raw bytes.
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Raw bytes of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy the contents into an owned string and release the buffer.
    ///
    /// Invalid UTF-8 sequences are replaced.
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl From<&str> for NativeString {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for NativeString {
    fn from(s: String) -> Self {
        Self::from_bytes(s.into_bytes())
    }
}

impl fmt::Debug for NativeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))
    }
}

// ============================================================================
// TaggedValue
// ============================================================================

/// Value exchanged with the native runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    /// Absent value
    Invalid,
    /// Native-owned UTF-8 buffer
    String(NativeString),
    /// Boolean
    Bool(bool),
    /// Double-precision number
    Number(f64),
    /// Signed 32-bit integer
    NumberI(i32),
    /// Unsigned 32-bit integer
    NumberU(u32),
    /// Native pointer handle
    Uintptr(usize),
    /// Packed ARGB color
    Color(u32),
    /// Milliseconds since the Unix epoch
    Time(i64),
    /// Native object reference
    Object(NativeHandle),
    /// Bridge record of a wrapped managed value
    Record(RecordId),
    /// Ordered list
    List(Box<[TaggedValue]>),
    /// Flat key, value pairs
    Map(Box<[TaggedValue]>),
    /// List property over a managed object list
    ListProperty(ListPropertyRef),
}

impl TaggedValue {
    /// Shorthand for a string value.
    pub fn string(s: impl Into<NativeString>) -> Self {
        TaggedValue::String(s.into())
    }

    /// The data-type tag of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            TaggedValue::Invalid => DataType::Invalid,
            TaggedValue::String(_) => DataType::String,
            TaggedValue::Bool(_) => DataType::Bool,
            TaggedValue::Number(_) => DataType::Number,
            TaggedValue::NumberI(_) => DataType::NumberI,
            TaggedValue::NumberU(_) => DataType::NumberU,
            TaggedValue::Uintptr(_) => DataType::Uintptr,
            TaggedValue::Color(_) => DataType::Color,
            TaggedValue::Time(_) => DataType::Time,
            TaggedValue::Object(_) => DataType::Object,
            TaggedValue::Record(_) => DataType::Record,
            TaggedValue::List(_) => DataType::List,
            TaggedValue::Map(_) => DataType::Map,
            TaggedValue::ListProperty(_) => DataType::ListProperty,
        }
    }

    /// Check if the value is absent.
    pub fn is_invalid(&self) -> bool {
        matches!(self, TaggedValue::Invalid)
    }

    /// Borrow the string bytes as `&str` when valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s) => std::str::from_utf8(s.as_bytes()).ok(),
            _ => None,
        }
    }

    /// Native object handle, if this is an object reference.
    pub fn as_object(&self) -> Option<NativeHandle> {
        match self {
            TaggedValue::Object(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl Default for TaggedValue {
    fn default() -> Self {
        TaggedValue::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_names() {
        assert_eq!(DataType::NumberI.to_string(), "NumberI");
        assert_eq!(DataType::ListProperty.to_string(), "ListProperty");
        assert_eq!(DataType::describe_raw(12), "Number");
        assert_eq!(DataType::describe_raw(7), "DataType(7)");
        assert_eq!(DataType::describe_raw(300), "DataType(300)");
    }

    #[test]
    fn test_data_type_groups() {
        assert_eq!(DataType::Unknown as i32, 0);
        assert_eq!(DataType::String as i32, 10);
        assert_eq!(DataType::Object as i32, 100);
        assert_eq!(DataType::Any as i32, 200);
        for tag in DataType::ALL {
            assert_eq!(DataType::from_raw(tag as i32), Some(tag));
        }
    }

    #[test]
    fn test_tagged_value_data_type() {
        assert_eq!(TaggedValue::Invalid.data_type(), DataType::Invalid);
        assert_eq!(TaggedValue::string("hi").data_type(), DataType::String);
        assert_eq!(TaggedValue::Time(0).data_type(), DataType::Time);
        assert_eq!(
            TaggedValue::List(vec![TaggedValue::Bool(true)].into()).data_type(),
            DataType::List
        );
        assert!(TaggedValue::default().is_invalid());
    }

    #[test]
    fn test_native_string_copy_out() {
        let s = NativeString::from("héllo");
        assert_eq!(s.len(), 6);
        assert_eq!(s.into_string(), "héllo");

        let bad = NativeString::from_bytes(vec![0x66, 0xff, 0x6f]);
        assert_eq!(bad.into_string(), "f\u{fffd}o");
    }

    #[test]
    fn test_as_str() {
        assert_eq!(TaggedValue::string("abc").as_str(), Some("abc"));
        assert_eq!(TaggedValue::Bool(true).as_str(), None);
    }

    #[test]
    fn test_data_type_serde() {
        let json = serde_json::to_string(&DataType::Color).unwrap();
        assert_eq!(json, "\"Color\"");
        let back: DataType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DataType::Color);
    }
}
