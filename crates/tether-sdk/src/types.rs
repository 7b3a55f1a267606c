//! Identifiers and native-readable metadata tables
//!
//! The engine builds one [`TypeDescriptor`] per bridged managed type and hands
//! it to the native runtime, which uses the member table to answer property
//! reads, writes and method calls by index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::DataType;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

id_type!(
    /// Opaque handle to a native object (wrapper or plain native object).
    NativeHandle
);

id_type!(
    /// Opaque address of a native engine (one per runtime context).
    EngineAddr
);

id_type!(
    /// Bridge record handed to the native side alongside a wrapper handle.
    RecordId
);

/// Native list property over an object-list field of a wrapped value.
///
/// The native runtime routes list operations on it back to the list hooks
/// with the same record and indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListPropertyRef {
    /// Record of the value owning the list field
    pub record: RecordId,
    /// Field path index (see [`TypeDescriptor::field_paths`])
    pub field: usize,
    /// Setter method index, when the field has one
    pub setter: Option<usize>,
}

/// Who controls destruction of a native wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// Native code owns it; used for values handed over as engine roots.
    Native,
    /// The script garbage collector owns it.
    Script,
}

// ============================================================================
// Color
// ============================================================================

/// 8-bit per channel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgba {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Rgba {
    /// Create a color from its channels
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Pack as `0xAARRGGBB`
    pub const fn to_argb(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Unpack from `0xAARRGGBB`
    pub const fn from_argb(argb: u32) -> Self {
        Self {
            a: (argb >> 24) as u8,
            r: (argb >> 16) as u8,
            g: (argb >> 8) as u8,
            b: argb as u8,
        }
    }
}

// ============================================================================
// Type Descriptor
// ============================================================================

/// How the synthesized `toString` member renders a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToStringMode {
    /// Use the type's stringer
    Stringer,
    /// Format the primitive coercion result
    ValueOf,
    /// No rendering capability: yield the type name
    TypeName,
}

/// What a method member invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTarget {
    /// User method by index in the type's method table
    Method(usize),
    /// Synthesized primitive coercion
    ValueOf,
    /// Synthesized string conversion
    ToString(ToStringMode),
}

/// One member (field, property or method) of a described type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    /// Byte offset of the name inside [`TypeDescriptor::names`]
    pub name_offset: usize,
    /// Byte length of the name
    pub name_len: usize,
    /// Data type of the member
    pub member_type: DataType,
    /// Field path index for plain fields
    pub field: Option<usize>,
    /// Byte offset of plain fields within the value
    pub offset: usize,
    /// Getter method index for promoted properties
    pub get_index: Option<usize>,
    /// Setter method index
    pub set_index: Option<usize>,
    /// Invocation target for method members
    pub method: Option<MethodTarget>,
    /// Call signature, e.g. `greet(QVariant)`
    pub signature: String,
    /// Result type: empty, `QVariant` or `QVariantList`
    pub result: String,
    /// Declared parameter count
    pub num_in: usize,
    /// Declared result count
    pub num_out: usize,
}

impl MemberInfo {
    /// True when this member is invoked rather than read.
    pub fn is_method(&self) -> bool {
        self.method.is_some()
    }
}

/// Native-readable metadata for one managed type.
///
/// Members are ordered fields first, then promoted properties, then methods.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    /// Managed type name
    pub type_name: String,
    /// NUL-separated member names
    pub names: Vec<u8>,
    /// Member table
    pub members: Vec<MemberInfo>,
    /// Number of field and property members
    pub fields_len: usize,
    /// Number of method members
    pub methods_len: usize,
    /// Member index of the paint callback
    pub paint: Option<usize>,
    /// Field index paths, referenced by [`MemberInfo::field`]
    pub field_paths: Vec<Vec<usize>>,
}

impl TypeDescriptor {
    /// Name of a member.
    pub fn member_name(&self, member: &MemberInfo) -> &str {
        let bytes = &self.names[member.name_offset..member.name_offset + member.name_len];
        std::str::from_utf8(bytes).unwrap_or("")
    }

    /// Find a member by its native-visible name.
    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.iter().find(|m| self.member_name(m) == name)
    }

    /// Index of a member by its native-visible name.
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| self.member_name(m) == name)
    }

    /// Field and property members.
    pub fn fields(&self) -> &[MemberInfo] {
        &self.members[..self.fields_len]
    }

    /// Method members.
    pub fn methods(&self) -> &[MemberInfo] {
        &self.members[self.fields_len..]
    }
}

/// Registration of a constructible managed type with the native runtime.
#[derive(Debug, Clone)]
pub struct TypeRegistration {
    /// Index to pass back to the construction hook
    pub spec: usize,
    /// Import location, e.g. `GoExtensions`
    pub location: String,
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Type name as seen by scripts
    pub name: String,
    /// Whether a single shared instance is exposed
    pub singleton: bool,
    /// Member table of the type
    pub descriptor: std::sync::Arc<TypeDescriptor>,
}
