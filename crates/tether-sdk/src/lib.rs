//! Tether SDK - wire types and native collaborator traits
//!
//! This crate holds everything a native toolkit binding needs to talk to the
//! tether bridge without depending on the engine: the tagged wire value, the
//! descriptor tables built for bridged types, identifiers, and the two traits
//! the binding implements.
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::{DataType, TaggedValue};
//!
//! let value = TaggedValue::string("hello");
//! assert_eq!(value.data_type(), DataType::String);
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod types;
pub mod value;

pub use context::{EventLoop, IdleHook, NativeRuntime};
pub use error::{ConversionError, ConvertResult};
pub use types::{
    EngineAddr, ListPropertyRef, MemberInfo, MethodTarget, NativeHandle, Ownership, RecordId,
    Rgba, ToStringMode, TypeDescriptor, TypeRegistration,
};
pub use value::{DataType, NativeString, TaggedValue};

/// Largest integer magnitude that survives a round trip through `f64`.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;
