//! Tether Engine - object bridge between Rust values and a native UI runtime
//!
//! The engine exposes Rust values to a declarative native UI runtime as live
//! objects: native bindings read and write fields, call methods, and get
//! notified when data changes. Values travel as [`TaggedValue`]s; managed
//! values are wrapped once per engine and their identity is preserved across
//! crossings.
//!
//! # Architecture
//!
//! - [`reflect`]: explicit type shapes and the descriptor cache
//! - [`registry`]: records pairing managed values with native wrappers
//! - `codec`: packing and unpacking of tagged values
//! - [`scheduler`]: main-thread serialization of native work
//! - `hooks`: callbacks invoked by the native side
//! - [`bridge`]: the public facade tying it together
//! - [`headless`]: an in-memory native runtime for tests and tooling
//!
//! # Example
//!
//! ```ignore
//! use tether_engine::{Bridge, HeadlessLoop, HeadlessRuntime, Managed};
//!
//! let runtime = HeadlessRuntime::new();
//! let bridge = Bridge::new(runtime.clone(), HeadlessLoop::new());
//! bridge.run(|| {
//!     let engine = bridge.new_engine();
//!     bridge.set_context_var(engine, "counter", Managed::new(Counter::default()))
//! })?;
//! ```

#![warn(missing_docs)]

pub mod bridge;
mod codec;
pub mod convert;
pub mod defaults;
pub mod fatal;
pub mod headless;
pub mod hooks;
pub mod options;
pub mod reflect;
pub mod registry;
pub mod scheduler;
pub mod value;

use thiserror::Error;

pub use bridge::{Bridge, BridgeStats, TypeSpec};
pub use convert::{FromValue, Returns, ToValue};
pub use headless::{HeadlessLoop, HeadlessRuntime};
pub use options::BridgeOptions;
pub use reflect::{shape_of, Bridged, Kind, TypeCache, TypeShape};
pub use registry::{Registry, RegistryStats};
pub use tether_sdk::{
    ConversionError, ConvertResult, DataType, EngineAddr, NativeHandle, Ownership, RecordId, Rgba,
    TaggedValue,
};
pub use value::{List, Managed, Map, ObjectRef, Painter, Value};

/// Errors surfaced to application call sites.
///
/// Usage errors and registry inconsistencies are not represented here; they
/// are fatal (see [`fatal::fatal`]).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A value could not be converted
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// A method argument could not be converted to the parameter type
    #[error("cannot convert parameter {index} of method {method} from {from} to {to}; provided value: {value}")]
    Parameter {
        /// Zero-based parameter index
        index: usize,
        /// Method name
        method: String,
        /// Source type name
        from: String,
        /// Parameter type name
        to: String,
        /// Rendering of the provided value
        value: String,
    },

    /// The native runtime reported a failure
    #[error("native error: {0}")]
    Native(String),

    /// Data that has no representation on the other side
    #[error("unsupported value: {0}")]
    Unsupported(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
