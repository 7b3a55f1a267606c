//! Native collaborator traits
//!
//! The bridge never talks to a UI toolkit directly. A toolkit binding
//! implements [`NativeRuntime`] (object side) and [`EventLoop`] (loop side),
//! and the engine programs against these traits only.

use std::sync::Arc;

use crate::types::{EngineAddr, NativeHandle, Ownership, RecordId, TypeDescriptor, TypeRegistration};
use crate::value::TaggedValue;

/// Object-side operations of the native runtime.
///
/// All methods are invoked on the main thread, except that `activate` and
/// the object accessors may also run on the render thread during painting.
pub trait NativeRuntime: Send + Sync {
    // ========================================================================
    // Engines
    // ========================================================================

    /// Create a new engine (runtime context).
    fn new_engine(&self) -> EngineAddr;

    /// Tear down an engine.
    fn destroy_engine(&self, engine: EngineAddr);

    // ========================================================================
    // Wrappers
    // ========================================================================

    /// Allocate a native wrapper for a managed value.
    ///
    /// `parent` is set for native-owned wrappers so they live as long as the
    /// engine does.
    fn new_value(
        &self,
        record: RecordId,
        descriptor: &Arc<TypeDescriptor>,
        parent: Option<EngineAddr>,
    ) -> NativeHandle;

    /// Bind a wrapper to the engine's root context.
    fn set_context_for_object(&self, engine: EngineAddr, handle: NativeHandle);

    /// Set who controls destruction of a wrapper.
    fn set_ownership(&self, engine: EngineAddr, handle: NativeHandle, ownership: Ownership);

    /// Re-evaluate bindings depending on the field at `offset`.
    fn activate(&self, handle: NativeHandle, descriptor: &Arc<TypeDescriptor>, offset: usize);

    /// Make a constructible type known to scripts.
    fn register_type(&self, registration: &TypeRegistration);

    // ========================================================================
    // Context
    // ========================================================================

    /// Set a property on the engine's root context.
    fn set_context_property(&self, engine: EngineAddr, name: &str, value: TaggedValue);

    /// Read a property of the engine's root context.
    fn context_property(&self, engine: EngineAddr, name: &str) -> TaggedValue;

    // ========================================================================
    // Objects
    // ========================================================================

    /// Native type name of an object.
    fn object_type_name(&self, handle: NativeHandle) -> String;

    /// Read an object property.
    fn object_property(&self, handle: NativeHandle, name: &str) -> TaggedValue;

    /// Write an object property. Errors carry the native message.
    fn set_object_property(
        &self,
        handle: NativeHandle,
        name: &str,
        value: TaggedValue,
    ) -> Result<(), String>;

    /// Invoke an object method. Errors carry the native message.
    fn call_object_method(
        &self,
        handle: NativeHandle,
        name: &str,
        args: Vec<TaggedValue>,
    ) -> Result<TaggedValue, String>;
}

/// Callback serviced by the event loop while idle work is pending.
pub trait IdleHook {
    /// True while at least one caller is waiting for the idle callback.
    fn idle_pending(&self) -> bool;

    /// Drain queued work.
    fn on_idle(&self);
}

/// Loop-side operations of the native runtime.
pub trait EventLoop: Send + Sync {
    /// Create the application object. Called once, on the main thread.
    fn init_application(&self);

    /// Prepare the idle timer. Called once, right after initialization.
    fn init_idle(&self);

    /// Schedule the idle callback. Called from any thread.
    fn arm_idle(&self);

    /// Run the loop until [`EventLoop::exit`] is requested.
    fn exec(&self, idle: &dyn IdleHook);

    /// Ask the running loop to return. Called from any thread.
    fn exit(&self);

    /// Process all pending native activity synchronously.
    fn flush_all(&self);
}
