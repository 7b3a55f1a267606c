//! In-memory native runtime
//!
//! [`HeadlessRuntime`] and [`HeadlessLoop`] implement the native collaborator
//! traits without a UI toolkit. Objects, engines and context properties live
//! in maps; activations, type registrations and method calls are recorded so
//! they can be inspected. Native-side activity is simulated by calling the
//! bridge hooks directly.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tether_sdk::{
    EngineAddr, EventLoop, IdleHook, NativeHandle, NativeRuntime, Ownership, RecordId, TaggedValue,
    TypeDescriptor, TypeRegistration,
};

// ============================================================================
// Runtime
// ============================================================================

/// A native object known to the headless runtime.
#[derive(Debug, Clone)]
pub struct HeadlessObject {
    /// Native type name
    pub type_name: String,
    /// Bridge record, for wrappers of managed values
    pub record: Option<RecordId>,
    /// Descriptor, for wrappers of managed values
    pub descriptor: Option<Arc<TypeDescriptor>>,
    /// Engine the wrapper is parented to (native-owned wrappers)
    pub parent: Option<EngineAddr>,
    /// Engine whose context the object is bound to
    pub context: Option<EngineAddr>,
    /// Ownership mode last set
    pub ownership: Option<Ownership>,
    /// Plain properties
    pub properties: FxHashMap<String, TaggedValue>,
}

impl HeadlessObject {
    fn plain(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            record: None,
            descriptor: None,
            parent: None,
            context: None,
            ownership: None,
            properties: FxHashMap::default(),
        }
    }
}

/// One binding re-evaluation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Wrapper whose bindings were activated
    pub handle: NativeHandle,
    /// Type of the wrapped value
    pub type_name: String,
    /// Byte offset of the changed field
    pub offset: usize,
}

/// One native method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Target object
    pub handle: NativeHandle,
    /// Method name
    pub name: String,
    /// Arguments
    pub args: Vec<TaggedValue>,
}

#[derive(Default)]
struct EngineState {
    destroyed: bool,
    context: FxHashMap<String, TaggedValue>,
}

#[derive(Default)]
struct RuntimeState {
    engines: FxHashMap<EngineAddr, EngineState>,
    objects: FxHashMap<NativeHandle, HeadlessObject>,
    registrations: Vec<TypeRegistration>,
    activations: Vec<Activation>,
    calls: Vec<MethodCall>,
}

/// Native runtime keeping everything in memory.
pub struct HeadlessRuntime {
    state: Mutex<RuntimeState>,
    next_addr: AtomicU64,
}

impl HeadlessRuntime {
    /// Create an empty runtime
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RuntimeState::default()),
            next_addr: AtomicU64::new(0x1000),
        })
    }

    fn next_addr(&self) -> u64 {
        self.next_addr.fetch_add(0x10, Ordering::Relaxed)
    }

    /// Create a plain native object of `type_name`.
    pub fn add_object(&self, type_name: &str) -> NativeHandle {
        let handle = NativeHandle(self.next_addr());
        self.state.lock().objects.insert(handle, HeadlessObject::plain(type_name));
        handle
    }

    /// Snapshot of an object
    pub fn object(&self, handle: NativeHandle) -> Option<HeadlessObject> {
        self.state.lock().objects.get(&handle).cloned()
    }

    /// Bridge record behind a wrapper
    pub fn record_of(&self, handle: NativeHandle) -> Option<RecordId> {
        self.state.lock().objects.get(&handle).and_then(|o| o.record)
    }

    /// Native-visible member index of a wrapper's member.
    pub fn member_index(&self, handle: NativeHandle, name: &str) -> Option<usize> {
        let state = self.state.lock();
        let descriptor = state.objects.get(&handle)?.descriptor.as_ref()?;
        descriptor.member_index(name)
    }

    /// Forget a wrapper, as the native side does before notifying the bridge.
    pub fn remove_object(&self, handle: NativeHandle) -> Option<HeadlessObject> {
        self.state.lock().objects.remove(&handle)
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// True once the engine was destroyed
    pub fn is_engine_destroyed(&self, engine: EngineAddr) -> bool {
        self.state.lock().engines.get(&engine).is_some_and(|e| e.destroyed)
    }

    /// Activations so far, oldest first
    pub fn activations(&self) -> Vec<Activation> {
        self.state.lock().activations.clone()
    }

    /// Registered types so far
    pub fn registrations(&self) -> Vec<TypeRegistration> {
        self.state.lock().registrations.clone()
    }

    /// Method calls so far, oldest first
    pub fn calls(&self) -> Vec<MethodCall> {
        self.state.lock().calls.clone()
    }
}

impl NativeRuntime for HeadlessRuntime {
    fn new_engine(&self) -> EngineAddr {
        let engine = EngineAddr(self.next_addr());
        self.state.lock().engines.insert(engine, EngineState::default());
        engine
    }

    fn destroy_engine(&self, engine: EngineAddr) {
        if let Some(state) = self.state.lock().engines.get_mut(&engine) {
            state.destroyed = true;
        }
    }

    fn new_value(&self, record: RecordId, descriptor: &Arc<TypeDescriptor>, parent: Option<EngineAddr>) -> NativeHandle {
        let handle = NativeHandle(self.next_addr());
        let object = HeadlessObject {
            record: Some(record),
            descriptor: Some(descriptor.clone()),
            parent,
            ..HeadlessObject::plain(&descriptor.type_name)
        };
        self.state.lock().objects.insert(handle, object);
        handle
    }

    fn set_context_for_object(&self, engine: EngineAddr, handle: NativeHandle) {
        if let Some(object) = self.state.lock().objects.get_mut(&handle) {
            object.context = Some(engine);
        }
    }

    fn set_ownership(&self, _engine: EngineAddr, handle: NativeHandle, ownership: Ownership) {
        if let Some(object) = self.state.lock().objects.get_mut(&handle) {
            object.ownership = Some(ownership);
        }
    }

    fn activate(&self, handle: NativeHandle, descriptor: &Arc<TypeDescriptor>, offset: usize) {
        self.state.lock().activations.push(Activation {
            handle,
            type_name: descriptor.type_name.clone(),
            offset,
        });
    }

    fn register_type(&self, registration: &TypeRegistration) {
        self.state.lock().registrations.push(registration.clone());
    }

    fn set_context_property(&self, engine: EngineAddr, name: &str, value: TaggedValue) {
        let mut state = self.state.lock();
        state.engines.entry(engine).or_default().context.insert(name.to_string(), value);
    }

    fn context_property(&self, engine: EngineAddr, name: &str) -> TaggedValue {
        let state = self.state.lock();
        state
            .engines
            .get(&engine)
            .and_then(|e| e.context.get(name).cloned())
            .unwrap_or_default()
    }

    fn object_type_name(&self, handle: NativeHandle) -> String {
        self.state
            .lock()
            .objects
            .get(&handle)
            .map(|o| o.type_name.clone())
            .unwrap_or_default()
    }

    fn object_property(&self, handle: NativeHandle, name: &str) -> TaggedValue {
        let state = self.state.lock();
        state
            .objects
            .get(&handle)
            .and_then(|o| o.properties.get(name).cloned())
            .unwrap_or_default()
    }

    fn set_object_property(&self, handle: NativeHandle, name: &str, value: TaggedValue) -> Result<(), String> {
        let mut state = self.state.lock();
        let Some(object) = state.objects.get_mut(&handle) else {
            return Err(format!("unknown object {}", handle));
        };
        object.properties.insert(name.to_string(), value);
        Ok(())
    }

    fn call_object_method(&self, handle: NativeHandle, name: &str, args: Vec<TaggedValue>) -> Result<TaggedValue, String> {
        let mut state = self.state.lock();
        if !state.objects.contains_key(&handle) {
            return Err(format!("unknown object {}", handle));
        }
        state.calls.push(MethodCall {
            handle,
            name: name.to_string(),
            args,
        });
        Ok(TaggedValue::Invalid)
    }
}

// ============================================================================
// Event loop
// ============================================================================

/// Event loop that only services the idle callback.
pub struct HeadlessLoop {
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    exit: AtomicBool,
    initialized: AtomicBool,
    armed: AtomicUsize,
    flushes: AtomicUsize,
}

impl HeadlessLoop {
    /// Create a loop
    pub fn new() -> Arc<Self> {
        let (wake_tx, wake_rx) = channel::unbounded();
        Arc::new(Self {
            wake_tx,
            wake_rx,
            exit: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            armed: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        })
    }

    /// True once `init_application` ran
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Times the idle callback was armed
    pub fn armed_count(&self) -> usize {
        self.armed.load(Ordering::Acquire)
    }

    /// Times `flush_all` ran
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Acquire)
    }

    fn wake(&self) {
        let _ = self.wake_tx.send(());
    }
}

impl EventLoop for HeadlessLoop {
    fn init_application(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn init_idle(&self) {}

    fn arm_idle(&self) {
        self.armed.fetch_add(1, Ordering::AcqRel);
        self.wake();
    }

    fn exec(&self, idle: &dyn IdleHook) {
        while !self.exit.load(Ordering::Acquire) {
            if idle.idle_pending() {
                idle.on_idle();
                if idle.idle_pending() {
                    // A caller announced itself but has not queued yet.
                    let _ = self.wake_rx.recv_timeout(Duration::from_millis(1));
                }
                continue;
            }
            let _ = self.wake_rx.recv_timeout(Duration::from_millis(10));
        }
    }

    fn exit(&self) {
        self.exit.store(true, Ordering::Release);
        self.wake();
    }

    fn flush_all(&self) {
        self.flushes.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_properties() {
        let runtime = HeadlessRuntime::new();
        let engine = runtime.new_engine();
        assert!(runtime.context_property(engine, "missing").is_invalid());
        runtime.set_context_property(engine, "answer", TaggedValue::NumberI(42));
        assert_eq!(runtime.context_property(engine, "answer"), TaggedValue::NumberI(42));
    }

    #[test]
    fn test_plain_objects() {
        let runtime = HeadlessRuntime::new();
        let handle = runtime.add_object("Rectangle");
        assert_eq!(runtime.object_type_name(handle), "Rectangle");
        runtime.set_object_property(handle, "width", TaggedValue::Number(3.0)).unwrap();
        assert_eq!(runtime.object_property(handle, "width"), TaggedValue::Number(3.0));
        assert!(runtime.set_object_property(NativeHandle(1), "width", TaggedValue::Invalid).is_err());
        runtime.call_object_method(handle, "update", Vec::new()).unwrap();
        assert_eq!(runtime.calls().len(), 1);
    }

    #[test]
    fn test_destroy_engine() {
        let runtime = HeadlessRuntime::new();
        let engine = runtime.new_engine();
        assert!(!runtime.is_engine_destroyed(engine));
        runtime.destroy_engine(engine);
        assert!(runtime.is_engine_destroyed(engine));
    }

    #[test]
    fn test_loop_exit_before_exec() {
        struct Never;
        impl IdleHook for Never {
            fn idle_pending(&self) -> bool {
                false
            }
            fn on_idle(&self) {}
        }
        let event_loop = HeadlessLoop::new();
        event_loop.exit();
        event_loop.exec(&Never);
        event_loop.arm_idle();
        assert_eq!(event_loop.armed_count(), 1);
    }
}
