//! Bridge facade
//!
//! [`Bridge`] owns the registry, the descriptor cache and the scheduler, and
//! talks to the native side through the [`NativeRuntime`] and [`EventLoop`]
//! collaborators. Public operations hop onto the main thread as needed; the
//! hooks in [`crate::hooks`] are entered by the native runtime directly.

use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tether_sdk::{
    EngineAddr, EventLoop, NativeHandle, NativeRuntime, Ownership, RecordId, TaggedValue, TypeDescriptor,
    TypeRegistration,
};

use crate::convert::ToValue;
use crate::defaults::UPDATE_METHOD;
use crate::fatal::fatal;
use crate::options::BridgeOptions;
use crate::reflect::{constructor, shape_of, Bridged, ConstructFn, TypeCache, TypeShape};
use crate::registry::{next_record_id, InitFn, Registry, ValueFold};
use crate::scheduler::Scheduler;
use crate::value::{Managed, ObjectRef, Value, ValueKey};
use crate::{BridgeError, BridgeResult};

/// Maps a native object of a registered native type to a managed value.
pub type Converter = Arc<dyn Fn(ObjectRef) -> Value + Send + Sync>;

// ============================================================================
// Type registration
// ============================================================================

/// A managed type the native side can construct.
pub struct TypeSpec {
    name: String,
    singleton: bool,
    shape: Arc<TypeShape>,
    construct: ConstructFn,
    init: Option<InitFn>,
}

impl TypeSpec {
    /// Describe `T`, exposed to scripts as `name`.
    pub fn new<T: Bridged + Default>(name: &str) -> Self {
        if name.is_empty() {
            fatal(format!("type {} registered without a name", std::any::type_name::<T>()));
        }
        Self {
            name: name.to_string(),
            singleton: false,
            shape: shape_of::<T>(),
            construct: constructor::<T>(),
            init: None,
        }
    }

    /// Expose one shared instance instead of a constructible type.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Run `f` once the native object of a new instance is known.
    pub fn init<T: Bridged>(mut self, f: fn(&mut T, ObjectRef)) -> Self {
        if self.shape.type_id() != TypeId::of::<T>() {
            fatal(format!(
                "init for {} attached to type spec of {}",
                std::any::type_name::<T>(),
                self.shape.name()
            ));
        }
        self.init = Some(Arc::new(move |value: &Managed, object: ObjectRef| {
            value.write(|t: &mut T| f(t, object));
        }));
        self
    }

    /// Script-visible name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for singletons
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }
}

pub(crate) struct RegisteredType {
    pub(crate) name: String,
    pub(crate) construct: ConstructFn,
    pub(crate) init: Option<InitFn>,
}

/// Counters reported by [`Bridge::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Value records alive (attached and pending)
    pub values_alive: usize,
    /// Engines known to the registry
    pub engines: usize,
    /// Records created natively and not yet attached
    pub pending: usize,
    /// Types described so far
    pub described_types: usize,
    /// Types registered for native construction
    pub registered_types: usize,
}

/// A record resolved against its engine.
pub(crate) struct Resolved {
    pub(crate) value: Managed,
    pub(crate) engine: EngineAddr,
    pub(crate) handle: NativeHandle,
    /// The initializer is still pending and was handed to the main thread
    pub(crate) deferred: bool,
}

type Activation = (NativeHandle, Arc<TypeDescriptor>, usize);

// ============================================================================
// Bridge
// ============================================================================

/// Object bridge between managed values and a native runtime.
pub struct Bridge {
    this: Weak<Bridge>,
    runtime: Arc<dyn NativeRuntime>,
    scheduler: Arc<Scheduler>,
    types: Arc<TypeCache>,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) specs: RwLock<Vec<RegisteredType>>,
    converters: RwLock<FxHashMap<String, Converter>>,
    /// Depth of hooks currently running managed code
    managed_depth: AtomicUsize,
    /// Activations requested while managed code ran inside a hook
    deferred: Mutex<Vec<Activation>>,
}

impl Bridge {
    /// Create a bridge with the process-wide descriptor cache.
    ///
    /// The calling thread becomes the main thread: [`Bridge::run`] must be
    /// called on it.
    pub fn new(runtime: Arc<dyn NativeRuntime>, event_loop: Arc<dyn EventLoop>) -> Arc<Self> {
        Self::with_cache(runtime, event_loop, TypeCache::global())
    }

    /// Create a bridge with its own descriptor cache built from `options`.
    pub fn with_options(
        runtime: Arc<dyn NativeRuntime>,
        event_loop: Arc<dyn EventLoop>,
        options: BridgeOptions,
    ) -> Arc<Self> {
        Self::with_cache(runtime, event_loop, Arc::new(TypeCache::new(options)))
    }

    fn with_cache(runtime: Arc<dyn NativeRuntime>, event_loop: Arc<dyn EventLoop>, types: Arc<TypeCache>) -> Arc<Self> {
        Arc::new_cyclic(|this| Bridge {
            this: this.clone(),
            runtime,
            scheduler: Arc::new(Scheduler::new(event_loop)),
            types,
            registry: Mutex::new(Registry::new()),
            specs: RwLock::new(Vec::new()),
            converters: RwLock::new(FxHashMap::default()),
            managed_depth: AtomicUsize::new(0),
            deferred: Mutex::new(Vec::new()),
        })
    }

    fn strong(&self) -> Arc<Bridge> {
        match self.this.upgrade() {
            Some(bridge) => bridge,
            None => fatal("bridge used while being dropped"),
        }
    }

    /// The native runtime
    pub fn runtime(&self) -> &Arc<dyn NativeRuntime> {
        &self.runtime
    }

    /// The main-thread scheduler
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The descriptor cache
    pub fn types(&self) -> &Arc<TypeCache> {
        &self.types
    }

    /// Options the descriptors are built with
    pub fn options(&self) -> &BridgeOptions {
        self.types.options()
    }

    // ========================================================================
    // Main thread
    // ========================================================================

    /// Run the event loop on this thread and `driver` on another one,
    /// returning once `driver` returned.
    pub fn run<R: Send>(&self, driver: impl FnOnce() -> R + Send) -> R {
        self.scheduler.run(driver)
    }

    /// Run `f` on the main thread and wait for its result.
    pub fn run_on_main<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.scheduler.run_on_main(f)
    }

    /// Hold the main thread in the idle callback, draining queued work,
    /// until [`Bridge::unlock`].
    pub fn lock(&self) {
        self.scheduler.lock();
    }

    /// Release one [`Bridge::lock`]. Fatal when not locked.
    pub fn unlock(&self) {
        self.scheduler.unlock();
    }

    /// Process pending native activity.
    pub fn flush(&self) {
        self.scheduler.flush();
    }

    // ========================================================================
    // Engines
    // ========================================================================

    /// Create an engine.
    pub fn new_engine(&self) -> EngineAddr {
        let this = self.strong();
        self.run_on_main(move || {
            let engine = this.runtime.new_engine();
            this.registry.lock().add_engine(engine);
            tracing::debug!(%engine, "engine created");
            engine
        })
    }

    /// Destroy an engine. Its registry entry goes away with its last value.
    pub fn destroy_engine(&self, engine: EngineAddr) {
        let this = self.strong();
        self.run_on_main(move || {
            let dropped = this.registry.lock().destroy_engine(engine);
            this.runtime.destroy_engine(engine);
            tracing::debug!(%engine, dropped, "engine destroyed");
        });
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Native wrapper of `value` in `engine`, allocated if needed.
    pub fn wrap(&self, engine: EngineAddr, value: Managed, owner: Ownership) -> NativeHandle {
        let this = self.strong();
        self.run_on_main(move || this.wrap_value(engine, &value, owner))
    }

    /// Pack `value` for the native side.
    pub fn pack_value(&self, value: impl ToValue, engine: EngineAddr, owner: Ownership) -> BridgeResult<TaggedValue> {
        let this = self.strong();
        let value = value.to_value();
        self.run_on_main(move || this.pack(&value, Some(engine), owner))
    }

    /// Unpack a value received from the native side.
    pub fn unpack_value(&self, tagged: TaggedValue, engine: Option<EngineAddr>) -> BridgeResult<Value> {
        let this = self.strong();
        self.run_on_main(move || this.unpack(tagged, engine))
    }

    pub(crate) fn wrap_value(&self, engine: EngineAddr, value: &Managed, owner: Ownership) -> NativeHandle {
        let key = value.key();
        let painting = self.scheduler.is_painting();
        {
            let registry = self.registry.lock();
            if registry.is_destroyed(engine) {
                fatal(format!("cannot hand values to destroyed engine {}", engine));
            }
            if let Some(handle) = registry.existing_handle(engine, &key, owner, painting) {
                return handle;
            }
        }
        if painting {
            fatal(format!(
                "cannot allocate a wrapper for {} while painting; hand it to native logic before the render callback",
                value.type_name()
            ));
        }

        let descriptor = self.types.describe(value.shape());
        let record = next_record_id();
        let parent = (owner == Ownership::Native).then_some(engine);
        let handle = self.runtime.new_value(record, &descriptor, parent);
        self.registry.lock().insert_wrapped(
            record,
            ValueFold {
                engine: Some(engine),
                key,
                value: value.clone(),
                handle,
                init: None,
                owner,
            },
        );
        self.runtime.set_context_for_object(engine, handle);
        self.runtime.set_ownership(engine, handle, owner);
        tracing::debug!(%engine, %record, %handle, type_name = value.type_name(), ?owner, "value wrapped");
        handle
    }

    /// Attach `record` to `engine` on first use and run its initializer.
    ///
    /// Inside the render callback the initializer is deferred to the main
    /// thread and followed by an update of the native object.
    pub(crate) fn ensure_engine(&self, engine: Option<EngineAddr>, record: RecordId) -> Resolved {
        let painting = self.scheduler.is_painting();
        let (resolved, init) = {
            let mut registry = self.registry.lock();
            registry.attach(engine, record);
            let fold = registry.fold(record);
            let Some(engine) = fold.engine else {
                fatal(format!("value record {} has no engine after attaching", record))
            };
            let pending = fold.init_pending();
            let resolved = Resolved {
                value: fold.value.clone(),
                engine,
                handle: fold.handle,
                deferred: pending && painting,
            };
            let init = if pending && !painting { registry.take_init(record) } else { None };
            (resolved, init)
        };

        if let Some(init) = init {
            init(&resolved.value, ObjectRef::new(Some(resolved.engine), resolved.handle));
            tracing::debug!(%record, "value initialized");
        } else if resolved.deferred {
            let this = self.strong();
            thread::spawn(move || {
                let bridge = this.clone();
                this.run_on_main(move || bridge.run_deferred_init(record));
            });
        }
        resolved
    }

    fn run_deferred_init(&self, record: RecordId) {
        let (value, object, init) = {
            let mut registry = self.registry.lock();
            let Some(fold) = registry.get(record) else { return };
            if !fold.init_pending() {
                return;
            }
            let value = fold.value.clone();
            let object = ObjectRef::new(fold.engine, fold.handle);
            (value, object, registry.take_init(record))
        };
        let Some(init) = init else { return };
        init(&value, object);
        tracing::debug!(%record, "value initialized after painting");
        if let Err(err) = self.runtime.call_object_method(object.handle, UPDATE_METHOD, Vec::new()) {
            tracing::warn!(%record, error = %err, "update after deferred init failed");
        }
    }

    // ========================================================================
    // Context variables
    // ========================================================================

    /// Set a variable on the engine's root context. Wrapped values are
    /// native-owned.
    pub fn set_context_var(&self, engine: EngineAddr, name: &str, value: impl ToValue) -> BridgeResult<()> {
        let this = self.strong();
        let name = name.to_string();
        let value = value.to_value();
        self.run_on_main(move || {
            let packed = this.pack(&value, Some(engine), Ownership::Native)?;
            this.runtime.set_context_property(engine, &name, packed);
            Ok(())
        })
    }

    /// Read a variable of the engine's root context.
    pub fn context_var(&self, engine: EngineAddr, name: &str) -> BridgeResult<Value> {
        let this = self.strong();
        let name = name.to_string();
        self.run_on_main(move || {
            let tagged = this.runtime.context_property(engine, &name);
            this.unpack(tagged, Some(engine))
        })
    }

    // ========================================================================
    // Native objects
    // ========================================================================

    /// Native type name of `object`.
    pub fn object_type_name(&self, object: ObjectRef) -> String {
        let this = self.strong();
        self.run_on_main(move || this.runtime.object_type_name(object.handle))
    }

    /// Read a property of `object`.
    pub fn object_get(&self, object: ObjectRef, name: &str) -> BridgeResult<Value> {
        let this = self.strong();
        let name = name.to_string();
        self.run_on_main(move || {
            let tagged = this.runtime.object_property(object.handle, &name);
            this.unpack(tagged, object.engine)
        })
    }

    /// Write a property of `object`.
    pub fn object_set(&self, object: ObjectRef, name: &str, value: impl ToValue) -> BridgeResult<()> {
        let this = self.strong();
        let name = name.to_string();
        let value = value.to_value();
        self.run_on_main(move || {
            let packed = this.pack(&value, object.engine, Ownership::Script)?;
            this.runtime
                .set_object_property(object.handle, &name, packed)
                .map_err(BridgeError::Native)
        })
    }

    /// Call a method of `object`.
    pub fn object_call(&self, object: ObjectRef, name: &str, args: Vec<Value>) -> BridgeResult<Value> {
        let this = self.strong();
        let name = name.to_string();
        self.run_on_main(move || {
            let packed = args
                .iter()
                .map(|arg| this.pack(arg, object.engine, Ownership::Script))
                .collect::<BridgeResult<Vec<_>>>()?;
            let result = this
                .runtime
                .call_object_method(object.handle, &name, packed)
                .map_err(BridgeError::Native)?;
            this.unpack(result, object.engine)
        })
    }

    // ========================================================================
    // Change notification
    // ========================================================================

    /// Re-evaluate native bindings depending on `field` of `value`, for every
    /// live wrapper of `value`.
    ///
    /// `field` must borrow from inside `value`, e.g. `bridge.changed(self,
    /// &self.count)` from within a method.
    pub fn changed<T: Bridged, F>(&self, value: &T, field: &F) {
        let base = value as *const T as usize;
        let addr = field as *const F as usize;
        let size = std::mem::size_of::<F>();
        if size == 0 {
            fatal("cannot report changes of a zero-sized field");
        }
        if addr < base || addr + size > base + std::mem::size_of::<T>() {
            fatal(format!(
                "field at {:#x} is not within the {} value at {:#x}",
                addr,
                std::any::type_name::<T>(),
                base
            ));
        }
        let offset = addr - base;
        let descriptor = self.types.describe(&shape_of::<T>());
        let key = ValueKey::Addr(base);
        let this = self.strong();
        self.run_on_main(move || this.activate_all(&key, &descriptor, offset));
    }

    fn activate_all(&self, key: &ValueKey, descriptor: &Arc<TypeDescriptor>, offset: usize) {
        // Pending records are collected together with the attached ones and
        // activated after the registry lock is released.
        let handles = self.registry.lock().handles_for(key);
        if self.managed_depth.load(Ordering::Acquire) > 0 {
            let mut deferred = self.deferred.lock();
            deferred.extend(handles.into_iter().map(|h| (h, descriptor.clone(), offset)));
            return;
        }
        for handle in handles {
            self.runtime.activate(handle, descriptor, offset);
        }
    }

    /// Run managed code from a hook. Activations it requests are delivered
    /// once the outermost such call returns.
    pub(crate) fn in_managed<R>(&self, f: impl FnOnce() -> R) -> R {
        self.managed_depth.fetch_add(1, Ordering::AcqRel);
        let guard = ManagedGuard { bridge: self };
        let result = f();
        drop(guard);
        result
    }

    fn deliver_deferred(&self) {
        loop {
            let batch = std::mem::take(&mut *self.deferred.lock());
            if batch.is_empty() {
                return;
            }
            for (handle, descriptor, offset) in batch {
                self.runtime.activate(handle, &descriptor, offset);
            }
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Make `specs` constructible by scripts importing `location`.
    pub fn register_types(&self, location: &str, major: u32, minor: u32, specs: Vec<TypeSpec>) {
        let this = self.strong();
        let location = location.to_string();
        self.run_on_main(move || {
            for spec in specs {
                let descriptor = this.types.describe(&spec.shape);
                let index = {
                    let mut registered = this.specs.write();
                    registered.push(RegisteredType {
                        name: spec.name.clone(),
                        construct: spec.construct,
                        init: spec.init,
                    });
                    registered.len() - 1
                };
                this.runtime.register_type(&TypeRegistration {
                    spec: index,
                    location: location.clone(),
                    major,
                    minor,
                    name: spec.name.clone(),
                    singleton: spec.singleton,
                    descriptor,
                });
                tracing::debug!(%location, major, minor, name = %spec.name, singleton = spec.singleton, "type registered");
            }
        });
    }

    /// Unpack native objects of native type `type_name` through `convert`.
    pub fn register_converter(&self, type_name: &str, convert: impl Fn(ObjectRef) -> Value + Send + Sync + 'static) {
        self.converters.write().insert(type_name.to_string(), Arc::new(convert));
    }

    pub(crate) fn has_converters(&self) -> bool {
        !self.converters.read().is_empty()
    }

    pub(crate) fn converter(&self, type_name: &str) -> Option<Converter> {
        self.converters.read().get(type_name).cloned()
    }

    /// Live counters
    pub fn stats(&self) -> BridgeStats {
        let registry = self.registry.lock().stats();
        BridgeStats {
            values_alive: registry.values_alive,
            engines: registry.engines,
            pending: registry.pending,
            described_types: self.types.len(),
            registered_types: self.specs.read().len(),
        }
    }
}

struct ManagedGuard<'a> {
    bridge: &'a Bridge,
}

impl Drop for ManagedGuard<'_> {
    fn drop(&mut self) {
        if self.bridge.managed_depth.fetch_sub(1, Ordering::AcqRel) == 1 && !thread::panicking() {
            self.bridge.deliver_deferred();
        }
    }
}
