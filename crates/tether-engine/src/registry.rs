//! Value registry
//!
//! Tracks every managed value handed to the native side. Each native wrapper
//! has one [`ValueFold`] record; records of the same value within an engine
//! form a chain keyed by value identity, with the single native-owned record
//! (if any) at the head. Records created by native construction of a
//! registered type have no engine until first accessed and wait in the
//! pending set.
//!
//! The registry is pure bookkeeping: it never calls into the native runtime
//! or into managed code. Every inconsistency between the two sides is fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tether_sdk::{EngineAddr, NativeHandle, Ownership, RecordId};

use crate::fatal::fatal;
use crate::value::{Managed, ObjectRef, ValueKey};

/// Deferred constructor callback of a natively constructed value.
pub type InitFn = Arc<dyn Fn(&Managed, ObjectRef) + Send + Sync>;

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique record id.
pub(crate) fn next_record_id() -> RecordId {
    RecordId(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
}

/// One (managed value, native wrapper) pairing.
pub struct ValueFold {
    pub(crate) engine: Option<EngineAddr>,
    pub(crate) key: ValueKey,
    pub(crate) value: Managed,
    pub(crate) handle: NativeHandle,
    pub(crate) init: Option<InitFn>,
    pub(crate) owner: Ownership,
}

impl ValueFold {
    /// Engine the record is attached to
    pub fn engine(&self) -> Option<EngineAddr> {
        self.engine
    }

    /// The wrapped value
    pub fn value(&self) -> &Managed {
        &self.value
    }

    /// Native wrapper handle
    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Who controls destruction of the wrapper
    pub fn owner(&self) -> Ownership {
        self.owner
    }

    /// True while the constructor callback has not run
    pub fn init_pending(&self) -> bool {
        self.init.is_some()
    }
}

struct EngineState {
    values: FxHashMap<ValueKey, Vec<RecordId>>,
    destroyed: bool,
}

/// Outcome of releasing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The record was pending and never attached
    Pending,
    /// Other records of the same value remain
    Unlinked,
    /// The last record of the value was removed
    ValueDropped,
    /// The last value of a destroyed engine was removed, and the engine too
    EngineDropped(EngineAddr),
}

/// Live counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Records alive (attached and pending)
    pub values_alive: usize,
    /// Engines known to the registry
    pub engines: usize,
    /// Records waiting for their engine
    pub pending: usize,
}

/// Arena of value records, per-engine chains and the pending set.
#[derive(Default)]
pub struct Registry {
    folds: FxHashMap<RecordId, ValueFold>,
    handles: FxHashMap<NativeHandle, RecordId>,
    engines: FxHashMap<EngineAddr, EngineState>,
    pending: FxHashSet<RecordId>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Engines
    // ========================================================================

    /// Start tracking an engine.
    pub fn add_engine(&mut self, engine: EngineAddr) {
        self.engines.insert(
            engine,
            EngineState {
                values: FxHashMap::default(),
                destroyed: false,
            },
        );
    }

    /// Mark an engine destroyed. It is dropped right away when it holds no
    /// values, otherwise once its last value is released.
    ///
    /// Returns true when the engine was dropped now.
    pub fn destroy_engine(&mut self, engine: EngineAddr) -> bool {
        let Some(state) = self.engines.get_mut(&engine) else {
            fatal(format!("destroying unknown engine {}", engine))
        };
        if state.destroyed {
            fatal(format!("engine {} destroyed twice", engine));
        }
        state.destroyed = true;
        if state.values.is_empty() {
            self.engines.remove(&engine);
            true
        } else {
            false
        }
    }

    /// True if the engine is tracked (possibly destroyed but not yet dropped).
    pub fn has_engine(&self, engine: EngineAddr) -> bool {
        self.engines.contains_key(&engine)
    }

    /// True if the engine was marked destroyed.
    pub fn is_destroyed(&self, engine: EngineAddr) -> bool {
        self.engines.get(&engine).is_some_and(|e| e.destroyed)
    }

    // ========================================================================
    // Wrapping
    // ========================================================================

    /// Existing wrapper to hand out for `key`, if any.
    ///
    /// While painting the chain head is returned unconditionally. A
    /// native-owned head is always returned. A script-owned request reuses a
    /// script-owned record.
    pub(crate) fn existing_handle(
        &self,
        engine: EngineAddr,
        key: &ValueKey,
        owner: Ownership,
        painting: bool,
    ) -> Option<NativeHandle> {
        let chain = self.chain(engine, key);
        let head = self.fold(*chain.first()?);
        if painting || head.owner == Ownership::Native {
            return Some(head.handle);
        }
        if owner == Ownership::Script {
            return chain
                .iter()
                .map(|id| self.fold(*id))
                .find(|fold| fold.owner == Ownership::Script)
                .map(|fold| fold.handle);
        }
        None
    }

    /// Insert a freshly wrapped record at the head of its chain.
    pub(crate) fn insert_wrapped(&mut self, record: RecordId, fold: ValueFold) {
        let Some(engine) = fold.engine else {
            fatal("wrapped record without an engine")
        };
        let key = fold.key.clone();
        self.handles.insert(fold.handle, record);
        self.folds.insert(record, fold);
        let state = self.engine_state_mut(engine);
        state.values.entry(key).or_default().insert(0, record);
    }

    /// Insert a record created by native construction.
    pub(crate) fn insert_pending(&mut self, record: RecordId, fold: ValueFold) {
        if fold.engine.is_some() {
            fatal("pending record already attached to an engine");
        }
        self.handles.insert(fold.handle, record);
        self.folds.insert(record, fold);
        self.pending.insert(record);
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Attach a record to `engine` on first use.
    ///
    /// Records that already have an engine are left alone. A record without
    /// one must come from the pending set; it is appended to the chain of
    /// its value.
    pub fn attach(&mut self, engine: Option<EngineAddr>, record: RecordId) {
        if self.fold(record).engine.is_some() {
            return;
        }
        let Some(engine) = engine else {
            fatal("accessing value without an engine; who created the value?")
        };
        if !self.engines.contains_key(&engine) {
            fatal(format!("unknown engine {}; who created the engine?", engine));
        }
        if !self.pending.remove(&record) {
            fatal("value had no engine, but was not created by a registered type; who created the value?");
        }
        let key = {
            let fold = self.fold_mut(record);
            fold.engine = Some(engine);
            fold.key.clone()
        };
        self.engine_state_mut(engine).values.entry(key).or_default().push(record);
    }

    /// Take the pending constructor callback, if any.
    pub(crate) fn take_init(&mut self, record: RecordId) -> Option<InitFn> {
        self.fold_mut(record).init.take()
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Forget a record whose wrapper the native side freed.
    pub fn release(&mut self, record: RecordId) -> Released {
        let Some(fold) = self.folds.remove(&record) else {
            fatal(format!("destroying unknown value record {}", record))
        };
        self.handles.remove(&fold.handle);
        let Some(engine) = fold.engine else {
            if !self.pending.remove(&record) {
                fatal("destroying value without an associated engine; who created the value?");
            }
            return Released::Pending;
        };
        let Some(state) = self.engines.get_mut(&engine) else {
            fatal(format!(
                "engine {} was released from the registry while its values were still alive",
                engine
            ))
        };
        let Some(chain) = state.values.get_mut(&fold.key) else {
            fatal("destroying value that knows about the engine, but the engine doesn't know about the value; who cleared the engine?")
        };
        let Some(pos) = chain.iter().position(|id| *id == record) else {
            fatal(format!("value record {} is missing from the chain of its value", record))
        };
        chain.remove(pos);
        if !chain.is_empty() {
            return Released::Unlinked;
        }
        state.values.remove(&fold.key);
        if state.destroyed && state.values.is_empty() {
            self.engines.remove(&engine);
            return Released::EngineDropped(engine);
        }
        Released::ValueDropped
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Record by id. Fatal when unknown.
    pub fn fold(&self, record: RecordId) -> &ValueFold {
        match self.folds.get(&record) {
            Some(fold) => fold,
            None => fatal(format!("unknown value record {}", record)),
        }
    }

    fn fold_mut(&mut self, record: RecordId) -> &mut ValueFold {
        match self.folds.get_mut(&record) {
            Some(fold) => fold,
            None => fatal(format!("unknown value record {}", record)),
        }
    }

    /// Record behind a native wrapper, if the wrapper belongs to a managed value.
    pub fn record_for(&self, handle: NativeHandle) -> Option<RecordId> {
        self.handles.get(&handle).copied()
    }

    /// Record by id, if alive.
    pub fn get(&self, record: RecordId) -> Option<&ValueFold> {
        self.folds.get(&record)
    }

    fn engine_state(&self, engine: EngineAddr) -> &EngineState {
        match self.engines.get(&engine) {
            Some(state) => state,
            None => fatal(format!("unknown engine {}; who created the engine?", engine)),
        }
    }

    fn engine_state_mut(&mut self, engine: EngineAddr) -> &mut EngineState {
        match self.engines.get_mut(&engine) {
            Some(state) => state,
            None => fatal(format!("unknown engine {}; who created the engine?", engine)),
        }
    }

    /// Records of `key` in `engine`, head first.
    pub(crate) fn chain(&self, engine: EngineAddr, key: &ValueKey) -> &[RecordId] {
        self.engine_state(engine)
            .values
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Wrappers of `key` across all engines, followed by matching pending
    /// records.
    pub(crate) fn handles_for(&self, key: &ValueKey) -> Vec<NativeHandle> {
        let mut handles = Vec::new();
        for state in self.engines.values() {
            if let Some(chain) = state.values.get(key) {
                handles.extend(chain.iter().map(|id| self.fold(*id).handle));
            }
        }
        let mut pending: Vec<NativeHandle> = self
            .pending
            .iter()
            .map(|id| self.fold(*id))
            .filter(|fold| fold.key == *key)
            .map(|fold| fold.handle)
            .collect();
        handles.append(&mut pending);
        handles
    }

    /// Live counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            values_alive: self.folds.len(),
            engines: self.engines.len(),
            pending: self.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Bridged, TypeShape};

    #[derive(Default)]
    struct Item {
        n: i32,
    }

    impl Bridged for Item {
        fn shape() -> TypeShape {
            TypeShape::builder::<Item>("Item")
                .field("N", std::mem::offset_of!(Item, n), |i| &i.n, |i| &mut i.n)
                .build()
        }
    }

    const ENGINE: EngineAddr = EngineAddr(0x10);

    fn fold(value: &Managed, engine: Option<EngineAddr>, handle: u64, owner: Ownership) -> ValueFold {
        ValueFold {
            engine,
            key: value.key(),
            value: value.clone(),
            handle: NativeHandle(handle),
            init: None,
            owner,
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.add_engine(ENGINE);
        registry
    }

    #[test]
    fn test_wrapped_chain_head_first() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let (a, b) = (next_record_id(), next_record_id());
        registry.insert_wrapped(a, fold(&value, Some(ENGINE), 1, Ownership::Script));
        registry.insert_wrapped(b, fold(&value, Some(ENGINE), 2, Ownership::Native));
        assert_eq!(registry.chain(ENGINE, &value.key()), &[b, a]);
        assert_eq!(registry.stats().values_alive, 2);
    }

    #[test]
    fn test_existing_handle_rules() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let key = value.key();
        assert_eq!(registry.existing_handle(ENGINE, &key, Ownership::Script, false), None);

        registry.insert_wrapped(next_record_id(), fold(&value, Some(ENGINE), 1, Ownership::Script));
        assert_eq!(
            registry.existing_handle(ENGINE, &key, Ownership::Script, false),
            Some(NativeHandle(1))
        );
        assert_eq!(registry.existing_handle(ENGINE, &key, Ownership::Native, false), None);
        assert_eq!(
            registry.existing_handle(ENGINE, &key, Ownership::Native, true),
            Some(NativeHandle(1))
        );

        registry.insert_wrapped(next_record_id(), fold(&value, Some(ENGINE), 2, Ownership::Native));
        assert_eq!(
            registry.existing_handle(ENGINE, &key, Ownership::Script, false),
            Some(NativeHandle(2))
        );
    }

    #[test]
    fn test_release_promotes_next() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let (a, b) = (next_record_id(), next_record_id());
        registry.insert_wrapped(a, fold(&value, Some(ENGINE), 1, Ownership::Script));
        registry.insert_wrapped(b, fold(&value, Some(ENGINE), 2, Ownership::Script));

        assert_eq!(registry.release(b), Released::Unlinked);
        assert_eq!(registry.chain(ENGINE, &value.key()), &[a]);
        assert_eq!(registry.release(a), Released::ValueDropped);
        assert!(registry.chain(ENGINE, &value.key()).is_empty());
        assert_eq!(registry.stats().values_alive, 0);
    }

    #[test]
    fn test_destroyed_engine_dropped_with_last_value() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let a = next_record_id();
        registry.insert_wrapped(a, fold(&value, Some(ENGINE), 1, Ownership::Native));
        assert!(!registry.destroy_engine(ENGINE));
        assert!(registry.is_destroyed(ENGINE));
        assert_eq!(registry.release(a), Released::EngineDropped(ENGINE));
        assert!(!registry.has_engine(ENGINE));
    }

    #[test]
    fn test_empty_engine_dropped_immediately() {
        let mut registry = registry();
        assert!(registry.destroy_engine(ENGINE));
        assert_eq!(registry.stats().engines, 0);
    }

    #[test]
    fn test_pending_attach_appends() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let (a, p) = (next_record_id(), next_record_id());
        registry.insert_wrapped(a, fold(&value, Some(ENGINE), 1, Ownership::Native));
        registry.insert_pending(p, fold(&value, None, 9, Ownership::Script));
        assert_eq!(registry.stats().pending, 1);
        assert_eq!(registry.handles_for(&value.key()), vec![NativeHandle(1), NativeHandle(9)]);

        registry.attach(Some(ENGINE), p);
        assert_eq!(registry.stats().pending, 0);
        assert_eq!(registry.chain(ENGINE, &value.key()), &[a, p]);
        // Attaching again is a no-op.
        registry.attach(None, p);
        assert_eq!(registry.chain(ENGINE, &value.key()).len(), 2);
    }

    #[test]
    fn test_release_pending() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let p = next_record_id();
        registry.insert_pending(p, fold(&value, None, 3, Ownership::Script));
        assert_eq!(registry.release(p), Released::Pending);
        assert_eq!(registry.stats(), RegistryStats { values_alive: 0, engines: 1, pending: 0 });
    }

    #[test]
    #[should_panic(expected = "who created the value?")]
    fn test_attach_without_engine_is_fatal() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let p = next_record_id();
        registry.insert_pending(p, fold(&value, None, 3, Ownership::Script));
        registry.attach(None, p);
    }

    #[test]
    #[should_panic(expected = "unknown engine")]
    fn test_attach_unknown_engine_is_fatal() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let p = next_record_id();
        registry.insert_pending(p, fold(&value, None, 3, Ownership::Script));
        registry.attach(Some(EngineAddr(0xdead)), p);
    }

    #[test]
    #[should_panic(expected = "unknown value record")]
    fn test_release_twice_is_fatal() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let a = next_record_id();
        registry.insert_wrapped(a, fold(&value, Some(ENGINE), 1, Ownership::Script));
        registry.release(a);
        registry.release(a);
    }

    #[test]
    fn test_record_for_handle() {
        let mut registry = registry();
        let value = Managed::new(Item::default());
        let (a, p) = (next_record_id(), next_record_id());
        registry.insert_wrapped(a, fold(&value, Some(ENGINE), 1, Ownership::Script));
        registry.insert_pending(p, fold(&value, None, 3, Ownership::Script));
        assert_eq!(registry.record_for(NativeHandle(1)), Some(a));
        assert_eq!(registry.record_for(NativeHandle(3)), Some(p));
        assert_eq!(registry.record_for(NativeHandle(2)), None);

        registry.release(a);
        registry.release(p);
        assert_eq!(registry.record_for(NativeHandle(1)), None);
        assert_eq!(registry.record_for(NativeHandle(3)), None);
    }
}
