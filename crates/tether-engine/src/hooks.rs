//! Hooks entered by the native runtime
//!
//! A native binding forwards wrapper activity here: construction of
//! registered types, destruction of wrappers, member reads, writes and
//! calls by descriptor index, the render callback and list-property access.
//!
//! Hooks have no error channel back to the native caller, so conversion
//! failures are fatal here. Panics inside the render callback are the
//! exception: they are logged and swallowed.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tether_sdk::{
    DataType, EngineAddr, ListPropertyRef, MemberInfo, MethodTarget, NativeHandle, Ownership, RecordId, TaggedValue,
    ToStringMode, TypeDescriptor,
};

use crate::bridge::Bridge;
use crate::convert::ToValue;
use crate::fatal::fatal;
use crate::reflect::TypeShape;
use crate::registry::{next_record_id, Released, ValueFold};
use crate::value::{Managed, ObjectRef, Painter, Value};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn member_at(descriptor: &TypeDescriptor, index: usize) -> &MemberInfo {
    match descriptor.members.get(index) {
        Some(member) => member,
        None => fatal(format!("{} has no member {}", descriptor.type_name, index)),
    }
}

impl Bridge {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// A script constructed an instance of registered type `spec`; `handle`
    /// is its native object. The value stays pending until first accessed
    /// through an engine.
    pub fn hook_type_new(&self, spec: usize, handle: NativeHandle) -> RecordId {
        let (name, construct, init) = {
            let specs = self.specs.read();
            match specs.get(spec) {
                Some(t) => (t.name.clone(), t.construct.clone(), t.init.clone()),
                None => fatal(format!("unknown type spec {}", spec)),
            }
        };
        let value = construct();
        let record = next_record_id();
        let fold = ValueFold {
            engine: None,
            key: value.key(),
            value,
            handle,
            init,
            owner: Ownership::Script,
        };
        self.registry.lock().insert_pending(record, fold);
        tracing::debug!(%record, %handle, type_name = %name, "value created by native type");
        record
    }

    /// The native wrapper of `record` was freed.
    pub fn hook_destroyed(&self, record: RecordId) {
        let released = self.registry.lock().release(record);
        if let Released::EngineDropped(engine) = released {
            tracing::debug!(%engine, "engine dropped with its last value");
        }
        tracing::debug!(%record, ?released, "value destroyed");
    }

    /// The native runtime hit an unrecoverable error.
    pub fn hook_panic(&self, message: &str) -> ! {
        fatal(message.to_string())
    }

    // ========================================================================
    // Members
    // ========================================================================

    /// Read field or property `member` of the value behind `record`.
    pub fn hook_read_field(&self, engine: Option<EngineAddr>, record: RecordId, member: usize) -> TaggedValue {
        let resolved = self.ensure_engine(engine, record);
        let shape = resolved.value.shape().clone();
        let descriptor = self.types().describe(&shape);
        let info = member_at(&descriptor, member);

        let value = if let Some(get) = info.get_index {
            let mut results = self.invoke(&shape, get, &resolved.value, Vec::new());
            results.pop().unwrap_or_default()
        } else if let Some(field) = info.field {
            if info.member_type == DataType::ListProperty {
                return TaggedValue::ListProperty(ListPropertyRef {
                    record,
                    field,
                    setter: info.set_index,
                });
            }
            let data = resolved.value.read_any();
            shape.read_path(&*data, &descriptor.field_paths[field])
        } else {
            fatal(format!("member {} of {} is not a field", member, shape.name()))
        };
        self.pack_for_hook(&value, resolved.engine)
    }

    /// Assign field or property `member` of the value behind `record`,
    /// through its setter when it has one.
    pub fn hook_write_field(&self, engine: Option<EngineAddr>, record: RecordId, member: usize, assign: TaggedValue) {
        let resolved = self.ensure_engine(engine, record);
        let shape = resolved.value.shape().clone();
        let descriptor = self.types().describe(&shape);
        let info = member_at(&descriptor, member);
        let assign = match self.unpack(assign, Some(resolved.engine)) {
            Ok(value) => value,
            Err(err) => fatal(err.to_string()),
        };

        if let Some(set) = info.set_index {
            self.invoke(&shape, set, &resolved.value, vec![assign]);
        } else if let Some(field) = info.field {
            let written = {
                let mut data = resolved.value.write_any();
                shape.write_path(&mut *data, &descriptor.field_paths[field], assign)
            };
            if let Err(err) = written {
                fatal(err.to_string());
            }
        } else {
            fatal(format!("member {} of {} cannot be written", member, shape.name()));
        }
    }

    /// Call method `member` of the value behind `record`.
    ///
    /// Several results come back as a list.
    pub fn hook_call_method(
        &self,
        engine: Option<EngineAddr>,
        record: RecordId,
        member: usize,
        args: Vec<TaggedValue>,
    ) -> TaggedValue {
        let resolved = self.ensure_engine(engine, record);
        let shape = resolved.value.shape().clone();
        let descriptor = self.types().describe(&shape);
        let info = member_at(&descriptor, member);

        let result = match info.method {
            Some(MethodTarget::Method(index)) => {
                let args = args
                    .into_iter()
                    .map(|arg| self.unpack(arg, Some(resolved.engine)))
                    .collect::<Result<Vec<_>, _>>();
                let args = match args {
                    Ok(args) => args,
                    Err(err) => fatal(err.to_string()),
                };
                let mut results = self.invoke(&shape, index, &resolved.value, args);
                match results.len() {
                    0 => return TaggedValue::Invalid,
                    1 => results.pop().unwrap_or_default(),
                    _ => Value::Seq(results),
                }
            }
            Some(MethodTarget::ValueOf) => {
                let data = resolved.value.read_any();
                shape.underlying(&*data).unwrap_or_default()
            }
            Some(MethodTarget::ToString(mode)) => Value::Str(render(&shape, &resolved.value, mode)),
            None => fatal(format!("member {} of {} is not a method", member, shape.name())),
        };
        self.pack_for_hook(&result, resolved.engine)
    }

    /// Render callback for the value behind `record`.
    ///
    /// Runs the type's paint method with the calling thread marked as the
    /// render thread. Panics are logged with a backtrace and swallowed; the
    /// render thread mark is always cleared.
    pub fn hook_paint(&self, engine: Option<EngineAddr>, record: RecordId) {
        let _painting = self.scheduler().enter_paint();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.paint(engine, record)));
        if let Err(payload) = outcome {
            let backtrace = Backtrace::force_capture();
            tracing::error!(
                %record,
                panic = %panic_message(&*payload),
                %backtrace,
                "panic while painting"
            );
        }
    }

    fn paint(&self, engine: Option<EngineAddr>, record: RecordId) {
        let resolved = self.ensure_engine(engine, record);
        if resolved.deferred {
            return;
        }
        let shape = resolved.value.shape().clone();
        let descriptor = self.types().describe(&shape);
        let Some(member) = descriptor.paint else {
            fatal(format!("{} has no paint method", shape.name()))
        };
        let Some(MethodTarget::Method(index)) = member_at(&descriptor, member).method else {
            fatal(format!("paint member of {} is not a method", shape.name()))
        };
        let painter = Painter {
            engine: resolved.engine,
            object: ObjectRef::new(Some(resolved.engine), resolved.handle),
        };
        self.invoke(&shape, index, &resolved.value, vec![Value::Painter(painter)]);
    }

    // ========================================================================
    // List properties
    // ========================================================================

    /// Object at `index` of a list property.
    pub fn hook_list_at(&self, list: ListPropertyRef, index: usize) -> TaggedValue {
        let (value, _, shape, path) = self.list_target(&list);
        let found = {
            let mut data = value.write_any();
            shape.with_object_list(&mut *data, &path, |objects| objects.get(index).copied())
        };
        match found {
            Some(object) => TaggedValue::Object(object.handle),
            None => fatal(format!("list property index {} out of range", index)),
        }
    }

    /// Length of a list property.
    pub fn hook_list_count(&self, list: ListPropertyRef) -> usize {
        let (value, _, shape, path) = self.list_target(&list);
        let mut data = value.write_any();
        shape.with_object_list(&mut *data, &path, |objects| objects.len())
    }

    /// Append a native object to a list property.
    pub fn hook_list_append(&self, list: ListPropertyRef, object: NativeHandle) {
        let (value, engine, shape, path) = self.list_target(&list);
        let object = ObjectRef::new(engine, object);
        let Some(setter) = list.setter else {
            let mut data = value.write_any();
            shape.with_object_list(&mut *data, &path, |objects| objects.push(object));
            return;
        };
        let mut updated = {
            let mut data = value.write_any();
            shape.with_object_list(&mut *data, &path, |objects| objects.clone())
        };
        updated.push(object);
        self.invoke(&shape, setter, &value, vec![updated.to_value()]);
    }

    /// Remove every object from a list property.
    pub fn hook_list_clear(&self, list: ListPropertyRef) {
        let (value, _, shape, path) = self.list_target(&list);
        match list.setter {
            Some(setter) => {
                self.invoke(&shape, setter, &value, vec![Vec::<ObjectRef>::new().to_value()]);
            }
            None => {
                let mut data = value.write_any();
                shape.with_object_list(&mut *data, &path, Vec::clear);
            }
        }
    }

    fn list_target(&self, list: &ListPropertyRef) -> (Managed, Option<EngineAddr>, Arc<TypeShape>, Vec<usize>) {
        let (value, engine) = {
            let registry = self.registry.lock();
            let fold = registry.fold(list.record);
            (fold.value.clone(), fold.engine)
        };
        let shape = value.shape().clone();
        let descriptor = self.types().describe(&shape);
        let Some(path) = descriptor.field_paths.get(list.field) else {
            fatal(format!("{} has no field path {}", shape.name(), list.field))
        };
        let path = path.clone();
        (value, engine, shape, path)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn invoke(&self, shape: &TypeShape, index: usize, receiver: &Managed, args: Vec<Value>) -> Vec<Value> {
        let Some(method) = shape.methods().get(index) else {
            fatal(format!("{} has no method {}", shape.name(), index))
        };
        match self.in_managed(|| method.invoke(receiver, args)) {
            Ok(results) => results,
            Err(err) => fatal(err.to_string()),
        }
    }

    fn pack_for_hook(&self, value: &Value, engine: EngineAddr) -> TaggedValue {
        match self.pack(value, Some(engine), Ownership::Script) {
            Ok(packed) => packed,
            Err(err) => fatal(err.to_string()),
        }
    }
}

fn render(shape: &TypeShape, value: &Managed, mode: ToStringMode) -> String {
    let data = value.read_any();
    let rendered = match mode {
        ToStringMode::Stringer => shape.render(&*data),
        ToStringMode::ValueOf => shape.underlying(&*data).map(|v| v.to_string()),
        ToStringMode::TypeName => None,
    };
    rendered.unwrap_or_else(|| shape.name().to_string())
}
