//! Typed builder for [`TypeShape`]

use std::any::{Any, TypeId};
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use rustc_hash::FxHasher;
use tether_sdk::{ConvertResult, DataType};

use super::shape::{
    downcast, downcast_mut, shape_of, Bridged, Capabilities, FieldShape, HiddenField, Invoker,
    Kind, MethodShape, NestedField, ObjectListField, ParamShape, TypeShape, ValueField,
};
use crate::convert::{short_type_name, FromValue, Returns, ToValue};
use crate::fatal::fatal;
use crate::value::{Managed, ObjectRef, Painter, Value};
use crate::{defaults, BridgeError, BridgeResult};

impl TypeShape {
    /// Start describing `T` under `name`.
    pub fn builder<T: Bridged>(name: &str) -> ShapeBuilder<T> {
        ShapeBuilder {
            shape: TypeShape {
                name: name.to_string(),
                type_id: TypeId::of::<T>(),
                kind: Kind::Struct,
                size: std::mem::size_of::<T>(),
                fields: Vec::new(),
                methods: Vec::new(),
                caps: Capabilities::default(),
            },
            _marker: PhantomData,
        }
    }
}

/// Builder collecting the fields, methods and capabilities of `T`.
pub struct ShapeBuilder<T> {
    shape: TypeShape,
    _marker: PhantomData<fn() -> T>,
}

fn with_receiver<T: 'static, R>(receiver: &Managed, method: &str, f: impl FnOnce(&mut T) -> R) -> R {
    match receiver.write(f) {
        Some(r) => r,
        None => fatal(format!(
            "method {} of {} invoked on a {}",
            method,
            std::any::type_name::<T>(),
            receiver.type_name()
        )),
    }
}

fn param<A: FromValue + 'static>(method: &str, index: usize, arg: Value) -> BridgeResult<A> {
    let from = arg.type_name();
    let shown = arg.to_string();
    A::from_value(arg).map_err(|_| BridgeError::Parameter {
        index,
        method: method.to_string(),
        from,
        to: short_type_name::<A>(),
        value: shown,
    })
}

fn param_shape<A: 'static>() -> ParamShape {
    ParamShape {
        type_id: TypeId::of::<A>(),
    }
}

impl<T: Bridged> ShapeBuilder<T> {
    /// Set the underlying kind (defaults to [`Kind::Struct`]).
    pub fn kind(mut self, kind: Kind) -> Self {
        self.shape.kind = kind;
        self
    }

    // ========================================================================
    // Fields
    // ========================================================================

    fn push_field(
        mut self,
        name: &str,
        offset: usize,
        size: usize,
        data_type: DataType,
        anonymous: bool,
        nested: Option<Arc<TypeShape>>,
        accessor: Arc<dyn super::shape::Accessor>,
    ) -> Self {
        self.shape.fields.push(FieldShape {
            name: name.to_string(),
            offset,
            size,
            data_type,
            anonymous,
            nested,
            accessor,
        });
        self
    }

    /// Add a field. Lowercase names are unexported: they shadow promoted
    /// fields of the same name but are never exposed.
    pub fn field<F>(self, name: &str, offset: usize, get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> Self
    where
        F: ToValue + FromValue + 'static,
    {
        self.push_field(
            name,
            offset,
            std::mem::size_of::<F>(),
            F::DATA_TYPE,
            false,
            None,
            Arc::new(ValueField { get, get_mut }),
        )
    }

    /// Add a field whose name only takes part in shadowing.
    pub fn hidden(self, name: &str, offset: usize, size: usize) -> Self {
        self.push_field(
            name,
            offset,
            size,
            DataType::Invalid,
            false,
            None,
            Arc::new(HiddenField::<T>(PhantomData)),
        )
    }

    /// Add a field holding another bridged struct.
    pub fn nested<E>(self, name: &str, offset: usize, get: fn(&T) -> &E, get_mut: fn(&mut T) -> &mut E) -> Self
    where
        E: Bridged + Clone,
    {
        self.push_field(
            name,
            offset,
            std::mem::size_of::<E>(),
            DataType::Object,
            false,
            Some(shape_of::<E>()),
            Arc::new(NestedField { get, get_mut }),
        )
    }

    /// Add an embedded struct whose fields are promoted into `T`.
    pub fn embed<E>(self, name: &str, offset: usize, get: fn(&T) -> &E, get_mut: fn(&mut T) -> &mut E) -> Self
    where
        E: Bridged + Clone,
    {
        self.push_field(
            name,
            offset,
            std::mem::size_of::<E>(),
            DataType::Object,
            true,
            Some(shape_of::<E>()),
            Arc::new(NestedField { get, get_mut }),
        )
    }

    /// Add a field of native objects, exposed as a list property.
    pub fn object_list(
        self,
        name: &str,
        offset: usize,
        get: fn(&T) -> &Vec<ObjectRef>,
        get_mut: fn(&mut T) -> &mut Vec<ObjectRef>,
    ) -> Self {
        self.push_field(
            name,
            offset,
            std::mem::size_of::<Vec<ObjectRef>>(),
            DataType::ListProperty,
            false,
            None,
            Arc::new(ObjectListField { get, get_mut }),
        )
    }

    // ========================================================================
    // Methods
    // ========================================================================

    fn push_method(
        mut self,
        name: &str,
        params: Vec<ParamShape>,
        num_out: usize,
        result_type: DataType,
        invoker: Invoker,
    ) -> Self {
        self.shape.methods.push(MethodShape {
            name: name.to_string(),
            params,
            num_out,
            result_type,
            invoker,
        });
        self
    }

    /// Add a method without parameters.
    pub fn method0<R>(self, name: &str, f: fn(&mut T) -> R) -> Self
    where
        R: Returns + 'static,
    {
        let method = name.to_string();
        let invoker: Invoker = Arc::new(move |this: &Managed, _args: Vec<Value>| {
            Ok(with_receiver(this, &method, |t: &mut T| f(t)).into_values())
        });
        self.push_method(name, Vec::new(), R::NUM_OUT, R::DATA_TYPE, invoker)
    }

    /// Add a read-only method without parameters returning one value.
    pub fn getter<R>(self, name: &str, f: fn(&T) -> R) -> Self
    where
        R: ToValue + 'static,
    {
        let method = name.to_string();
        let invoker: Invoker = Arc::new(move |this: &Managed, _args: Vec<Value>| {
            match this.read(|t: &T| f(t).to_value()) {
                Some(v) => Ok(vec![v]),
                None => fatal(format!("method {} invoked on a {}", method, this.type_name())),
            }
        });
        self.push_method(name, Vec::new(), 1, R::DATA_TYPE, invoker)
    }

    /// Add a method with one parameter.
    pub fn method1<A, R>(self, name: &str, f: fn(&mut T, A) -> R) -> Self
    where
        A: FromValue + 'static,
        R: Returns + 'static,
    {
        let method = name.to_string();
        let invoker: Invoker = Arc::new(move |this: &Managed, args: Vec<Value>| {
            let mut args = args.into_iter();
            let a = param::<A>(&method, 0, args.next().unwrap_or_default())?;
            Ok(with_receiver(this, &method, |t: &mut T| f(t, a)).into_values())
        });
        self.push_method(name, vec![param_shape::<A>()], R::NUM_OUT, R::DATA_TYPE, invoker)
    }

    /// Add a method with two parameters.
    pub fn method2<A, B, R>(self, name: &str, f: fn(&mut T, A, B) -> R) -> Self
    where
        A: FromValue + 'static,
        B: FromValue + 'static,
        R: Returns + 'static,
    {
        let method = name.to_string();
        let invoker: Invoker = Arc::new(move |this: &Managed, args: Vec<Value>| {
            let mut args = args.into_iter();
            let a = param::<A>(&method, 0, args.next().unwrap_or_default())?;
            let b = param::<B>(&method, 1, args.next().unwrap_or_default())?;
            Ok(with_receiver(this, &method, |t: &mut T| f(t, a, b)).into_values())
        });
        let params = vec![param_shape::<A>(), param_shape::<B>()];
        self.push_method(name, params, R::NUM_OUT, R::DATA_TYPE, invoker)
    }

    /// Add a method with three parameters.
    pub fn method3<A, B, C, R>(self, name: &str, f: fn(&mut T, A, B, C) -> R) -> Self
    where
        A: FromValue + 'static,
        B: FromValue + 'static,
        C: FromValue + 'static,
        R: Returns + 'static,
    {
        let method = name.to_string();
        let invoker: Invoker = Arc::new(move |this: &Managed, args: Vec<Value>| {
            let mut args = args.into_iter();
            let a = param::<A>(&method, 0, args.next().unwrap_or_default())?;
            let b = param::<B>(&method, 1, args.next().unwrap_or_default())?;
            let c = param::<C>(&method, 2, args.next().unwrap_or_default())?;
            Ok(with_receiver(this, &method, |t: &mut T| f(t, a, b, c)).into_values())
        });
        let params = vec![param_shape::<A>(), param_shape::<B>(), param_shape::<C>()];
        self.push_method(name, params, R::NUM_OUT, R::DATA_TYPE, invoker)
    }

    /// Add a method taking any number of generic values.
    ///
    /// `arity` is the declared parameter count; missing arguments arrive as
    /// [`Value::Nil`].
    pub fn method_n<R>(self, name: &str, arity: usize, f: fn(&mut T, Vec<Value>) -> R) -> Self
    where
        R: Returns + 'static,
    {
        let method = name.to_string();
        let invoker: Invoker = Arc::new(move |this: &Managed, mut args: Vec<Value>| {
            args.resize(arity, Value::Nil);
            Ok(with_receiver(this, &method, |t: &mut T| f(t, args)).into_values())
        });
        let params = (0..arity).map(|_| param_shape::<Value>()).collect();
        self.push_method(name, params, R::NUM_OUT, R::DATA_TYPE, invoker)
    }

    /// Add the render callback under the default paint method name.
    pub fn paint(self, f: fn(&mut T, Painter)) -> Self {
        self.method1(defaults::DEFAULT_PAINT_METHOD, f)
    }

    // ========================================================================
    // Capabilities
    // ========================================================================

    /// Render values with `f` (used by `toString` and for map keys).
    pub fn stringer(mut self, f: fn(&T) -> String) -> Self {
        self.shape.caps.stringer = Some(Arc::new(move |any: &dyn Any| f(downcast::<T>(any))));
        self
    }

    /// Render values through their `Display` implementation.
    pub fn display(self) -> Self
    where
        T: Display,
    {
        self.stringer(|t| t.to_string())
    }

    /// Coerce values to an underlying primitive (named primitive types).
    pub fn underlying<P: ToValue + 'static>(mut self, f: fn(&T) -> P) -> Self {
        self.shape.caps.underlying = Some(Arc::new(move |any: &dyn Any| f(downcast::<T>(any)).to_value()));
        self
    }

    /// Replace values with the result of `f` when packing.
    pub fn marshal(mut self, f: fn(&T) -> Value) -> Self {
        self.shape.caps.marshal = Some(Arc::new(move |any: &dyn Any| f(downcast::<T>(any))));
        self
    }

    /// Accept assignments of values no other conversion handles.
    pub fn unmarshal(mut self, f: fn(&mut T, Value) -> ConvertResult<()>) -> Self {
        self.shape.caps.unmarshal = Some(Arc::new(move |any: &mut dyn Any, value: Value| {
            f(downcast_mut::<T>(any), value)
        }));
        self
    }

    /// Allow values to be identified by content.
    pub fn comparable(mut self) -> Self
    where
        T: Eq + Hash,
    {
        fn eq<T: Eq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
            match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        fn hash<T: Hash + 'static>(a: &dyn Any) -> u64 {
            let mut hasher = FxHasher::default();
            downcast::<T>(a).hash(&mut hasher);
            hasher.finish()
        }
        self.shape.caps.eq = Some(eq::<T>);
        self.shape.caps.hash = Some(hash::<T>);
        self
    }

    /// Finish the shape.
    pub fn build(self) -> TypeShape {
        self.shape
    }
}
