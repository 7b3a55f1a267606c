//! Bridged managed data and its registry identity

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::fatal::fatal;
use crate::reflect::{shape_of, Bridged, Kind, TypeShape};

type Data = dyn Any + Send + Sync;

/// Shared handle to a value of a bridged type.
///
/// Cloning is cheap and preserves identity: every clone refers to the same
/// data, and the registry tracks wrappers per identity. Values created with
/// [`Managed::by_value`] are instead identified by content, which requires
/// the type to be comparable.
#[derive(Clone)]
pub struct Managed {
    shape: Arc<TypeShape>,
    by_value: bool,
    data: Arc<RwLock<Data>>,
}

impl Managed {
    /// Share `value` by identity.
    pub fn new<T: Bridged>(value: T) -> Self {
        Self::from_parts(shape_of::<T>(), Arc::new(RwLock::new(value)), false)
    }

    /// Share `value` by content.
    ///
    /// Two by-value handles with equal contents map to the same wrapper.
    pub fn by_value<T: Bridged>(value: T) -> Self {
        Self::from_parts(shape_of::<T>(), Arc::new(RwLock::new(value)), true)
    }

    pub(crate) fn from_parts(shape: Arc<TypeShape>, data: Arc<RwLock<Data>>, by_value: bool) -> Self {
        Self {
            shape,
            by_value,
            data,
        }
    }

    /// Shape of the underlying type
    pub fn shape(&self) -> &Arc<TypeShape> {
        &self.shape
    }

    /// Name of the underlying type
    pub fn type_name(&self) -> &str {
        self.shape.name()
    }

    /// True when identified by content
    pub fn is_by_value(&self) -> bool {
        self.by_value
    }

    /// Address of the underlying data.
    ///
    /// Stable for the lifetime of the data; equal to `&T as *const T` for a
    /// reference obtained through [`Managed::read`].
    pub fn addr(&self) -> usize {
        self.data.data_ptr() as *const () as usize
    }

    /// True when both handles refer to the same data
    pub fn ptr_eq(&self, other: &Managed) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// True when the underlying type is `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.shape.type_id() == TypeId::of::<T>()
    }

    /// Run `f` with shared access. `None` if the type is not `T`.
    pub fn read<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.data.read();
        guard.downcast_ref::<T>().map(f)
    }

    /// Run `f` with exclusive access. `None` if the type is not `T`.
    pub fn write<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.data.write();
        guard.downcast_mut::<T>().map(f)
    }

    /// Copy the data out. `None` if the type is not `T`.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.read(|v: &T| v.clone())
    }

    pub(crate) fn read_any(&self) -> RwLockReadGuard<'_, Data> {
        self.data.read()
    }

    pub(crate) fn write_any(&self) -> RwLockWriteGuard<'_, Data> {
        self.data.write()
    }

    /// Registry identity of this value.
    ///
    /// Fatal for by-value data of an incomparable type and for pointer
    /// shapes, which would need a second level of indirection.
    pub(crate) fn key(&self) -> ValueKey {
        if self.by_value {
            let caps = self.shape.caps();
            match (caps.hash, caps.eq) {
                (Some(hash), Some(_)) => {
                    let hash = hash(&*self.read_any());
                    ValueKey::Struct(StructKey {
                        hash,
                        value: self.clone(),
                    })
                }
                _ => fatal(format!(
                    "cannot hand an unhashable struct value ({}) to native logic; use its address instead",
                    self.type_name()
                )),
            }
        } else if self.shape.kind() == Kind::Ptr {
            fatal(format!(
                "cannot hand pointer of pointer ({}) to native logic; use a simple pointer instead",
                self.type_name()
            ))
        } else {
            ValueKey::Addr(self.addr())
        }
    }
}

impl PartialEq for Managed {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if !(self.by_value && other.by_value) || self.shape.type_id() != other.shape.type_id() {
            return false;
        }
        match self.shape.caps().eq {
            Some(eq) => eq(&*self.read_any(), &*other.read_any()),
            None => false,
        }
    }
}

impl fmt::Debug for Managed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("type", &self.type_name())
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("by_value", &self.by_value)
            .finish()
    }
}

// ============================================================================
// Registry identity
// ============================================================================

/// Identity under which the registry groups wrappers of one value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    /// Data address of a shared value
    Addr(usize),
    /// Content of a by-value value
    Struct(StructKey),
}

impl fmt::Debug for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKey::Addr(addr) => write!(f, "Addr({:#x})", addr),
            ValueKey::Struct(key) => write!(f, "Struct({}, {:#x})", key.value.type_name(), key.hash),
        }
    }
}

#[derive(Clone)]
pub(crate) struct StructKey {
    hash: u64,
    value: Managed,
}

impl PartialEq for StructKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value == other.value
    }
}

impl Eq for StructKey {}

impl Hash for StructKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.shape.type_id().hash(state);
        state.write_u64(self.hash);
    }
}
