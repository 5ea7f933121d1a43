//! Global variables shared between the host and guest code

use super::instance::Instance;
use super::store::{Store, Stored};
use super::value::Value;
use crate::error::{Error, ImmutableGlobalError, TypeError};
use crate::parser::module::{GlobalType, ValueType};

pub(crate) struct GlobalEntity {
    pub(crate) ty: GlobalType,
    pub(crate) value: Value,
    /// The instance that defined the global, `None` for host-created ones.
    pub(crate) owner: Option<Instance>,
}

/// A handle to a global cell in a [`Store`].
///
/// Copies of the handle, the export it came from, and every instance that
/// imported it all observe the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Global(pub(crate) Stored<GlobalEntity>);

impl Global {
    /// Create a standalone global holding `value`.
    pub fn new(store: &mut Store, value: Value, mutable: bool) -> Global {
        store.make_global(value, mutable)
    }

    pub fn get(&self, store: &Store) -> Value {
        store[self.0].value
    }

    /// Replace the value. The new value must have the global's type and the
    /// global must be mutable.
    pub fn set(&self, store: &mut Store, value: Value) -> Result<(), Error> {
        let entity = &mut store[self.0];
        if !entity.ty.mutable {
            return Err(ImmutableGlobalError.into());
        }
        if value.ty() != entity.ty.value_type {
            return Err(TypeError::Value {
                expected: entity.ty.value_type,
                actual: value.ty(),
            }
            .into());
        }
        entity.value = value;
        Ok(())
    }

    pub fn ty(&self, store: &Store) -> GlobalType {
        store[self.0].ty
    }

    pub fn value_type(&self, store: &Store) -> ValueType {
        store[self.0].ty.value_type
    }

    pub fn is_mutable(&self, store: &Store) -> bool {
        store[self.0].ty.mutable
    }
}
