//! Host-supplied bindings for a module's imports
//!
//! Objects are bound either by `(module, name)` or by position. At
//! instantiation every declared import looks for a named binding first and
//! falls back to the positional binding with its own index. Kinds and types
//! are only checked then, against the module's declarations.

use std::collections::HashMap;

use super::func::{Func, HostFunc};
use super::global::Global;
use super::memory::Memory;
use super::module::{CompiledModule, ExternKind, ExternType};
use super::store::Store;
use super::value::Value;
use crate::error::LinkError;

/// Anything that can satisfy an import.
#[derive(Debug)]
pub enum ImportObject {
    Func(Func),
    /// Moved into the instance it binds to.
    HostFunc(HostFunc),
    Global(Global),
    Memory(Memory),
    /// Bound as an immutable global owned by the instance.
    Value(Value),
}

impl ImportObject {
    pub fn kind(&self) -> ExternKind {
        match self {
            ImportObject::Func(_) | ImportObject::HostFunc(_) => ExternKind::Func,
            ImportObject::Global(_) | ImportObject::Value(_) => ExternKind::Global,
            ImportObject::Memory(_) => ExternKind::Memory,
        }
    }
}

impl From<Func> for ImportObject {
    fn from(func: Func) -> Self {
        ImportObject::Func(func)
    }
}

impl From<HostFunc> for ImportObject {
    fn from(func: HostFunc) -> Self {
        ImportObject::HostFunc(func)
    }
}

impl From<Global> for ImportObject {
    fn from(global: Global) -> Self {
        ImportObject::Global(global)
    }
}

impl From<Memory> for ImportObject {
    fn from(memory: Memory) -> Self {
        ImportObject::Memory(memory)
    }
}

impl From<Value> for ImportObject {
    fn from(value: Value) -> Self {
        ImportObject::Value(value)
    }
}

macro_rules! import_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ImportObject {
                fn from(value: $ty) -> Self {
                    ImportObject::Value(value.into())
                }
            }
        )*
    };
}

import_from_scalar!(i32, i64, f32, f64);

/// Named bindings sharing one module name.
#[derive(Debug, Default)]
pub struct Namespace {
    items: Vec<(String, ImportObject)>,
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace::default()
    }

    pub fn define(&mut self, name: impl Into<String>, object: impl Into<ImportObject>) -> &mut Self {
        self.items.push((name.into(), object.into()));
        self
    }
}

/// Where a resolved import's object is held.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ImportSlot {
    Named(String, String),
    Positional(usize),
}

/// The set of objects offered to a module at instantiation.
///
/// ```
/// use wasm_embed::{HostFunc, Imports};
///
/// let mut imports = Imports::new();
/// imports
///     .define("env", "limit", 10)
///     .define("env", "log", HostFunc::wrap(|x: i32| println!("{x}")));
/// ```
#[derive(Debug, Default)]
pub struct Imports {
    named: HashMap<(String, String), ImportObject>,
    positional: Vec<Option<ImportObject>>,
}

impl Imports {
    pub fn new() -> Imports {
        Imports::default()
    }

    /// Bind `object` to the import `module::name`, replacing an earlier
    /// binding of the same name.
    pub fn define(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        object: impl Into<ImportObject>,
    ) -> &mut Self {
        self.named.insert((module.into(), name.into()), object.into());
        self
    }

    /// Bind `object` to the next declared import by position.
    pub fn push(&mut self, object: impl Into<ImportObject>) -> &mut Self {
        self.positional.push(Some(object.into()));
        self
    }

    pub fn namespace(&mut self, module: impl Into<String>, namespace: Namespace) -> &mut Self {
        let module = module.into();
        for (name, object) in namespace.items {
            self.named.insert((module.clone(), name), object);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.positional.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, slot: &ImportSlot) -> Option<&ImportObject> {
        match slot {
            ImportSlot::Named(module, name) => self.named.get(&(module.clone(), name.clone())),
            ImportSlot::Positional(index) => self.positional.get(*index).and_then(Option::as_ref),
        }
    }

    pub(crate) fn take(&mut self, slot: &ImportSlot) -> Option<ImportObject> {
        match slot {
            ImportSlot::Named(module, name) => self.named.remove(&(module.clone(), name.clone())),
            ImportSlot::Positional(index) => self.positional.get_mut(*index).and_then(Option::take),
        }
    }

    /// Match every declared import to a binding and check it, without
    /// allocating anything.
    pub(crate) fn resolve(&self, store: &Store, module: &CompiledModule) -> Result<Vec<ImportSlot>, LinkError> {
        let mut slots = Vec::with_capacity(module.imports.len());
        for (index, import) in module.imports.iter().enumerate() {
            let named = ImportSlot::Named(import.module.clone(), import.name.clone());
            let slot = if self.get(&named).is_some() {
                named
            } else {
                ImportSlot::Positional(index)
            };
            let Some(object) = self.get(&slot) else {
                return Err(LinkError::MissingImport {
                    index,
                    module: import.module.clone(),
                    name: import.name.clone(),
                });
            };

            if object.kind() != import.ty.kind() {
                return Err(LinkError::KindMismatch {
                    index,
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: import.ty.kind(),
                    found: object.kind(),
                });
            }
            if let Some(found) = mismatch(store, &import.ty, object) {
                return Err(LinkError::SignatureMismatch {
                    index,
                    module: import.module.clone(),
                    name: import.name.clone(),
                    expected: import.ty.to_string(),
                    found,
                });
            }
            slots.push(slot);
        }
        Ok(slots)
    }
}

/// Describe `object` when its type does not satisfy `expected`.
fn mismatch(store: &Store, expected: &ExternType, object: &ImportObject) -> Option<String> {
    match (expected, object) {
        (ExternType::Func(expected), ImportObject::Func(func)) => {
            let actual = &store[func.0].ty;
            (actual != expected).then(|| actual.to_string())
        }
        (ExternType::Func(expected), ImportObject::HostFunc(func)) => {
            (func.ty != *expected).then(|| func.ty.to_string())
        }
        (ExternType::Global(expected), ImportObject::Global(global)) => {
            let actual = store[global.0].ty;
            (actual != *expected).then(|| actual.to_string())
        }
        (ExternType::Global(expected), ImportObject::Value(value)) => {
            (expected.mutable || value.ty() != expected.value_type).then(|| value.ty().to_string())
        }
        (ExternType::Memory(declared), ImportObject::Memory(memory)) => {
            let actual = store[memory.0].memory.current_limits();
            (!actual.matches(declared)).then(|| actual.to_string())
        }
        _ => None,
    }
}

impl<T: Into<ImportObject>> FromIterator<T> for Imports {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut imports = Imports::new();
        for object in iter {
            imports.push(object);
        }
        imports
    }
}
