//! Module instances, their exports and attached host info

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::func::Func;
use super::global::Global;
use super::memory::Memory;
use super::module::{ExternKind, Module};
use super::store::{Store, Stored};
use super::table::Table;
use crate::error::{Error, NotFound};

/// An exported item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extern {
    Func(Func),
    Global(Global),
    Memory(Memory),
}

impl Extern {
    pub fn kind(&self) -> ExternKind {
        match self {
            Extern::Func(_) => ExternKind::Func,
            Extern::Global(_) => ExternKind::Global,
            Extern::Memory(_) => ExternKind::Memory,
        }
    }

    pub fn into_func(self) -> Option<Func> {
        match self {
            Extern::Func(func) => Some(func),
            _ => None,
        }
    }

    pub fn into_global(self) -> Option<Global> {
        match self {
            Extern::Global(global) => Some(global),
            _ => None,
        }
    }

    pub fn into_memory(self) -> Option<Memory> {
        match self {
            Extern::Memory(memory) => Some(memory),
            _ => None,
        }
    }
}

/// An export looked up by name or by position in the export list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKey<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for ExportKey<'a> {
    fn from(name: &'a str) -> Self {
        ExportKey::Name(name)
    }
}

impl<'a> From<&'a String> for ExportKey<'a> {
    fn from(name: &'a String) -> Self {
        ExportKey::Name(name)
    }
}

impl From<usize> for ExportKey<'_> {
    fn from(index: usize) -> Self {
        ExportKey::Index(index)
    }
}

impl fmt::Display for ExportKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportKey::Name(name) => write!(f, "\"{name}\""),
            ExportKey::Index(index) => write!(f, "index {index}"),
        }
    }
}

/// The resolved index spaces the interpreter reads, imports first.
#[derive(Debug, Default)]
pub(crate) struct Links {
    pub(crate) funcs: Vec<Func>,
    pub(crate) globals: Vec<Global>,
    pub(crate) memory: Option<Memory>,
    pub(crate) table: Option<Table>,
}

/// Objects released together with the instance.
#[derive(Debug, Default)]
pub(crate) struct Owned {
    pub(crate) funcs: Vec<Func>,
    pub(crate) globals: Vec<Global>,
    pub(crate) memories: Vec<Memory>,
    pub(crate) tables: Vec<Table>,
}

struct HostInfo {
    payload: Box<dyn Any + Send>,
    finalizer: Box<dyn FnOnce(Box<dyn Any + Send>) + Send>,
}

pub(crate) struct InstanceEntity {
    pub(crate) module: Module,
    pub(crate) links: Arc<Links>,
    pub(crate) exports: Vec<(String, Extern)>,
    pub(crate) owned: Owned,
    /// Live instances whose exports this one imported.
    pub(crate) imports_from: Vec<Instance>,
    /// Live instances importing one of this instance's exports.
    pub(crate) importers: usize,
    host_info: Option<HostInfo>,
    pub(crate) sequence: u64,
}

impl InstanceEntity {
    pub(crate) fn new(module: Module, sequence: u64) -> Self {
        InstanceEntity {
            module,
            links: Arc::default(),
            exports: Vec::new(),
            owned: Owned::default(),
            imports_from: Vec::new(),
            importers: 0,
            host_info: None,
            sequence,
        }
    }

    /// Hand the payload to the finalizer. Returns whether one ran; a second
    /// call never runs it again.
    pub(crate) fn run_finalizer(&mut self) -> bool {
        match self.host_info.take() {
            Some(HostInfo { payload, finalizer }) => {
                finalizer(payload);
                true
            }
            None => false,
        }
    }
}

/// A handle to a live instance in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance(pub(crate) Stored<InstanceEntity>);

impl Instance {
    /// Whether the instance is still alive in `store`.
    pub fn is_valid(&self, store: &Store) -> bool {
        store.contains(self.0)
    }

    pub fn module<'a>(&self, store: &'a Store) -> &'a Module {
        &store[self.0].module
    }

    /// Exports in declaration order.
    pub fn exports<'a>(&self, store: &'a Store) -> impl Iterator<Item = (&'a str, Extern)> + 'a {
        store[self.0]
            .exports
            .iter()
            .map(|(name, external)| (name.as_str(), *external))
    }

    pub fn get_export<'k>(&self, store: &Store, key: impl Into<ExportKey<'k>>) -> Option<Extern> {
        let exports = &store[self.0].exports;
        match key.into() {
            ExportKey::Name(name) => exports.iter().find(|(export, _)| export.as_str() == name).map(|(_, e)| *e),
            ExportKey::Index(index) => exports.get(index).map(|(_, e)| *e),
        }
    }

    fn export_of<'k, T>(
        &self,
        store: &Store,
        key: impl Into<ExportKey<'k>>,
        kind: ExternKind,
        pick: impl FnOnce(Extern) -> Option<T>,
    ) -> Result<T, NotFound> {
        let key = key.into();
        self.get_export(store, key).and_then(pick).ok_or_else(|| NotFound {
            kind,
            key: key.to_string(),
        })
    }

    pub fn exported_func<'k>(&self, store: &Store, key: impl Into<ExportKey<'k>>) -> Result<Func, NotFound> {
        self.export_of(store, key, ExternKind::Func, Extern::into_func)
    }

    pub fn exported_global<'k>(&self, store: &Store, key: impl Into<ExportKey<'k>>) -> Result<Global, NotFound> {
        self.export_of(store, key, ExternKind::Global, Extern::into_global)
    }

    pub fn exported_memory<'k>(&self, store: &Store, key: impl Into<ExportKey<'k>>) -> Result<Memory, NotFound> {
        self.export_of(store, key, ExternKind::Memory, Extern::into_memory)
    }

    /// Attach a payload that is passed to `finalizer` exactly once, when the
    /// instance is disposed or its store is dropped.
    pub fn set_host_info<T, F>(&self, store: &mut Store, payload: T, finalizer: F) -> Result<(), Error>
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let entity = &mut store[self.0];
        if entity.host_info.is_some() {
            return Err(Error::HostInfoAlreadySet);
        }
        entity.host_info = Some(HostInfo {
            payload: Box::new(payload),
            finalizer: Box::new(move |payload: Box<dyn Any + Send>| {
                if let Ok(payload) = payload.downcast::<T>() {
                    finalizer(*payload);
                }
            }),
        });
        Ok(())
    }

    /// The attached payload, if one of type `T` is set.
    pub fn host_info<'a, T: 'static>(&self, store: &'a Store) -> Option<&'a T> {
        store[self.0]
            .host_info
            .as_ref()
            .and_then(|info| info.payload.downcast_ref::<T>())
    }
}
