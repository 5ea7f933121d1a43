//! The Store owns every runtime object created in one session
//!
//! Functions, globals, memories, tables and instances live in per-kind
//! arenas inside the [`Store`]. Host code holds small copyable handles: a
//! store id, a slot index and the slot's generation. Copying a handle never
//! copies the object, so a global or memory bound as an import and the
//! handle the host kept refer to the same cell.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                        Store                         │
//! │  funcs      [0] Host  (standalone)                   │
//! │             [1] Wasm  { instance 0, func 2 }         │
//! │  globals    [0] i32 mut (standalone, imported by 0)  │
//! │  memories   [0] owned by instance 0                  │
//! │  instances  [0] links -> funcs[1], globals[0], ...   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Disposing an instance frees its slots and bumps their generations, so a
//! stale handle is detected instead of aliasing whatever reuses the slot.
//! Using a handle with the wrong store, or after its slot was freed, panics.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::engine::Engine;
use super::executor;
use super::func::{Func, FuncEntity, FuncKind, HostFunc};
use super::global::{Global, GlobalEntity};
use super::imports::{ImportObject, ImportSlot, Imports};
use super::instance::{Extern, Instance, InstanceEntity, Links, Owned};
use super::memory::{LinearMemory, Memory, MemoryEntity, MemoryLimits};
use super::module::{CompiledModule, Module};
use super::table::{Table, TableEntity};
use super::trap::Trap;
use super::value::Value;
use crate::error::{CompileError, Error, LinkError};
use crate::parser::module::{ConstExpr, DataMode, ExportIndex, GlobalType};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

/// A generation-checked reference to an object in a [`Store`].
pub struct Stored<T> {
    store_id: u64,
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Stored<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Stored<T> {}

impl<T> PartialEq for Stored<T> {
    fn eq(&self, other: &Self) -> bool {
        self.store_id == other.store_id && self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Stored<T> {}

impl<T> Hash for Stored<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store_id.hash(state);
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Stored<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}@{}", self.store_id, self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slots are reused after removal with a bumped generation.
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> (u32, u32) {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                (index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                ((self.slots.len() - 1) as u32, 0)
            }
        }
    }

    fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_ref())
    }

    fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_mut())
    }

    fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(value)
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }
}

/// An object kind kept in its own arena.
pub(crate) trait Entity: Sized {
    const KIND: &'static str;
    fn arena(store: &Store) -> &Arena<Self>;
    fn arena_mut(store: &mut Store) -> &mut Arena<Self>;
}

macro_rules! entities {
    ($($entity:ty => $field:ident, $kind:literal;)*) => {
        $(
            impl Entity for $entity {
                const KIND: &'static str = $kind;

                fn arena(store: &Store) -> &Arena<Self> {
                    &store.$field
                }

                fn arena_mut(store: &mut Store) -> &mut Arena<Self> {
                    &mut store.$field
                }
            }
        )*
    };
}

entities! {
    FuncEntity => funcs, "function";
    GlobalEntity => globals, "global";
    MemoryEntity => memories, "memory";
    TableEntity => tables, "table";
    InstanceEntity => instances, "instance";
}

/// Owning arena for every module instance and host object of one session.
///
/// A `Store` is used from one thread at a time; it is `Send` but not `Sync`.
pub struct Store {
    id: u64,
    engine: Engine,
    funcs: Arena<FuncEntity>,
    globals: Arena<GlobalEntity>,
    memories: Arena<MemoryEntity>,
    tables: Arena<TableEntity>,
    instances: Arena<InstanceEntity>,
    next_sequence: u64,
}

#[allow(private_bounds)]
impl<T: Entity> Index<Stored<T>> for Store {
    type Output = T;

    fn index(&self, handle: Stored<T>) -> &T {
        self.check_owner(&handle, T::KIND);
        match T::arena(self).get(handle.index, handle.generation) {
            Some(value) => value,
            None => panic!("{} handle {handle:?} used after it was released", T::KIND),
        }
    }
}

#[allow(private_bounds)]
impl<T: Entity> IndexMut<Stored<T>> for Store {
    fn index_mut(&mut self, handle: Stored<T>) -> &mut T {
        self.check_owner(&handle, T::KIND);
        match T::arena_mut(self).get_mut(handle.index, handle.generation) {
            Some(value) => value,
            None => panic!("{} handle {handle:?} used after it was released", T::KIND),
        }
    }
}

impl Store {
    pub fn new(engine: &Engine) -> Store {
        Store {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            engine: engine.clone(),
            funcs: Arena::default(),
            globals: Arena::default(),
            memories: Arena::default(),
            tables: Arena::default(),
            instances: Arena::default(),
            next_sequence: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn check_owner<T>(&self, handle: &Stored<T>, kind: &str) {
        if handle.store_id != self.id {
            panic!(
                "{kind} handle {handle:?} belongs to store {}, not store {}",
                handle.store_id, self.id
            );
        }
    }

    pub(crate) fn alloc<T: Entity>(&mut self, value: T) -> Stored<T> {
        let (index, generation) = T::arena_mut(self).insert(value);
        Stored {
            store_id: self.id,
            index,
            generation,
            _marker: PhantomData,
        }
    }

    fn release<T: Entity>(&mut self, handle: Stored<T>) -> Option<T> {
        if handle.store_id != self.id {
            return None;
        }
        T::arena_mut(self).remove(handle.index, handle.generation)
    }

    /// Whether `handle` refers to a live object in this store.
    pub(crate) fn contains<T: Entity>(&self, handle: Stored<T>) -> bool {
        handle.store_id == self.id && T::arena(self).get(handle.index, handle.generation).is_some()
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Decode and validate a binary. Nothing is added to the store.
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, CompileError> {
        let compiled = self.engine.compile(bytes)?;
        Ok(Module::from_compiled(self.id, compiled))
    }

    /// Create a standalone global usable as an import binding.
    pub fn make_global(&mut self, value: Value, mutable: bool) -> Global {
        Global(self.alloc(GlobalEntity {
            ty: GlobalType {
                value_type: value.ty(),
                mutable,
            },
            value,
            owner: None,
        }))
    }

    /// Create a standalone memory of `limits.min_pages` zeroed pages.
    pub fn make_memory(&mut self, limits: MemoryLimits) -> Result<Memory, Error> {
        let memory = LinearMemory::new(limits)?;
        Ok(Memory(self.alloc(MemoryEntity { memory, owner: None })))
    }

    /// Compile `bytes` and instantiate the result.
    pub fn instantiate_bytes(&mut self, bytes: &[u8], imports: Imports) -> Result<Instance, Error> {
        let module = self.compile(bytes)?;
        self.instantiate(&module, imports)
    }

    /// Link `module` against `imports`, initialise its state and run its
    /// start function.
    ///
    /// Either a fully initialised instance is returned or nothing that was
    /// allocated for it remains in the store. Writes that a trapping start
    /// function made to imported memories or globals are not rolled back.
    pub fn instantiate(&mut self, module: &Module, mut imports: Imports) -> Result<Instance, Error> {
        if module.store_id() != self.id {
            panic!(
                "module compiled by store {} instantiated in store {}",
                module.store_id(),
                self.id
            );
        }
        let compiled = module.compiled().clone();

        let slots = imports.resolve(self, &compiled)?;
        let memory = compiled
            .parsed
            .memory
            .map(|limits| LinearMemory::new(limits.into()))
            .transpose()?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let instance = Instance(self.alloc(InstanceEntity::new(module.clone(), sequence)));

        let result = self
            .link(instance, &compiled, &slots, &mut imports, memory)
            .and_then(|()| self.initialize(instance, &compiled));
        match result {
            Ok(()) => {
                debug!(
                    imports = compiled.imports.len(),
                    exports = compiled.exports.len(),
                    "instantiated module"
                );
                Ok(instance)
            }
            Err(err) => {
                self.release_instance(instance);
                Err(err)
            }
        }
    }

    /// Allocate everything the instance owns and build its index spaces.
    fn link(
        &mut self,
        instance: Instance,
        compiled: &Arc<CompiledModule>,
        slots: &[ImportSlot],
        imports: &mut Imports,
        memory: Option<LinearMemory>,
    ) -> Result<(), Error> {
        let parsed = &compiled.parsed;
        let mut owned = Owned::default();
        let mut links = Links::default();
        let mut imports_from = Vec::new();
        let mut bound: HashMap<&ImportSlot, Extern> = HashMap::new();

        for (index, slot) in slots.iter().enumerate() {
            let external = match bound.get(slot) {
                Some(external) => *external,
                None => {
                    let Some(object) = imports.take(slot) else {
                        // keep what was bound so far releasable
                        self[instance.0].owned = owned;
                        let import = &compiled.imports[index];
                        return Err(LinkError::MissingImport {
                            index,
                            module: import.module.clone(),
                            name: import.name.clone(),
                        }
                        .into());
                    };
                    let external = self.bind(instance, object, &mut owned);
                    bound.insert(slot, external);
                    external
                }
            };
            if let Some(exporter) = self.owner_of(external) {
                if exporter != instance && !imports_from.contains(&exporter) {
                    imports_from.push(exporter);
                }
            }
            match external {
                Extern::Func(func) => links.funcs.push(func),
                Extern::Global(global) => links.globals.push(global),
                Extern::Memory(memory) => links.memory = Some(memory),
            }
        }

        if let Some(memory) = memory {
            let memory = Memory(self.alloc(MemoryEntity {
                memory,
                owner: Some(instance),
            }));
            owned.memories.push(memory);
            links.memory = Some(memory);
        }

        if let Some(table_type) = parsed.table {
            let table = Table(self.alloc(TableEntity::new(table_type)));
            owned.tables.push(table);
            links.table = Some(table);
        }

        for global in &parsed.globals {
            let value = match self.eval_const(&links, global.init) {
                Ok(value) => value,
                Err(err) => {
                    self[instance.0].owned = owned;
                    return Err(err.into());
                }
            };
            let handle = Global(self.alloc(GlobalEntity {
                ty: global.global_type,
                value,
                owner: Some(instance),
            }));
            owned.globals.push(handle);
            links.globals.push(handle);
        }

        let imported = parsed.imported_function_count();
        for (defined, type_index) in parsed.functions.iter().enumerate() {
            let func = Func(self.alloc(FuncEntity {
                ty: parsed.types[*type_index as usize].clone(),
                kind: FuncKind::Wasm {
                    instance,
                    func_index: imported + defined as u32,
                },
                owner: Some(instance),
            }));
            owned.funcs.push(func);
            links.funcs.push(func);
        }

        let exports = parsed
            .exports
            .iter()
            .filter_map(|export| {
                let external = match export.index {
                    ExportIndex::Function(index) => links.funcs.get(index as usize).copied().map(Extern::Func),
                    ExportIndex::Global(index) => links.globals.get(index as usize).copied().map(Extern::Global),
                    ExportIndex::Memory(_) => links.memory.map(Extern::Memory),
                    ExportIndex::Table(_) => None,
                };
                external.map(|external| (export.name.clone(), external))
            })
            .collect();

        for exporter in &imports_from {
            self[exporter.0].importers += 1;
        }
        let entity = &mut self[instance.0];
        entity.links = Arc::new(links);
        entity.exports = exports;
        entity.owned = owned;
        entity.imports_from = imports_from;
        Ok(())
    }

    /// Turn one import object into an external, allocating it when the
    /// instance takes ownership.
    fn bind(&mut self, instance: Instance, object: ImportObject, owned: &mut Owned) -> Extern {
        match object {
            ImportObject::Func(func) => Extern::Func(func),
            ImportObject::HostFunc(HostFunc { ty, callable }) => {
                let func = Func(self.alloc(FuncEntity {
                    ty,
                    kind: FuncKind::Host(callable),
                    owner: Some(instance),
                }));
                owned.funcs.push(func);
                Extern::Func(func)
            }
            ImportObject::Global(global) => Extern::Global(global),
            ImportObject::Memory(memory) => Extern::Memory(memory),
            ImportObject::Value(value) => {
                let global = Global(self.alloc(GlobalEntity {
                    ty: GlobalType {
                        value_type: value.ty(),
                        mutable: false,
                    },
                    value,
                    owner: Some(instance),
                }));
                owned.globals.push(global);
                Extern::Global(global)
            }
        }
    }

    fn owner_of(&self, external: Extern) -> Option<Instance> {
        match external {
            Extern::Func(func) => self[func.0].owner,
            Extern::Global(global) => self[global.0].owner,
            Extern::Memory(memory) => self[memory.0].owner,
        }
    }

    fn eval_const(&self, links: &Links, expr: ConstExpr) -> Result<Value, CompileError> {
        Ok(match expr {
            ConstExpr::I32(value) => Value::I32(value),
            ConstExpr::I64(value) => Value::I64(value),
            ConstExpr::F32(value) => Value::F32(value),
            ConstExpr::F64(value) => Value::F64(value),
            ConstExpr::NullRef => Value::ExternRef(None),
            ConstExpr::GlobalGet(index) => match links.globals.get(index as usize) {
                Some(global) => self[global.0].value,
                None => {
                    return Err(CompileError::invalid(0, format!("unknown global {index}")));
                }
            },
        })
    }

    fn segment_offset(&self, links: &Links, expr: ConstExpr) -> Result<u32, CompileError> {
        match self.eval_const(links, expr)? {
            Value::I32(offset) => Ok(offset as u32),
            other => Err(CompileError::invalid(
                0,
                format!("segment offset must be i32, got {}", other.ty()),
            )),
        }
    }

    /// Check every segment, then write them all, then run the start function.
    fn initialize(&mut self, instance: Instance, compiled: &Arc<CompiledModule>) -> Result<(), Error> {
        let parsed = &compiled.parsed;
        let links = self[instance.0].links.clone();

        let mut elements = Vec::with_capacity(parsed.elements.len());
        for element in &parsed.elements {
            let offset = self.segment_offset(&links, element.offset)?;
            if let Some(table) = links.table {
                self[table.0].check_range(offset, element.functions.len())?;
            }
            let funcs: Vec<Func> = element
                .functions
                .iter()
                .filter_map(|index| links.funcs.get(*index as usize).copied())
                .collect();
            elements.push((offset, funcs));
        }

        let mut data = Vec::with_capacity(parsed.data.len());
        for segment in &parsed.data {
            let DataMode::Active { offset } = segment.mode else {
                continue;
            };
            let offset = self.segment_offset(&links, offset)?;
            if let Some(memory) = links.memory {
                self[memory.0].memory.check_range(offset, segment.init.len())?;
            }
            data.push((offset, &segment.init));
        }

        if let Some(table) = links.table {
            for (offset, funcs) in &elements {
                self[table.0].init(*offset, funcs)?;
            }
        }
        if let Some(memory) = links.memory {
            for (offset, bytes) in data {
                self[memory.0].memory.write_bytes(offset, bytes)?;
            }
        }

        if let Some(start) = parsed.start {
            if let Some(func) = links.funcs.get(start as usize).copied() {
                executor::invoke(self, func, &[]).map_err(|trap: Trap| {
                    warn!(func_index = start, %trap, "start function trapped");
                    Error::Trap(trap)
                })?;
            }
        }
        Ok(())
    }

    /// Free an instance and everything it owns, without running its finalizer.
    fn release_instance(&mut self, instance: Instance) -> Option<InstanceEntity> {
        let mut entity = self.release(instance.0)?;
        let owned = std::mem::take(&mut entity.owned);
        for func in owned.funcs {
            self.release(func.0);
        }
        for global in owned.globals {
            self.release(global.0);
        }
        for memory in owned.memories {
            self.release(memory.0);
        }
        for table in owned.tables {
            self.release(table.0);
        }
        for exporter in &entity.imports_from {
            if let Some(exporter) = self.instances.get_mut(exporter.0.index, exporter.0.generation) {
                exporter.importers -= 1;
            }
        }
        Some(entity)
    }

    /// Run the instance's finalizer, then release it and everything it owns.
    ///
    /// Every handle into the instance is invalid afterwards. Refused while
    /// another live instance imports one of its exports.
    pub fn dispose_instance(&mut self, instance: Instance) -> Result<(), Error> {
        let entity = &mut self[instance.0];
        if entity.importers > 0 {
            return Err(Error::InstanceInUse {
                importers: entity.importers,
            });
        }
        let finalized = entity.run_finalizer();
        self.release_instance(instance);
        debug!(finalized, "disposed instance");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // finalizers run in creation order, before any storage is freed
        let mut instances: Vec<&mut InstanceEntity> = self.instances.values_mut().collect();
        instances.sort_by_key(|entity| entity.sequence);
        let mut finalized = 0;
        for entity in instances {
            if entity.run_finalizer() {
                finalized += 1;
            }
        }
        debug!(
            store = self.id,
            instances = self.instances.len(),
            finalized,
            "dropping store"
        );
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("funcs", &self.funcs.len())
            .field("globals", &self.globals.len())
            .field("memories", &self.memories.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_reuses_slots_with_new_generation() {
        let mut arena = Arena::default();
        let (a, gen_a) = arena.insert("a");
        assert_eq!(arena.remove(a, gen_a), Some("a"));
        assert_eq!(arena.remove(a, gen_a), None);

        let (b, gen_b) = arena.insert("b");
        assert_eq!(a, b);
        assert_ne!(gen_a, gen_b);
        assert_eq!(arena.get(a, gen_a), None);
        assert_eq!(arena.get(b, gen_b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_standalone_global_handles_share_a_cell() {
        let mut store = Store::new(&Engine::default());
        let global = store.make_global(Value::I32(1), true);
        let copy = global;
        copy.set(&mut store, Value::I32(9)).unwrap();
        assert_eq!(global.get(&store), Value::I32(9));
        assert_eq!(global, copy);
    }

    #[test]
    fn test_make_memory_rejects_bad_limits() {
        let mut store = Store::new(&Engine::default());
        assert!(matches!(
            store.make_memory(MemoryLimits::new(2, Some(1))),
            Err(Error::InvalidLimits { min: 2, max: Some(1) })
        ));
        let memory = store.make_memory(MemoryLimits::new(1, None)).unwrap();
        assert_eq!(memory.size(&store), 1);
    }

    #[test]
    fn test_const_expr_outside_links_is_an_error() {
        let mut store = Store::new(&Engine::default());
        let mut links = Links::default();
        assert!(matches!(
            store.eval_const(&links, ConstExpr::GlobalGet(0)),
            Err(CompileError::Invalid { .. })
        ));

        links.globals.push(store.make_global(Value::I64(7), false));
        assert_eq!(store.eval_const(&links, ConstExpr::GlobalGet(0)).unwrap(), Value::I64(7));
        assert!(matches!(
            store.segment_offset(&links, ConstExpr::GlobalGet(0)),
            Err(CompileError::Invalid { .. })
        ));
        assert_eq!(store.segment_offset(&links, ConstExpr::I32(-1)).unwrap(), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "belongs to store")]
    fn test_foreign_handle_panics() {
        let engine = Engine::default();
        let mut first = Store::new(&engine);
        let second = Store::new(&engine);
        let global = first.make_global(Value::I64(0), false);
        global.get(&second);
    }
}
