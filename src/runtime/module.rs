//! Compiled modules and their import/export descriptions

use std::fmt;
use std::sync::Arc;

use super::memory::MemoryLimits;
use super::store::Store;
use crate::error::CompileError;
use crate::parser::module::{ExportIndex, ExternalKind, FunctionType, GlobalType, Module as ParsedModule};

/// The kind of an import or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternKind {
    Func,
    Global,
    Memory,
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExternKind::Func => "function",
            ExternKind::Global => "global",
            ExternKind::Memory => "memory",
        })
    }
}

/// The declared type of an import or export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternType {
    Func(FunctionType),
    Global(GlobalType),
    Memory(MemoryLimits),
}

impl ExternType {
    pub fn kind(&self) -> ExternKind {
        match self {
            ExternType::Func(_) => ExternKind::Func,
            ExternType::Global(_) => ExternKind::Global,
            ExternType::Memory(_) => ExternKind::Memory,
        }
    }
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternType::Func(ty) => write!(f, "func {ty}"),
            ExternType::Global(ty) => write!(f, "global {ty}"),
            ExternType::Memory(limits) => write!(f, "{limits}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportType {
    pub module: String,
    pub name: String,
    pub ty: ExternType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportType {
    pub name: String,
    pub ty: ExternType,
}

/// A validated binary plus its import and export descriptions. Shared
/// between every [`Module`] compiled from the same bytes by one engine.
#[derive(Debug)]
pub(crate) struct CompiledModule {
    pub(crate) parsed: ParsedModule,
    pub(crate) imports: Vec<ImportType>,
    pub(crate) exports: Vec<ExportType>,
    pub(crate) size: usize,
}

impl CompiledModule {
    pub(crate) fn new(parsed: ParsedModule, size: usize) -> Result<CompiledModule, CompileError> {
        let mut imports = Vec::with_capacity(parsed.imports.len());
        for import in &parsed.imports {
            let ty = match import.external_kind {
                ExternalKind::Function(type_index) => {
                    ExternType::Func(parsed.types[type_index as usize].clone())
                }
                ExternalKind::Global(global_type) => ExternType::Global(global_type),
                ExternalKind::Memory(limits) => ExternType::Memory(limits.into()),
                ExternalKind::Table(_) => {
                    return Err(CompileError::unsupported(0, "table imports are not supported"));
                }
            };
            imports.push(ImportType {
                module: import.module.clone(),
                name: import.name.clone(),
                ty,
            });
        }

        let global_types = parsed.global_types();
        let mut exports = Vec::with_capacity(parsed.exports.len());
        for export in &parsed.exports {
            let ty = match export.index {
                ExportIndex::Function(index) => parsed
                    .function_type(index)
                    .cloned()
                    .map(ExternType::Func),
                ExportIndex::Global(index) => global_types.get(index as usize).copied().map(ExternType::Global),
                ExportIndex::Memory(_) => parsed
                    .memory
                    .or_else(|| parsed.imported_memory().copied())
                    .map(|limits| ExternType::Memory(limits.into())),
                ExportIndex::Table(_) => {
                    return Err(CompileError::unsupported(0, "table exports are not supported"));
                }
            };
            let ty = ty.ok_or_else(|| {
                CompileError::invalid(0, format!("export \"{}\" refers to an unknown item", export.name))
            })?;
            exports.push(ExportType {
                name: export.name.clone(),
                ty,
            });
        }

        Ok(CompiledModule {
            parsed,
            imports,
            exports,
            size,
        })
    }
}

/// A compiled module, ready to be instantiated in the store that compiled it.
///
/// Cloning is cheap; clones share the compiled code.
#[derive(Debug, Clone)]
pub struct Module {
    store_id: u64,
    inner: Arc<CompiledModule>,
}

impl Module {
    pub fn new(store: &Store, bytes: &[u8]) -> Result<Module, CompileError> {
        store.compile(bytes)
    }

    pub(crate) fn from_compiled(store_id: u64, inner: Arc<CompiledModule>) -> Module {
        Module { store_id, inner }
    }

    pub(crate) fn store_id(&self) -> u64 {
        self.store_id
    }

    pub(crate) fn compiled(&self) -> &Arc<CompiledModule> {
        &self.inner
    }

    /// Declared imports, in order.
    pub fn imports(&self) -> &[ImportType] {
        &self.inner.imports
    }

    /// Declared exports, in order.
    pub fn exports(&self) -> &[ExportType] {
        &self.inner.exports
    }

    /// Size of the binary in bytes.
    pub fn size(&self) -> usize {
        self.inner.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::module::ValueType;
    use crate::runtime::engine::Engine;

    #[test]
    fn test_import_and_export_types() {
        let wasm = wat::parse_str(
            r#"(module
                (import "env" "f" (func (param i32)))
                (import "env" "g" (global (mut i64)))
                (memory (export "mem") 1 4)
                (func (export "run") (result f32) f32.const 1)
                (global (export "g2") f64 (f64.const 0)))"#,
        )
        .unwrap();
        let store = Store::new(&Engine::default());
        let module = Module::new(&store, &wasm).unwrap();

        assert_eq!(module.size(), wasm.len());
        assert_eq!(
            module.imports()[0].ty,
            ExternType::Func(FunctionType::new([ValueType::I32], []))
        );
        assert_eq!(module.imports()[1].ty.kind(), ExternKind::Global);

        let exports: Vec<_> = module.exports().iter().map(|e| (e.name.as_str(), e.ty.kind())).collect();
        assert_eq!(
            exports,
            vec![
                ("mem", ExternKind::Memory),
                ("run", ExternKind::Func),
                ("g2", ExternKind::Global)
            ]
        );
        assert_eq!(
            module.exports()[0].ty,
            ExternType::Memory(MemoryLimits::new(1, Some(4)))
        );
    }

    #[test]
    fn test_table_exports_are_unsupported() {
        let wasm = wat::parse_str(r#"(module (table (export "t") 1 funcref))"#).unwrap();
        let store = Store::new(&Engine::default());
        assert!(matches!(
            store.compile(&wasm),
            Err(CompileError::Unsupported { .. })
        ));
    }
}
