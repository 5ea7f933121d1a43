//! The embedding runtime
//!
//! Everything a host creates lives in a [`Store`]: instances, functions,
//! globals, memories and tables. Host code refers to them through small
//! copyable handles and passes the store to every operation. Compiled
//! modules are cached by the [`Engine`], which stores share.

pub mod engine;
pub(crate) mod executor;
pub mod func;
pub mod global;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod module;
pub(crate) mod ops;
pub(crate) mod stack;
pub mod store;
pub(crate) mod table;
pub mod trap;
pub mod value;

pub use engine::Engine;
pub use func::{Func, HostCallable, HostFunc, HostReturn, IntoHostFunc, TypedFunc, WasmTy, WasmTypeList};
pub use global::Global;
pub use imports::{ImportObject, Imports, Namespace};
pub use instance::{ExportKey, Extern, Instance};
pub use memory::{Memory, MemoryLimits, MAX_PAGES, PAGE_SIZE};
pub use module::{ExportType, ExternKind, ExternType, ImportType, Module};
pub use store::Store;
pub use trap::{Frame, Trap, TrapCode};
pub use value::Value;
