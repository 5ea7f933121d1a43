//! Embed WebAssembly modules in a Rust host.
//!
//! wasm-embed compiles WebAssembly binaries, links them against host
//! functions, globals and memories, and runs their exports on a reference
//! interpreter. Guest faults come back as [`Trap`] values carrying the guest
//! call stack; nothing a guest does can crash the host.
//!
//! # Modules
//!
//! - [`parser`] -- Binary decoder and validator producing a structured module.
//! - [`runtime`] -- Engine, store, instances, host objects and the interpreter.
//! - [`config`] -- Engine limits and caching, loadable from JSON.
//! - [`error`] -- One error type per failure class, plus a wrapping [`Error`].
//!
//! # Example
//!
//! Instantiate a module that calls back into the host:
//!
//! ```
//! use wasm_embed::{Engine, HostFunc, Imports, Store};
//!
//! let wasm = wat::parse_str(r#"
//!     (module
//!         (import "env" "scale" (func $scale (param i32) (result i32)))
//!         (func (export "run") (param i32) (result i32)
//!             (i32.add (call $scale (local.get 0)) (i32.const 1))))
//! "#).unwrap();
//!
//! let mut store = Store::new(&Engine::default());
//! let mut imports = Imports::new();
//! imports.define("env", "scale", HostFunc::wrap(|x: i32| x * 10));
//! let instance = store.instantiate_bytes(&wasm, imports).unwrap();
//!
//! let run = instance.exported_func(&store, "run").unwrap();
//! let run = run.typed::<i32, i32>(&store).unwrap();
//! assert_eq!(run.call(&mut store, 4).unwrap(), 41);
//! ```

pub mod config;
pub mod error;
pub mod parser;
pub mod runtime;

pub use config::EngineConfig;
pub use error::{
    CompileError, Error, GrowRejected, ImmutableGlobalError, LinkError, MemoryAccessError, NotFound, Result,
    TypeError,
};
pub use parser::module::{FunctionType, GlobalType, ValueType};
pub use runtime::{
    Engine, ExportKey, ExportType, Extern, ExternKind, ExternType, Frame, Func, Global, HostCallable, HostFunc,
    ImportObject, ImportType, Imports, Instance, Memory, MemoryLimits, Module, Namespace, Store, Trap, TrapCode,
    TypedFunc, Value, MAX_PAGES, PAGE_SIZE,
};
