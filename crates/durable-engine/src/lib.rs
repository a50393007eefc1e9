//! Durable coroutines
//!
//! Functions that can pause at a `yield`, be written out as bytes, and continue
//! later, possibly in a different process:
//! - **Compiler**: colors the call graph, instantiates generics, lowers every
//!   reachable function to block IR and rewrites suspending functions into
//!   resumable state machines (`compiler` module)
//! - **VM**: registry, heap, frame stack, interpreter and the coroutine API
//!   (`vm` module)
//! - **Snapshots**: a versioned, checksummed encoding of values and suspended
//!   coroutines (`vm::snapshot`)
//!
//! # Example
//!
//! ```rust,ignore
//! use durable_engine::{Compiler, Coroutine, Value};
//!
//! let program = /* compiler::ast::Program for `func squares(n int) { ... }` */;
//! let compiled = Compiler::default().compile(&program)?;
//! let registry = compiled.registry()?;
//!
//! let mut co = Coroutine::start(registry.clone(), "main.squares", vec![Value::Int(3)])?;
//! co.next()?;
//! let bytes = co.marshal()?;
//!
//! // Later, anywhere with the same registry
//! let mut co = Coroutine::unmarshal(registry, &bytes)?;
//! while co.next()? {
//!     println!("{}", co.recv().unwrap());
//! }
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::should_implement_trait)]

/// Compiler: AST, call graph coloring, monomorphization, IR and state machines
pub mod compiler;

/// Engine configuration
pub mod config;

/// Runtime: registry, heap, stack, interpreter, coroutines and snapshots
pub mod vm;

pub use compiler::{CompileError, CompiledProgram, Compiler};
pub use config::{CompilerOptions, ConfigError, EngineConfig, RuntimeOptions};
pub use vm::{
    Coroutine, CoroutineState, FunctionKey, Heap, SnapshotError, TypeRegistry, TypeRegistryBuilder, Value,
    VmError, VmResult,
};
