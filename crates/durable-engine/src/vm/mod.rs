//! Durable coroutine runtime
//!
//! This module provides:
//! - The value model and per-coroutine heap
//! - The registry of compiled functions, dynamic types and natives
//! - The frame stack holding suspended activations
//! - The interpreter over state machine IR
//! - The coroutine lifecycle API
//! - The snapshot codec for values and whole coroutines

pub mod builtins;
pub mod coroutine;
pub mod heap;
pub mod interpreter;
pub mod snapshot;
pub mod stack;
pub mod types;
pub mod value;

pub use coroutine::{Coroutine, CoroutineState};
pub use heap::{Heap, ObjectId};
pub use interpreter::{Interpreter, RunOutcome};
pub use snapshot::{CoroutineImage, SnapshotError, SnapshotReader, SnapshotWriter};
pub use stack::{Frame, Stack};
pub use types::{
    CaptureDescriptor, DynTypeInfo, FunctionDescriptor, FunctionKey, NativeFn, RegistryError,
    TypeRegistry, TypeRegistryBuilder,
};
pub use value::{DynValue, FuncValue, StructValue, Value};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Runtime failure raised by coroutine code
    #[error("Runtime failure in {function}: {message}")]
    RuntimeFailure { function: String, message: String },

    /// Operation not valid in the coroutine's current state
    #[error("Invalid coroutine state: {0}")]
    InvalidState(String),

    /// Frame stack or host call depth exceeded
    #[error("Stack overflow (limit {limit})")]
    StackOverflow { limit: usize },

    /// Function key not present in the registry
    #[error("Unregistered function identifier: {key}")]
    UnregisteredIdentifier { key: String },

    /// Argument count does not match the callee
    #[error("{function} expects {expected} arguments, got {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },

    /// Snapshot encode/decode error
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
