//! Ember VM core runtime: arena allocation, hybrid RC, the generational
//! tracing collector, the object model, fibers and frames, the recursive
//! shared mutex and notify queue, the scheduler, the event loop, and the
//! bytecode interpreter.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arena;
pub mod event_loop;
pub mod fiber;
pub mod frame;
pub mod gc;
pub mod object;
pub mod rc;
pub mod scheduler;
pub mod sync;
pub mod types;
pub mod value;
pub mod vm;

pub use fiber::{Fiber, FiberPool, FiberStatus, FIBER_POOL_SIZE, FIBER_STACK_SIZE};
pub use frame::Frame;
pub use gc::{GcPtr, GenerationalCollector, Heap};
pub use object::{Class, GcLink, Object, ObjectHeader, VTable};
pub use rc::{DecStrongOutcome, RcWord};
pub use types::{standard_registry, TypeDescriptor, TypeId, TypeRegistry};
pub use value::Value;
pub use vm::{
    ClassRegistry, ContextRegistry, EmbeddedVm, LifecycleError, Panic, ResourceCounters,
    ResourceLimits, StepOutcome, TraceFrame, Vm, VmContext, VmContextId, VmOptions, VmStats,
};

/// Errors surfaced by the VM to embedders and to in-language exception
/// handling (panics carry a `VmError` as their underlying cause).
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The fiber's bytecode stack and heap-floating fallback are both
    /// exhausted.
    #[error("stack overflow")]
    StackOverflow,

    /// An operation popped an empty evaluation stack.
    #[error("stack underflow")]
    StackUnderflow,

    /// A byte in the instruction stream did not decode to a known opcode.
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Dereferenced a nil value where an object was required.
    #[error("null pointer exception")]
    NullPointer,

    /// An operation was applied to a value of the wrong type.
    #[error("type error: {0}")]
    TypeError(String),

    /// A name could not be resolved in the current scope chain.
    #[error("name error: {0}")]
    NameError(String),

    /// An otherwise well-typed value was semantically invalid for the
    /// operation (e.g. division by zero, index out of range).
    #[error("value error: {0}")]
    ValueError(String),

    /// A host operating-system call failed.
    #[error("os error: {0}")]
    OsError(String),

    /// The heap's configured size limit was exceeded.
    #[error("out of memory")]
    OutOfMemory,

    /// A module could not be located or loaded.
    #[error("import error: {0}")]
    ImportError(String),

    /// A blocking operation exceeded its deadline.
    #[error("timeout error: {0}")]
    TimeoutError(String),

    /// Any other runtime failure not covered by a more specific variant.
    #[error("runtime error: {0}")]
    RuntimeError(String),
}

/// Result type used throughout VM execution.
pub type VmResult<T> = Result<T, VmError>;
