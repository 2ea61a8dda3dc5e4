//! Virtual machine execution and context management.

pub mod class_registry;
pub mod context;
pub mod interpreter;
pub mod lifecycle;
pub mod panic;

pub use class_registry::ClassRegistry;
pub use context::{
    ContextRegistry, ResourceCounters, ResourceLimits, VmContext, VmContextId, VmOptions,
};
pub use interpreter::{StepOutcome, Vm};
pub use lifecycle::{LifecycleError, Vm as EmbeddedVm, VmStats};
pub use panic::{Panic, TraceFrame};
