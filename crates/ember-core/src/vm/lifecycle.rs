//! VM lifecycle & control API.
//!
//! High-level handle around an isolated [`VmContext`]: loading compiled
//! function bodies, running an entry point to completion, driving spawned
//! fibers to quiescence, and surfacing the last unhandled panic the way an
//! embedder's `GetLastError`/`DiscardLastPanic` pair expects.

use crate::object::Class;
use crate::scheduler::Scheduler;
use crate::value::Value;
use crate::vm::class_registry::ClassRegistry;
use crate::vm::context::{VmContextId, VmOptions};
use crate::vm::interpreter::{StepOutcome, Vm as Interpreter};
use crate::vm::panic::Panic;
use crate::vm::VmContext;
use crate::Fiber;
use ember_bytecode::Code;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the lifecycle API, distinct from [`crate::VmError`]
/// (the interpreter's own per-instruction error type, which a `LifecycleError`
/// may wrap when execution fails outright rather than panicking in-language).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The interpreter returned a Rust-level error rather than a language
    /// panic (stack corruption, an opcode the loaded code doesn't support).
    #[error("execution error: {0}")]
    ExecutionError(#[from] crate::VmError),

    /// An unhandled in-language panic reached the fiber's outermost frame.
    #[error("unhandled panic")]
    Panicked(Panic),

    /// `spawn`/`eval` was asked to run when no scheduler is attached.
    #[error("no scheduler attached")]
    NoScheduler,
}

/// Snapshot of a context's live resource usage, for embedders polling
/// `get_stats` (e.g. a REPL's `:stats` command).
#[derive(Debug, Clone)]
pub struct VmStats {
    /// Bytes currently allocated on this context's heap.
    pub heap_bytes_used: usize,
    /// Configured heap ceiling, `0` meaning unlimited.
    pub max_heap_bytes: usize,
    /// Fibers currently live under this context.
    pub active_fibers: usize,
    /// Configured fiber ceiling, `0` meaning unlimited.
    pub max_fibers: usize,
    /// Interpreter steps executed so far, for step-budget accounting.
    pub steps_executed: u64,
}

/// An isolated VM: one [`VmContext`], the interpreter bound to it, and the
/// scheduler its `SPW`-spawned fibers run on.
///
/// `eval` drives a single fiber synchronously to completion; `spawn` hands a
/// fiber to the scheduler and returns immediately, for an embedder that wants
/// to interleave several entry points (or is itself called from inside one,
/// via `SPW`).
pub struct Vm {
    interpreter: Interpreter,
    scheduler: Arc<Scheduler>,
    last_panic: Option<Panic>,
}

impl Vm {
    /// Create a new isolated VM with `vcores` scheduler worker slots.
    pub fn new(options: VmOptions, vcores: usize) -> Self {
        let context = VmContext::with_options(options);
        let mut interpreter = Interpreter::new(context);
        let scheduler = Scheduler::new(vcores);
        interpreter.attach_scheduler(scheduler.clone());
        Self {
            interpreter,
            scheduler,
            last_panic: None,
        }
    }

    /// A VM sized with one scheduler worker per available core.
    pub fn with_defaults(options: VmOptions) -> Self {
        let context = VmContext::with_options(options);
        let mut interpreter = Interpreter::new(context);
        let scheduler = Scheduler::with_defaults();
        interpreter.attach_scheduler(scheduler.clone());
        Self {
            interpreter,
            scheduler,
            last_panic: None,
        }
    }

    /// This VM's context id.
    pub fn context_id(&self) -> VmContextId {
        self.interpreter.context.id()
    }

    /// The class/function registry backing `MKSTRUCT`/`LDMETH`/`CALL` against
    /// a function id.
    pub fn classes(&self) -> &ClassRegistry {
        &self.interpreter.classes
    }

    /// Register a class definition, returning its id.
    pub fn register_class(&self, class: Class) -> usize {
        self.interpreter.classes.register_class(class)
    }

    /// Register a compiled function body, returning its id.
    pub fn register_function(&self, code: Arc<Code>) -> usize {
        self.interpreter.classes.register_function(code)
    }

    /// Bind a global, e.g. to expose a compiled module's top-level bindings
    /// before running its entry point.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.interpreter.context.set_global(name.into(), value);
    }

    /// Run `code` as a fresh fiber to completion, blocking the calling thread.
    /// Whenever the fiber suspends (a preemption tick, or `AWAIT` on a future
    /// still pending) every fiber the scheduler holds is drained first, so
    /// `SPW`-spawned work makes progress and settles the futures the entry
    /// point may be awaiting. A fiber awaiting a future nothing will ever
    /// settle spins, the cooperative equivalent of a deadlock.
    pub fn eval(&mut self, code: Arc<Code>) -> Result<Value, LifecycleError> {
        let mut fiber = Fiber::new();
        let frame = fiber.alloc_frame(code);
        fiber.push_frame(frame);
        loop {
            match self.interpreter.run(&mut fiber)? {
                StepOutcome::Returned(value) => return Ok(value),
                StepOutcome::Suspended => {
                    self.drain()?;
                }
                StepOutcome::Panicked(panic) => {
                    self.last_panic = Some(panic.clone());
                    return Err(LifecycleError::Panicked(panic));
                }
            }
        }
    }

    /// Hand `code` to the scheduler as a new fiber and return without waiting
    /// for it to finish. Use [`Vm::drain`] to run scheduled fibers to
    /// quiescence.
    pub fn spawn(&mut self, code: Arc<Code>) -> Result<(), LifecycleError> {
        let mut fiber = Fiber::new();
        let frame = fiber.alloc_frame(code);
        fiber.push_frame(frame);
        self.scheduler.spawn(Box::new(fiber));
        Ok(())
    }

    /// Run every fiber the scheduler currently holds until none remain
    /// runnable. A finishing fiber settles the future `SPW` handed its
    /// spawner: fulfilled by the return value, rejected by the panic payload.
    /// The last fiber to panic (if any) also becomes `last_panic`, so
    /// fire-and-forget spawns still surface their failures.
    pub fn drain(&mut self) -> Result<(), LifecycleError> {
        while let Some(mut fiber) = self.scheduler.next_for(0) {
            match self.interpreter.run(&mut fiber)? {
                StepOutcome::Returned(value) => {
                    if let Some(future) = fiber.future {
                        Interpreter::fulfil_future(future, value)?;
                    }
                    self.scheduler.retire();
                }
                StepOutcome::Suspended => self.scheduler.resume(fiber),
                StepOutcome::Panicked(panic) => {
                    if let Some(future) = fiber.future {
                        Interpreter::reject_future(future, panic.value)?;
                    }
                    self.last_panic = Some(panic);
                    self.scheduler.retire();
                }
            }
        }
        Ok(())
    }

    /// The most recent unhandled panic, if one hasn't been discarded.
    pub fn last_panic(&self) -> Option<&Panic> {
        self.last_panic.as_ref()
    }

    /// Clear the last recorded panic (an embedder's `DiscardLastPanic`).
    pub fn discard_last_panic(&mut self) {
        self.last_panic = None;
    }

    /// Current resource usage for this VM's context.
    pub fn stats(&self) -> VmStats {
        let context = &self.interpreter.context;
        let limits = context.limits();
        let counters = context.counters();
        VmStats {
            heap_bytes_used: context.heap().allocated_bytes(),
            max_heap_bytes: limits.max_heap_bytes.unwrap_or(0),
            active_fibers: counters.active_fibers(),
            max_fibers: limits.max_fibers.unwrap_or(0),
            steps_executed: counters.total_steps(),
        }
    }

    /// Shut the scheduler down; no further `spawn`ed fiber will be picked up.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}
