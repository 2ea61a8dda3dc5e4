//! Fibers: independently schedulable execution units.
//!
//! A fiber owns a small bump-allocated bytecode stack that its frames are
//! carved from; once that region is exhausted, frames "float" onto the heap
//! instead and are freed individually on pop.

use crate::frame::Frame;
use crate::value::Value;
use ember_bytecode::Code;
use std::sync::Arc;

/// Default size of a fiber's bump-allocated bytecode stack, in `Value` slots.
pub const FIBER_STACK_SIZE: usize = 1024 / std::mem::size_of::<Value>();

/// Bound on the fiber free pool: fibers are recycled rather
/// than reallocated up to this many idle instances.
pub const FIBER_POOL_SIZE: usize = 254;

/// A fiber's scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Waiting on an external notify queue or I/O event; not in any run queue.
    Blocked,
    /// In a run queue, waiting for a worker.
    Runnable,
    /// Currently executing on a worker.
    Running,
    /// Yielded voluntarily; resumes by re-executing its last instruction.
    Suspended,
    /// Blocked on a primitive (e.g. mutex `lock`) that must retry its last
    /// instruction once re-scheduled.
    BlockedSuspended,
}

/// An independently schedulable execution unit.
pub struct Fiber {
    /// Current scheduling status.
    pub status: FiberStatus,
    /// Notify-queue ticket, assigned when this fiber waits on a ticket queue.
    pub ticket: Option<u64>,
    /// Current execution frame (top of the call chain), if any.
    pub frame: Option<Box<Frame>>,
    /// Result of the async operation this fiber represents, if spawned as one.
    pub async_result: Option<Value>,
    /// Future handed to the spawner, settled when this fiber finishes:
    /// fulfilled by its return value, rejected by an unhandled panic.
    pub future: Option<Value>,
    /// Object references of a recursive operation in flight (e.g. `list`
    /// `repr`), used to detect and break reentrant cycles.
    pub references: Vec<Value>,
    /// Raw identity of the OS thread currently running this fiber, used only
    /// to detect "already running elsewhere" — never dereferenced.
    pub active_ost: Option<usize>,
    /// Bump-allocated bytecode stack backing non-floating frames.
    stack: Vec<Value>,
    /// Offset of the next free slot in `stack`.
    stack_cur: usize,
}

impl Fiber {
    /// Create a fiber with the default bytecode stack size.
    pub fn new() -> Self {
        Self::with_stack_space(FIBER_STACK_SIZE)
    }

    /// Create a fiber with a custom bytecode stack size (in `Value` slots).
    pub fn with_stack_space(stack_space: usize) -> Self {
        Self {
            status: FiberStatus::Runnable,
            ticket: None,
            frame: None,
            async_result: None,
            future: None,
            references: Vec::new(),
            active_ost: None,
            stack: vec![Value::null(); stack_space],
            stack_cur: 0,
        }
    }

    /// Remaining bump-stack capacity, in `Value` slots.
    pub fn stack_remaining(&self) -> usize {
        self.stack.len() - self.stack_cur
    }

    /// Allocate a frame for `code`. If the fiber's remaining bump-stack
    /// capacity covers the frame's footprint, the frame is carved from it
    /// (`floating = false`); otherwise it is heap-allocated.
    pub fn alloc_frame(&mut self, code: Arc<Code>) -> Frame {
        self.alloc_frame_with_enclosed(code, Vec::new())
    }

    /// Like [`Fiber::alloc_frame`], but for a closure invocation that
    /// captured values from an enclosing scope.
    pub fn alloc_frame_with_enclosed(&mut self, code: Arc<Code>, enclosed: Vec<Value>) -> Frame {
        let footprint = Frame::footprint(&code);
        if footprint <= self.stack_remaining() {
            self.stack_cur += footprint;
            Frame::with_enclosed(code, false, enclosed)
        } else {
            Frame::with_enclosed(code, true, enclosed)
        }
    }

    /// Push `frame` onto the fiber's frame chain, linking it to the
    /// previously current frame via `back`.
    pub fn push_frame(&mut self, mut frame: Frame) {
        if let Some(current) = self.frame.take() {
            let raw = Box::into_raw(current);
            frame.back = Some(raw);
        }
        self.frame = Some(Box::new(frame));
    }

    /// Pop the current frame, re-linking the chain to its caller and
    /// rewinding the bump stack if the popped frame was not floating.
    pub fn pop_frame(&mut self) -> Option<Box<Frame>> {
        let mut popped = self.frame.take()?;
        if !popped.floating {
            self.stack_cur -= Frame::footprint(&popped.code);
        }
        if let Some(back) = popped.back.take() {
            // SAFETY: `back` was produced by `push_frame` from a live `Box`
            // owned by this fiber and never aliased elsewhere.
            self.frame = Some(unsafe { Box::from_raw(back) });
        }
        Some(popped)
    }

    /// Record (or clear) the async result carried by this fiber.
    pub fn set_async_result(&mut self, result: Option<Value>) {
        self.async_result = result;
    }

    /// True while this fiber's status means it cannot be scheduled.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self.status,
            FiberStatus::Blocked | FiberStatus::BlockedSuspended
        )
    }
}

impl Default for Fiber {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: a `Fiber`'s frame chain is only ever reachable through the single
// `Fiber` that owns it (the raw `back` pointers are private, internal
// linked-list plumbing); moving the whole `Fiber` to another worker thread,
// as the scheduler does, is sound.
unsafe impl Send for Fiber {}

impl Drop for Fiber {
    fn drop(&mut self) {
        while self.pop_frame().is_some() {}
    }
}

/// A bounded pool recycling idle [`Fiber`]s, up to [`FIBER_POOL_SIZE`].
#[derive(Default)]
pub struct FiberPool {
    idle: Vec<Fiber>,
}

impl FiberPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self { idle: Vec::new() }
    }

    /// Take a fiber from the pool, or create a fresh one if empty.
    pub fn acquire(&mut self) -> Fiber {
        self.idle.pop().unwrap_or_default()
    }

    /// Return a fiber to the pool for reuse, unless the pool is already full.
    pub fn release(&mut self, mut fiber: Fiber) {
        if self.idle.len() < FIBER_POOL_SIZE {
            fiber.status = FiberStatus::Runnable;
            fiber.async_result = None;
            fiber.future = None;
            fiber.references.clear();
            fiber.active_ost = None;
            self.idle.push(fiber);
        }
    }

    /// Number of fibers currently idle in the pool.
    pub fn len(&self) -> usize {
        self.idle.len()
    }

    /// True if no fibers are idle.
    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }
}
