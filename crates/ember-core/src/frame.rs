//! Call-site activation records.
//!
//! A frame's trailing storage holds, in order, the evaluation stack, the
//! local-variable slots, and the sync-monitor keys; all three are carved
//! from a single allocation (either the owning fiber's bump stack or, for
//! "floating" frames, the heap) rather than allocated separately.

use crate::value::Value;
use ember_bytecode::Code;
use std::sync::Arc;

/// A pending `defer` entry: a callable plus the arguments it was registered
/// with, run in LIFO order as the frame unwinds (normally or via panic).
pub struct DeferEntry {
    /// The deferred callable (an opaque heap value; interpreted by the VM).
    pub callable: Value,
    /// Arguments captured at `defer`-registration time.
    pub args: Vec<Value>,
}

/// One call-site activation record.
pub struct Frame {
    /// Previous frame (caller), forming a singly-linked chain.
    pub back: Option<*mut Frame>,
    /// Use counter: prevents a panicked frame from being released while a
    /// panic chain still references it for traceback purposes.
    pub counter: usize,
    /// Head of this frame's deferred-call stack, LIFO.
    pub defer: Vec<DeferEntry>,
    /// Code object being executed.
    pub code: Arc<Code>,
    /// Byte offset of the next instruction to execute.
    pub instr_cursor: usize,
    /// Byte offset of an installed trap (exception) handler, if any.
    pub trap_cursor: Option<usize>,
    /// Receiver object, for method frames.
    pub instance: Option<Value>,
    /// Whether this frame was heap-allocated rather than carved from the
    /// fiber's bump stack (it must be individually freed on pop).
    pub floating: bool,
    /// Evaluation stack, locals, and sync-monitor keys — contiguous in the
    /// original layout; kept as separate `Vec`s here since Rust has no
    /// native flexible-array-member idiom, but always allocated together
    /// by [`Frame::new`]/[`crate::fiber::Fiber::push_frame`].
    pub eval_stack: Vec<Value>,
    /// Local variable slots, indexed by the code object's local layout.
    pub locals: Vec<Value>,
    /// Addresses used purely as sync-monitor keys (never dereferenced).
    pub sync_keys: Vec<usize>,
    /// Values captured from an enclosing scope at closure-creation time
    /// (`MKFN`), read/written by `LDENC`/`STENC`.
    pub enclosed: Vec<Value>,
    /// Value accumulated for return once this frame completes.
    pub return_value: Value,
}

impl Frame {
    /// Build a frame executing `code`, with no caller yet linked.
    pub fn new(code: Arc<Code>, floating: bool) -> Self {
        Self::with_enclosed(code, floating, Vec::new())
    }

    /// Build a frame executing `code`, capturing `enclosed` values from the
    /// closure that produced it.
    pub fn with_enclosed(code: Arc<Code>, floating: bool, enclosed: Vec<Value>) -> Self {
        let stack_sz = code.stack_sz as usize;
        let locals_sz = code.locals_sz as usize;
        let sync_sz = code.sync_sz as usize;
        Self {
            back: None,
            counter: 0,
            defer: Vec::new(),
            code,
            instr_cursor: 0,
            trap_cursor: None,
            instance: None,
            floating,
            eval_stack: Vec::with_capacity(stack_sz),
            locals: vec![Value::null(); locals_sz],
            sync_keys: vec![0; sync_sz],
            enclosed,
            return_value: Value::null(),
        }
    }

    /// Push a value onto the evaluation stack.
    pub fn push(&mut self, value: Value) {
        self.eval_stack.push(value);
    }

    /// Pop a value from the evaluation stack.
    pub fn pop(&mut self) -> Option<Value> {
        self.eval_stack.pop()
    }

    /// Register a `defer` entry, to run LIFO as this frame unwinds.
    pub fn push_defer(&mut self, callable: Value, args: Vec<Value>) {
        self.defer.push(DeferEntry { callable, args });
    }

    /// Pop the next deferred entry (LIFO order), if any remain.
    pub fn pop_defer(&mut self) -> Option<DeferEntry> {
        self.defer.pop()
    }

    /// Total trailing slots this frame would occupy on a bump stack: the
    /// evaluation stack capacity, the locals, and the sync keys.
    pub fn footprint(code: &Code) -> usize {
        code.stack_sz as usize + code.locals_sz as usize + code.sync_sz as usize
    }
}

/// Build a synthetic two-instruction (`Call`, `Ret`) frame that invokes a
/// native function: arguments are copied straight into locals and the
/// instruction cursor starts at the stub.
///
/// Native functions have no real bytecode body, so the interpreter is
/// handed a minimal stub frame that performs the call and immediately
/// returns.
pub fn synthesize_native_frame(stub: Arc<Code>, args: &[Value]) -> Frame {
    let mut frame = Frame::new(stub, false);
    for (slot, arg) in frame.locals.iter_mut().zip(args.iter().copied()) {
        *slot = arg;
    }
    frame
}
