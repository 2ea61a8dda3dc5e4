//! The bytecode dispatch loop: executes one fiber's frame chain until
//! it returns, panics, or voluntarily suspends.
//!
//! `Vm` owns the pieces an opcode needs beyond what a `Frame` carries on its
//! own: the execution context (heap, collector, globals), the class/method
//! table, and the per-object sync-monitor locks keyed by heap address.

use crate::fiber::{Fiber, FiberStatus};
use crate::frame::Frame;
use crate::object::{
    BoundMethod, Class, Closure, DictObject, FutureObject, IteratorObject, ListObject, Object,
    ObjectHeader, StringObject, TupleObject,
};
use crate::scheduler::{Scheduler, SCHEDULE_TICK_BEFORE_CHECK};
use crate::sync::RecursiveSharedMutex;
use crate::types::well_known;
use crate::value::Value;
use crate::vm::class_registry::ClassRegistry;
use crate::vm::context::VmContext;
use crate::vm::panic::{Panic, TraceFrame};
use crate::{VmError, VmResult};
use ember_bytecode::{decode_instr, Constant, OpCode};
use rustc_hash::FxHashMap;
use std::ptr::NonNull;
use std::sync::Arc;

/// Outcome of [`Vm::run`]: the only three ways a fiber can stop making
/// progress on its own.
pub enum StepOutcome {
    /// The fiber's outermost frame returned; it has finished.
    Returned(Value),
    /// An unhandled panic reached the fiber's outermost frame.
    Panicked(Panic),
    /// The fiber voluntarily suspended (preemption tick or `YLD`/unready
    /// `AWAIT`) and should be re-queued by the scheduler.
    Suspended,
}

/// What one dispatched instruction did.
enum Signal {
    Continue,
    Suspend,
    Done(Value),
    Panic(Panic),
}

enum DivMode {
    Integer,
    Remainder,
    Float,
}

/// One interpreter bound to a single [`VmContext`]. A `Vm` executes fibers
/// one at a time via [`Vm::run`]; the scheduler decides which fiber to hand
/// it and when to call back in after a suspension.
pub struct Vm {
    /// This interpreter's isolated heap, collector, and global namespace.
    pub context: VmContext,
    /// Class definitions and the function bodies their vtables point into.
    pub classes: ClassRegistry,
    /// Per-object sync-monitor locks, keyed by heap address (`SYNC`/`UNSYNC`).
    locks: FxHashMap<usize, Arc<RecursiveSharedMutex>>,
    /// Scheduler fibers spawned by `SPW` are handed to, if attached.
    scheduler: Option<Arc<Scheduler>>,
}

impl Vm {
    /// Build an interpreter around `context`, with no scheduler attached
    /// (`SPW` fails with a runtime error until one is).
    pub fn new(context: VmContext) -> Self {
        Self {
            context,
            classes: ClassRegistry::new(),
            locks: FxHashMap::default(),
            scheduler: None,
        }
    }

    /// Attach the scheduler `SPW` hands newly spawned fibers to.
    pub fn attach_scheduler(&mut self, scheduler: Arc<Scheduler>) {
        self.scheduler = Some(scheduler);
    }

    /// Run `fiber` until it returns, panics, or suspends.
    pub fn run(&mut self, fiber: &mut Fiber) -> VmResult<StepOutcome> {
        fiber.status = FiberStatus::Running;
        let mut ticks: u32 = 0;
        loop {
            if fiber.frame.is_none() {
                return Ok(StepOutcome::Returned(Value::null()));
            }
            ticks += 1;
            if ticks > SCHEDULE_TICK_BEFORE_CHECK {
                fiber.status = FiberStatus::Suspended;
                return Ok(StepOutcome::Suspended);
            }

            let (op, arg, here) = decode_next(fiber)?;
            self.context.counters().increment_steps(1);
            match self.step(fiber, op, arg, here)? {
                Signal::Continue => continue,
                Signal::Suspend => {
                    fiber.status = FiberStatus::Suspended;
                    return Ok(StepOutcome::Suspended);
                }
                Signal::Done(value) => return Ok(StepOutcome::Returned(value)),
                Signal::Panic(panic) => return Ok(StepOutcome::Panicked(panic)),
            }
        }
    }

    fn step(&mut self, fiber: &mut Fiber, op: OpCode, arg: u32, here: usize) -> VmResult<Signal> {
        use OpCode::*;
        match op {
            // --- arithmetic / numeric ---
            Add => self.numeric_binop(fiber, |a, b| a.wrapping_add(b), |a, b| a + b)?,
            Sub => self.numeric_binop(fiber, |a, b| a.wrapping_sub(b), |a, b| a - b)?,
            Mul => self.numeric_binop(fiber, |a, b| a.wrapping_mul(b), |a, b| a * b)?,
            Div => self.divide(fiber, DivMode::Float)?,
            IDiv => self.divide(fiber, DivMode::Integer)?,
            Mod => self.divide(fiber, DivMode::Remainder)?,
            Shl => self.int_binop(fiber, |a, b| a.wrapping_shl(b as u32))?,
            Shr => self.int_binop(fiber, |a, b| a.wrapping_shr(b as u32))?,
            Inc => self.local_step(fiber, arg, 1)?,
            Dec => self.local_step(fiber, arg, -1)?,
            IpAdd => self.local_inplace(fiber, arg, |a, b| a + b)?,
            IpSub => self.local_inplace(fiber, arg, |a, b| a - b)?,
            Neg => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                let result = if let Some(i) = v.as_i32() {
                    Value::i32(i.wrapping_neg())
                } else if let Some(f) = v.as_f64() {
                    Value::f64(-f)
                } else {
                    return Err(VmError::TypeError("expected a number".into()));
                };
                frame.push(result);
            }
            Pos => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                if v.as_i32().is_none() && v.as_f64().is_none() {
                    return Err(VmError::TypeError("expected a number".into()));
                }
                frame.push(v);
            }

            // --- comparison / logical ---
            Cmp => self.compare(fiber, arg)?,
            EqSt => self.structural_eq(fiber)?,
            Land => self.logical_binop(fiber, |a, b| a && b, |a, b| a & b)?,
            Lor => self.logical_binop(fiber, |a, b| a || b, |a, b| a | b)?,
            Lxor => self.logical_binop(fiber, |a, b| a ^ b, |a, b| a ^ b)?,
            Not => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                frame.push(Value::bool(!v.is_truthy()));
            }
            Inv => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                let i = v
                    .as_i32()
                    .ok_or_else(|| VmError::TypeError("expected an int".into()))?;
                frame.push(Value::i32(!i));
            }

            // --- variable access ---
            LdGbl => self.load_global(fiber, arg, false)?,
            NgV => self.load_global(fiber, arg, true)?,
            StGbl => {
                let frame = current_frame(fiber)?;
                let name = frame
                    .code
                    .globals
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| VmError::NameError("unknown global slot".into()))?;
                let value = frame.pop().ok_or(VmError::StackUnderflow)?;
                self.context.set_global(name, value);
            }
            LdLc => {
                let frame = current_frame(fiber)?;
                let value = *frame
                    .locals
                    .get(arg as usize)
                    .ok_or(VmError::StackUnderflow)?;
                frame.push(value);
            }
            StLc => {
                let frame = current_frame(fiber)?;
                let value = frame.pop().ok_or(VmError::StackUnderflow)?;
                if let Some(slot) = frame.locals.get_mut(arg as usize) {
                    *slot = value;
                } else {
                    return Err(VmError::StackUnderflow);
                }
            }
            LdEnc => {
                let frame = current_frame(fiber)?;
                let value = *frame
                    .enclosed
                    .get(arg as usize)
                    .ok_or_else(|| VmError::NameError("unknown enclosed slot".into()))?;
                frame.push(value);
            }
            StEnc => {
                let frame = current_frame(fiber)?;
                let value = frame.pop().ok_or(VmError::StackUnderflow)?;
                if let Some(slot) = frame.enclosed.get_mut(arg as usize) {
                    *slot = value;
                } else {
                    return Err(VmError::NameError("unknown enclosed slot".into()));
                }
            }
            // Block-local scoping collapses onto the frame's local slots;
            // a lowering with a real scope chain would assign
            // `LDSCOPE`/`STSCOPE` slots distinct from locals.
            LdScope => {
                let frame = current_frame(fiber)?;
                let value = *frame
                    .locals
                    .get(arg as usize)
                    .ok_or(VmError::StackUnderflow)?;
                frame.push(value);
            }
            StScope => {
                let frame = current_frame(fiber)?;
                let value = frame.pop().ok_or(VmError::StackUnderflow)?;
                if let Some(slot) = frame.locals.get_mut(arg as usize) {
                    *slot = value;
                } else {
                    return Err(VmError::StackUnderflow);
                }
            }
            LdAttr => self.load_attr(fiber, arg)?,
            StAttr => self.store_attr(fiber, arg)?,
            LdMeth => self.load_method(fiber, arg)?,
            LStatic => {
                let frame = current_frame(fiber)?;
                let constant = frame
                    .code
                    .statics
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| VmError::ValueError("unknown static slot".into()))?;
                let value = self.constant_to_value(&constant)?;
                current_frame(fiber)?.push(value);
            }

            // --- control flow ---
            Jmp => current_frame(fiber)?.instr_cursor = arg as usize,
            Jt => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                if v.is_truthy() {
                    frame.instr_cursor = arg as usize;
                }
            }
            Jf => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                if !v.is_truthy() {
                    frame.instr_cursor = arg as usize;
                }
            }
            // No lowering emits exception-dispatch tables yet, so the
            // exception jump degenerates to an unconditional one.
            Jex => current_frame(fiber)?.instr_cursor = arg as usize,
            Jfop => {
                let frame = current_frame(fiber)?;
                let truthy = frame
                    .eval_stack
                    .last()
                    .ok_or(VmError::StackUnderflow)?
                    .is_truthy();
                if truthy {
                    frame.pop();
                } else {
                    frame.instr_cursor = arg as usize;
                }
            }
            Jtop => {
                let frame = current_frame(fiber)?;
                let truthy = frame
                    .eval_stack
                    .last()
                    .ok_or(VmError::StackUnderflow)?
                    .is_truthy();
                if truthy {
                    frame.instr_cursor = arg as usize;
                } else {
                    frame.pop();
                }
            }
            Jnil => {
                let frame = current_frame(fiber)?;
                let v = frame.pop().ok_or(VmError::StackUnderflow)?;
                if v.is_null() {
                    frame.instr_cursor = arg as usize;
                }
            }
            Jnn => {
                let frame = current_frame(fiber)?;
                let is_nil = frame
                    .eval_stack
                    .last()
                    .ok_or(VmError::StackUnderflow)?
                    .is_null();
                if is_nil {
                    frame.pop();
                } else {
                    frame.instr_cursor = arg as usize;
                }
            }

            // --- container construction ---
            MkLt => self.make_list(fiber, arg)?,
            MkSt => self.make_set(fiber, arg)?,
            MkTp => self.make_tuple(fiber, arg)?,
            MkDt => self.make_dict(fiber, arg)?,
            MkBnd => self.make_bound_method(fiber, arg)?,
            MkFn => self.make_closure(fiber, arg)?,
            MkStruct => self.make_struct(fiber, arg)?,
            // Trait composition has no surface syntax yet; this registers
            // an empty marker class and pushes nil.
            MkTrait => {
                self.classes.register_class(Class {
                    name: "<trait>".into(),
                    field_count: 0,
                    vtable: crate::object::VTable::new(),
                });
                current_frame(fiber)?.push(Value::null());
            }

            // --- iteration ---
            LdIter => {
                let frame = current_frame(fiber)?;
                let source = frame.pop().ok_or(VmError::StackUnderflow)?;
                let iter = IteratorObject::new_tracked(well_known::ITERATOR, source);
                let value = self.track(iter);
                current_frame(fiber)?.push(value);
            }
            Nxt => self.iterate_next(fiber)?,

            // --- call protocol ---
            Call => {
                let (callable, args) = self.pop_call_args(fiber, arg)?;
                self.invoke_callable(fiber, callable, args)?;
            }
            Dfr => {
                let (callable, args) = self.pop_call_args(fiber, arg)?;
                current_frame(fiber)?.push_defer(callable, args);
            }
            Spw => self.spawn(fiber, arg)?,
            Yld => {
                let frame = current_frame(fiber)?;
                let value = frame.pop().unwrap_or(Value::null());
                fiber.set_async_result(Some(value));
                return Ok(Signal::Suspend);
            }
            Await => {
                let frame = current_frame(fiber)?;
                let future = frame.pop().ok_or(VmError::StackUnderflow)?;
                match self.poll_future(future)? {
                    Some((value, false)) => current_frame(fiber)?.push(value),
                    Some((value, true)) => {
                        // The spawned fiber panicked; its panic re-raises at
                        // the await site.
                        let origin = trace_frame(current_frame(fiber)?, here);
                        return self.raise(fiber, crate::vm::panic::Panic::new(value, origin));
                    }
                    None => {
                        let frame = current_frame(fiber)?;
                        frame.push(future);
                        frame.instr_cursor = here;
                        return Ok(Signal::Suspend);
                    }
                }
            }
            Ret => return self.do_return(fiber),
            // Method/init dispatch reuses the ordinary call protocol; the
            // distinction (binding the receiver, running field initialisers)
            // already happened when the callable was constructed by
            // `MKBND`/`MKSTRUCT`.
            Mth | Init => {
                let (callable, args) = self.pop_call_args(fiber, arg)?;
                self.invoke_callable(fiber, callable, args)?;
            }

            // --- safety ---
            Sync => {
                let frame = current_frame(fiber)?;
                let object = frame.pop().ok_or(VmError::StackUnderflow)?;
                let key = pointer_key(object)?;
                let lock = self.lock_for(key);
                lock.lock();
                let frame = current_frame(fiber)?;
                if let Some(slot) = frame.sync_keys.get_mut(arg as usize) {
                    *slot = key;
                } else {
                    return Err(VmError::RuntimeError("sync depth exceeded".into()));
                }
            }
            Unsync => {
                let frame = current_frame(fiber)?;
                let key = *frame
                    .sync_keys
                    .get(arg as usize)
                    .ok_or_else(|| VmError::RuntimeError("unsync without matching sync".into()))?;
                self.lock_for(key).unlock();
            }
            Trap => {
                let frame = current_frame(fiber)?;
                frame.trap_cursor = if arg == ember_bytecode::TRAP_CLEAR {
                    None
                } else {
                    Some(arg as usize)
                };
            }
            Panic => {
                let frame = current_frame(fiber)?;
                let value = frame.pop().unwrap_or(Value::null());
                let origin = trace_frame(frame, here);
                return self.raise(fiber, crate::vm::panic::Panic::new(value, origin));
            }

            // --- stack manipulation ---
            Dup => {
                let frame = current_frame(fiber)?;
                let top = *frame.eval_stack.last().ok_or(VmError::StackUnderflow)?;
                frame.push(top);
            }
            Pop => {
                current_frame(fiber)?
                    .pop()
                    .ok_or(VmError::StackUnderflow)?;
            }
            PopC => {
                let frame = current_frame(fiber)?;
                for _ in 0..arg {
                    frame.pop().ok_or(VmError::StackUnderflow)?;
                }
            }
            PopGt => {
                let frame = current_frame(fiber)?;
                let keep = arg as usize;
                if frame.eval_stack.len() > keep {
                    frame.eval_stack.truncate(keep);
                }
            }
            PshC => {
                let frame = current_frame(fiber)?;
                let constant = frame
                    .code
                    .statics
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| VmError::ValueError("unknown static slot".into()))?;
                let value = self.constant_to_value(&constant)?;
                current_frame(fiber)?.push(value);
            }
            PshN => {
                let frame = current_frame(fiber)?;
                for _ in 0..arg {
                    frame.push(Value::null());
                }
            }
            Unpack => self.unpack(fiber)?,

            // --- module / import ---
            ImpMod => {
                let frame = current_frame(fiber)?;
                let name = self.static_str(frame, arg)?;
                let value = self
                    .context
                    .get_global(&name)
                    .ok_or_else(|| VmError::ImportError(name.clone()))?;
                current_frame(fiber)?.push(value);
            }
            ImpFrm => {
                let frame = current_frame(fiber)?;
                let member = self.static_str(frame, arg)?;
                let frame = current_frame(fiber)?;
                let module = frame.pop().ok_or(VmError::StackUnderflow)?;
                let value = dict_get_by_str_key(module, &member)
                    .ok_or_else(|| VmError::ImportError(member.clone()))?;
                current_frame(fiber)?.push(value);
            }
            ImpAll => {
                let frame = current_frame(fiber)?;
                let module = frame.pop().ok_or(VmError::StackUnderflow)?;
                let header = header_of(module).ok_or_else(|| {
                    VmError::TypeError("import-all target is not a module dict".into())
                })?;
                if unsafe { (*header).type_id } != well_known::DICT {
                    return Err(VmError::TypeError(
                        "import-all target is not a module dict".into(),
                    ));
                }
                let dict = header as *const DictObject;
                let entries: Vec<(Value, Value)> = unsafe { (*dict).entries.clone() };
                for (key, value) in entries {
                    if let Some(name) = unsafe { value_as_str(key) } {
                        self.context.set_global(name.to_string(), value);
                    }
                }
            }

            // --- misc ---
            Cnt => {}
            Extd => return Err(VmError::InvalidOpcode(OpCode::Extd as u8)),
        }
        Ok(Signal::Continue)
    }

    // --- allocation ---

    /// Box `boxed`, register it with the collector, and return a `Value`
    /// pointing at its embedded header.
    fn track<T>(&mut self, boxed: Box<T>) -> Value {
        let raw = Box::into_raw(boxed);
        self.context
            .collector_mut()
            .register(raw as *mut ObjectHeader);
        unsafe { Value::from_ptr(NonNull::new_unchecked(raw)) }
    }

    fn constant_to_value(&mut self, constant: &Constant) -> VmResult<Value> {
        Ok(match constant {
            Constant::Nil => Value::null(),
            Constant::Bool(b) => Value::bool(*b),
            Constant::Int(i) => Value::i32(*i as i32),
            Constant::Float(f) => Value::f64(*f),
            Constant::Str(s) => {
                let obj = StringObject::new_tracked(well_known::STR, s.clone());
                self.track(obj)
            }
            Constant::Code(code) => {
                let obj = Closure::new_tracked(well_known::FUNCTION, code.clone(), Vec::new());
                self.track(obj)
            }
        })
    }

    fn static_str(&self, frame: &Frame, idx: u32) -> VmResult<String> {
        match frame.code.statics.get(idx as usize) {
            Some(Constant::Str(s)) => Ok(s.clone()),
            _ => Err(VmError::ValueError("expected a string constant".into())),
        }
    }

    // --- arithmetic helpers ---

    fn numeric_binop(
        &mut self,
        fiber: &mut Fiber,
        int_op: impl Fn(i32, i32) -> i32,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let b = frame.pop().ok_or(VmError::StackUnderflow)?;
        let a = frame.pop().ok_or(VmError::StackUnderflow)?;
        let result = match (a.as_i32(), b.as_i32()) {
            (Some(x), Some(y)) => Value::i32(int_op(x, y)),
            _ => {
                let x = as_f64(a).ok_or_else(|| VmError::TypeError("expected a number".into()))?;
                let y = as_f64(b).ok_or_else(|| VmError::TypeError("expected a number".into()))?;
                Value::f64(float_op(x, y))
            }
        };
        frame.push(result);
        Ok(())
    }

    fn int_binop(&mut self, fiber: &mut Fiber, op: impl Fn(i32, i32) -> i32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let b = frame.pop().ok_or(VmError::StackUnderflow)?;
        let a = frame.pop().ok_or(VmError::StackUnderflow)?;
        let x = a
            .as_i32()
            .ok_or_else(|| VmError::TypeError("expected an int".into()))?;
        let y = b
            .as_i32()
            .ok_or_else(|| VmError::TypeError("expected an int".into()))?;
        frame.push(Value::i32(op(x, y)));
        Ok(())
    }

    fn divide(&mut self, fiber: &mut Fiber, mode: DivMode) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let b = frame.pop().ok_or(VmError::StackUnderflow)?;
        let a = frame.pop().ok_or(VmError::StackUnderflow)?;
        let result = match (a.as_i32(), b.as_i32()) {
            (Some(_), Some(0)) => {
                return Err(VmError::ValueError("division by zero".into()));
            }
            (Some(x), Some(y)) => match mode {
                DivMode::Integer => Value::i32(x.wrapping_div(y)),
                DivMode::Remainder => Value::i32(x.wrapping_rem(y)),
                DivMode::Float => Value::f64(x as f64 / y as f64),
            },
            _ => {
                let x = as_f64(a).ok_or_else(|| VmError::TypeError("expected a number".into()))?;
                let y = as_f64(b).ok_or_else(|| VmError::TypeError("expected a number".into()))?;
                if y == 0.0 {
                    return Err(VmError::ValueError("division by zero".into()));
                }
                match mode {
                    DivMode::Integer => Value::i32((x / y).trunc() as i32),
                    DivMode::Remainder => Value::f64(x % y),
                    DivMode::Float => Value::f64(x / y),
                }
            }
        };
        frame.push(result);
        Ok(())
    }

    fn local_step(&mut self, fiber: &mut Fiber, slot: u32, delta: i32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let cur = *frame
            .locals
            .get(slot as usize)
            .ok_or(VmError::StackUnderflow)?;
        let i = cur
            .as_i32()
            .ok_or_else(|| VmError::TypeError("expected an int local".into()))?;
        frame.locals[slot as usize] = Value::i32(i.wrapping_add(delta));
        Ok(())
    }

    fn local_inplace(
        &mut self,
        fiber: &mut Fiber,
        slot: u32,
        op: impl Fn(f64, f64) -> f64,
    ) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let operand = frame.pop().ok_or(VmError::StackUnderflow)?;
        let cur = *frame
            .locals
            .get(slot as usize)
            .ok_or(VmError::StackUnderflow)?;
        let result = match (cur.as_i32(), operand.as_i32()) {
            (Some(x), Some(y)) => Value::i32(op(x as f64, y as f64) as i32),
            _ => {
                let x =
                    as_f64(cur).ok_or_else(|| VmError::TypeError("expected a number".into()))?;
                let y = as_f64(operand)
                    .ok_or_else(|| VmError::TypeError("expected a number".into()))?;
                Value::f64(op(x, y))
            }
        };
        frame.locals[slot as usize] = result;
        Ok(())
    }

    fn compare(&mut self, fiber: &mut Fiber, mode: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let b = frame.pop().ok_or(VmError::StackUnderflow)?;
        let a = frame.pop().ok_or(VmError::StackUnderflow)?;
        let ordering = match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => return Err(VmError::TypeError("expected comparable numbers".into())),
        };
        let result = match (mode, ordering) {
            (0, Some(std::cmp::Ordering::Equal)) => true,
            (1, o) => o != Some(std::cmp::Ordering::Equal),
            (2, Some(std::cmp::Ordering::Less)) => true,
            (3, Some(o)) => o != std::cmp::Ordering::Greater,
            (4, Some(std::cmp::Ordering::Greater)) => true,
            (5, Some(o)) => o != std::cmp::Ordering::Less,
            _ => false,
        };
        frame.push(Value::bool(result));
        Ok(())
    }

    fn structural_eq(&mut self, fiber: &mut Fiber) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let b = frame.pop().ok_or(VmError::StackUnderflow)?;
        let a = frame.pop().ok_or(VmError::StackUnderflow)?;
        let equal = match (header_of(a), header_of(b)) {
            (Some(ha), Some(hb)) => {
                let type_id = unsafe { (*ha).type_id };
                let descriptor = self.context.type_registry().get(type_id);
                match descriptor.and_then(|d| d.eq) {
                    Some(eq) => eq(ha, hb),
                    None => a == b,
                }
            }
            _ => a == b,
        };
        frame.push(Value::bool(equal));
        Ok(())
    }

    fn logical_binop(
        &mut self,
        fiber: &mut Fiber,
        bool_op: impl Fn(bool, bool) -> bool,
        int_op: impl Fn(i32, i32) -> i32,
    ) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let b = frame.pop().ok_or(VmError::StackUnderflow)?;
        let a = frame.pop().ok_or(VmError::StackUnderflow)?;
        let result = match (a.as_bool(), b.as_bool()) {
            (Some(x), Some(y)) => Value::bool(bool_op(x, y)),
            _ => {
                let x = a
                    .as_i32()
                    .ok_or_else(|| VmError::TypeError("expected an int or bool".into()))?;
                let y = b
                    .as_i32()
                    .ok_or_else(|| VmError::TypeError("expected an int or bool".into()))?;
                Value::i32(int_op(x, y))
            }
        };
        frame.push(result);
        Ok(())
    }

    // --- variable access helpers ---

    fn load_global(&mut self, fiber: &mut Fiber, arg: u32, strict: bool) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let name = frame
            .code
            .globals
            .get(arg as usize)
            .cloned()
            .ok_or_else(|| VmError::NameError("unknown global slot".into()))?;
        let value = match self.context.get_global(&name) {
            Some(v) => v,
            None if strict => return Err(VmError::NameError(name)),
            None => Value::null(),
        };
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn load_attr(&mut self, fiber: &mut Fiber, index: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let object = frame.pop().ok_or(VmError::StackUnderflow)?;
        let header = header_of(object).ok_or(VmError::NullPointer)?;
        if unsafe { (*header).type_id } != well_known::OBJECT {
            return Err(VmError::TypeError("value has no attributes".into()));
        }
        let obj = header as *const Object;
        let value = unsafe { (*obj).get_field(index as usize).copied() }
            .ok_or_else(|| VmError::ValueError("field index out of range".into()))?;
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn store_attr(&mut self, fiber: &mut Fiber, index: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let value = frame.pop().ok_or(VmError::StackUnderflow)?;
        let object = frame.pop().ok_or(VmError::StackUnderflow)?;
        let header = header_of(object).ok_or(VmError::NullPointer)?;
        if unsafe { (*header).type_id } != well_known::OBJECT {
            return Err(VmError::TypeError("value has no attributes".into()));
        }
        let obj = header as *mut Object;
        if !unsafe { (*obj).set_field(index as usize, value) } {
            return Err(VmError::ValueError("field index out of range".into()));
        }
        Ok(())
    }

    fn load_method(&mut self, fiber: &mut Fiber, packed: u32) -> VmResult<()> {
        let class_id = (packed >> 12) as usize;
        let slot = (packed & 0xFFF) as usize;
        let frame = current_frame(fiber)?;
        let instance = frame.pop().ok_or(VmError::StackUnderflow)?;
        let code = self
            .classes
            .method_code(class_id, slot)
            .ok_or_else(|| VmError::NameError("unknown method".into()))?;
        let bound = BoundMethod::new_tracked(well_known::BOUND_METHOD, instance, code);
        let value = self.track(bound);
        current_frame(fiber)?.push(value);
        Ok(())
    }

    // --- container construction ---

    fn pop_n(frame: &mut Frame, count: u32) -> VmResult<Vec<Value>> {
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(frame.pop().ok_or(VmError::StackUnderflow)?);
        }
        items.reverse();
        Ok(items)
    }

    fn make_list(&mut self, fiber: &mut Fiber, count: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let items = Self::pop_n(frame, count)?;
        let value = self.track(ListObject::new_tracked(well_known::LIST, items));
        current_frame(fiber)?.push(value);
        Ok(())
    }

    /// A set is a dict whose values are all nil; membership is key presence,
    /// so duplicate elements collapse through `insert`'s key replacement.
    fn make_set(&mut self, fiber: &mut Fiber, count: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let items = Self::pop_n(frame, count)?;
        let mut dict = DictObject::new_tracked(well_known::DICT);
        for item in items {
            dict.insert(item, Value::null());
        }
        let value = self.track(dict);
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn make_tuple(&mut self, fiber: &mut Fiber, count: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let items = Self::pop_n(frame, count)?;
        let value = self.track(TupleObject::new_tracked(well_known::TUPLE, items));
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn make_dict(&mut self, fiber: &mut Fiber, pair_count: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let flat = Self::pop_n(frame, pair_count * 2)?;
        let mut dict = DictObject::new_tracked(well_known::DICT);
        for pair in flat.chunks_exact(2) {
            dict.insert(pair[0], pair[1]);
        }
        let value = self.track(dict);
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn make_bound_method(&mut self, fiber: &mut Fiber, const_idx: u32) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let instance = frame.pop().ok_or(VmError::StackUnderflow)?;
        let code = match frame.code.statics.get(const_idx as usize) {
            Some(Constant::Code(c)) => c.clone(),
            _ => return Err(VmError::ValueError("expected a code constant".into())),
        };
        let bound = BoundMethod::new_tracked(well_known::BOUND_METHOD, instance, code);
        let value = self.track(bound);
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn make_closure(&mut self, fiber: &mut Fiber, packed: u32) -> VmResult<()> {
        let const_idx = (packed & 0xFFF) as usize;
        let capture_count = packed >> 12;
        let frame = current_frame(fiber)?;
        let captured = Self::pop_n(frame, capture_count)?;
        let code = match frame.code.statics.get(const_idx) {
            Some(Constant::Code(c)) => c.clone(),
            _ => return Err(VmError::ValueError("expected a code constant".into())),
        };
        let closure = Closure::new_tracked(well_known::FUNCTION, code, captured);
        let value = self.track(closure);
        current_frame(fiber)?.push(value);
        Ok(())
    }

    fn make_struct(&mut self, fiber: &mut Fiber, class_id: u32) -> VmResult<()> {
        let class = self
            .classes
            .class(class_id as usize)
            .ok_or_else(|| VmError::NameError("unknown class".into()))?;
        let frame = current_frame(fiber)?;
        let fields = Self::pop_n(frame, class.field_count as u32)?;
        let mut object = Object::new_tracked(well_known::OBJECT, class_id as usize, fields.len());
        for (i, field) in fields.into_iter().enumerate() {
            object.set_field(i, field);
        }
        let value = self.track(Box::new(object));
        current_frame(fiber)?.push(value);
        Ok(())
    }

    // --- iteration ---

    fn iterate_next(&mut self, fiber: &mut Fiber) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let iter_value = *frame.eval_stack.last().ok_or(VmError::StackUnderflow)?;
        let header = header_of(iter_value).ok_or(VmError::NullPointer)?;
        if unsafe { (*header).type_id } != well_known::ITERATOR {
            return Err(VmError::TypeError("value is not an iterator".into()));
        }
        let iter = header as *mut IteratorObject;
        let source = unsafe { (*iter).source };
        let index = unsafe { (*iter).index };
        let source_header = header_of(source).ok_or(VmError::NullPointer)?;
        let source_type = unsafe { (*source_header).type_id };

        let item = if source_type == well_known::LIST {
            let list = source_header as *const ListObject;
            unsafe { (&(*list).items).get(index).copied() }
        } else if source_type == well_known::TUPLE {
            let tuple = source_header as *const TupleObject;
            unsafe { (&(*tuple).items).get(index).copied() }
        } else if source_type == well_known::DICT {
            let dict = source_header as *const DictObject;
            let pair = unsafe { (&(*dict).entries).get(index).copied() };
            match pair {
                Some((k, v)) => Some(self.track(TupleObject::new_tracked(
                    well_known::TUPLE,
                    vec![k, v],
                ))),
                None => None,
            }
        } else {
            return Err(VmError::TypeError("value is not iterable".into()));
        };

        let frame = current_frame(fiber)?;
        match item {
            Some(value) => {
                unsafe { (*iter).index += 1 };
                frame.push(value);
                frame.push(Value::bool(true));
            }
            None => {
                frame.push(Value::null());
                frame.push(Value::bool(false));
            }
        }
        Ok(())
    }

    fn unpack(&mut self, fiber: &mut Fiber) -> VmResult<()> {
        let frame = current_frame(fiber)?;
        let value = frame.pop().ok_or(VmError::StackUnderflow)?;
        let header = header_of(value).ok_or(VmError::NullPointer)?;
        let type_id = unsafe { (*header).type_id };
        let items = if type_id == well_known::LIST {
            unsafe { (*(header as *const ListObject)).items.clone() }
        } else if type_id == well_known::TUPLE {
            unsafe { (*(header as *const TupleObject)).items.clone() }
        } else {
            return Err(VmError::TypeError("value is not unpackable".into()));
        };
        for item in items {
            frame.push(item);
        }
        Ok(())
    }

    // --- call protocol ---

    fn pop_call_args(&mut self, fiber: &mut Fiber, packed: u32) -> VmResult<(Value, Vec<Value>)> {
        // Only the plain positional (FASTCALL) calling convention is
        // implemented; no lowering emits the REST_PARAMS/KW_PARAMS mode bits
        // in the high byte, and they are ignored here.
        let argc = packed & 0xFF;
        let frame = current_frame(fiber)?;
        let args = Self::pop_n(frame, argc)?;
        let callable = frame.pop().ok_or(VmError::StackUnderflow)?;
        Ok((callable, args))
    }

    fn invoke_callable(
        &mut self,
        fiber: &mut Fiber,
        callable: Value,
        args: Vec<Value>,
    ) -> VmResult<()> {
        let header = header_of(callable).ok_or(VmError::NullPointer)?;
        let type_id = unsafe { (*header).type_id };
        if type_id == well_known::FUNCTION {
            let closure = header as *const Closure;
            let code = unsafe { (*closure).code.clone() };
            let captured = unsafe { (*closure).captured.clone() };
            let mut new_frame = fiber.alloc_frame_with_enclosed(code, captured);
            bind_args(&mut new_frame, &args);
            fiber.push_frame(new_frame);
            Ok(())
        } else if type_id == well_known::BOUND_METHOD {
            let bound = header as *const BoundMethod;
            let code = unsafe { (*bound).code.clone() };
            let instance = unsafe { (*bound).instance };
            let mut new_frame = fiber.alloc_frame(code);
            new_frame.instance = Some(instance);
            bind_args(&mut new_frame, &args);
            fiber.push_frame(new_frame);
            Ok(())
        } else {
            Err(VmError::TypeError("value is not callable".into()))
        }
    }

    fn spawn(&mut self, fiber: &mut Fiber, packed: u32) -> VmResult<()> {
        let (callable, args) = self.pop_call_args(fiber, packed)?;
        let scheduler = self
            .scheduler
            .clone()
            .ok_or_else(|| VmError::RuntimeError("no scheduler attached".into()))?;
        let mut spawned = Fiber::new();
        self.invoke_callable(&mut spawned, callable, args)?;
        let future = self.track(FutureObject::new_tracked(well_known::FUTURE));
        spawned.future = Some(future);
        scheduler.spawn(Box::new(spawned));
        current_frame(fiber)?.push(future);
        Ok(())
    }

    /// Read a future's settled state: `None` while pending, otherwise the
    /// stored value plus whether it is a rejection.
    fn poll_future(&self, future: Value) -> VmResult<Option<(Value, bool)>> {
        let header = header_of(future).ok_or(VmError::NullPointer)?;
        if unsafe { (*header).type_id } != well_known::FUTURE {
            return Err(VmError::TypeError("value is not a future".into()));
        }
        let future_obj = header as *const FutureObject;
        Ok(unsafe { (*future_obj).result.map(|v| (v, (*future_obj).failed)) })
    }

    /// Fulfil a future allocated by `SPW` with its fiber's return value.
    /// Called by whatever drives the scheduler when it observes the fiber
    /// finished; the interpreter never calls this itself.
    pub fn fulfil_future(future: Value, result: Value) -> VmResult<()> {
        Self::settle_future(future, result, false)
    }

    /// Reject a future: its fiber died with an unhandled panic whose payload
    /// is `reason`. The next `AWAIT` re-raises it.
    pub fn reject_future(future: Value, reason: Value) -> VmResult<()> {
        Self::settle_future(future, reason, true)
    }

    fn settle_future(future: Value, value: Value, failed: bool) -> VmResult<()> {
        let header = header_of(future).ok_or(VmError::NullPointer)?;
        if unsafe { (*header).type_id } != well_known::FUTURE {
            return Err(VmError::TypeError("value is not a future".into()));
        }
        let future_obj = header as *mut FutureObject;
        unsafe {
            (*future_obj).result = Some(value);
            (*future_obj).failed = failed;
        }
        Ok(())
    }

    fn do_return(&mut self, fiber: &mut Fiber) -> VmResult<Signal> {
        let value = current_frame(fiber)?.pop().unwrap_or(Value::null());
        if let Some(panic) = self.drain_defers(fiber)? {
            return self.raise(fiber, panic);
        }
        fiber.pop_frame();
        match fiber.frame.as_mut() {
            Some(caller) => {
                caller.push(value);
                Ok(Signal::Continue)
            }
            None => Ok(Signal::Done(value)),
        }
    }

    /// Run the current frame's deferred calls, in LIFO order, to completion.
    /// Returns the panic, if any, that escaped one of them uncaught.
    fn drain_defers(&mut self, fiber: &mut Fiber) -> VmResult<Option<Panic>> {
        let anchor: *const Frame = current_frame(fiber)? as *const Frame;
        while let Some(entry) = current_frame(fiber)?.pop_defer() {
            self.invoke_callable(fiber, entry.callable, entry.args)?;
            loop {
                if std::ptr::eq(current_frame(fiber)? as *const Frame, anchor) {
                    break;
                }
                let (op, arg, here) = decode_next(fiber)?;
                match self.step(fiber, op, arg, here)? {
                    Signal::Continue | Signal::Suspend => {}
                    Signal::Done(_) => break,
                    Signal::Panic(p) => return Ok(Some(p)),
                }
            }
        }
        Ok(None)
    }

    /// Unwind `fiber`'s frame chain looking for an installed trap handler,
    /// running each unwound frame's defers along the way. A panic raised
    /// while a defer runs is chained onto the one being propagated. The
    /// frame the panic originated in is already the panic's first trace
    /// entry, so unwinding records only the frames after it.
    fn raise(&mut self, fiber: &mut Fiber, mut panic: Panic) -> VmResult<Signal> {
        let mut at_origin = true;
        loop {
            if fiber.frame.is_none() {
                return Ok(Signal::Panic(panic));
            }
            let handler = current_frame(fiber)?.trap_cursor.take();
            if let Some(target) = handler {
                let frame = current_frame(fiber)?;
                frame.instr_cursor = target;
                frame.push(panic.value);
                panic.recover();
                return Ok(Signal::Continue);
            }
            if at_origin {
                at_origin = false;
            } else {
                let unwound = {
                    let frame = current_frame(fiber)?;
                    trace_frame(frame, frame.instr_cursor)
                };
                panic.push_frame(unwound);
            }
            if let Some(aborting) = self.drain_defers(fiber)? {
                panic.abort_with(aborting);
            }
            fiber.pop_frame();
        }
    }

    fn lock_for(&mut self, key: usize) -> Arc<RecursiveSharedMutex> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(RecursiveSharedMutex::new()))
            .clone()
    }
}

fn decode_next(fiber: &mut Fiber) -> VmResult<(OpCode, u32, usize)> {
    let frame = current_frame(fiber)?;
    let here = frame.instr_cursor;
    let (op, arg, next) = decode_instr(frame.code.instructions(), here).map_err(|_| {
        VmError::InvalidOpcode(frame.code.instructions().get(here).copied().unwrap_or(0))
    })?;
    frame.instr_cursor = next;
    Ok((op, arg, here))
}

fn current_frame(fiber: &mut Fiber) -> VmResult<&mut Frame> {
    fiber
        .frame
        .as_deref_mut()
        .ok_or(VmError::RuntimeError("no active frame".into()))
}

fn trace_frame(frame: &Frame, offset: usize) -> TraceFrame {
    let name = frame
        .code
        .qualified_name
        .clone()
        .unwrap_or_else(|| "<anonymous>".to_string());
    TraceFrame {
        name,
        line: frame.code.line_table.line_for(offset as u32),
        offset,
    }
}

fn bind_args(frame: &mut Frame, args: &[Value]) {
    for (slot, arg) in frame.locals.iter_mut().zip(args.iter().copied()) {
        *slot = arg;
    }
}

fn as_f64(value: Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i32().map(|i| i as f64))
}

fn header_of(value: Value) -> Option<*const ObjectHeader> {
    unsafe { value.as_ptr::<ObjectHeader>() }.map(|p| p.as_ptr() as *const ObjectHeader)
}

fn pointer_key(value: Value) -> VmResult<usize> {
    header_of(value)
        .map(|p| p as usize)
        .ok_or(VmError::NullPointer)
}

/// Read a string's contents, if `value` points at a [`StringObject`].
///
/// # Safety
/// `value` must actually be a pointer currently allocated as a
/// `StringObject` for the returned reference to be valid for as long as the
/// caller uses it.
unsafe fn value_as_str<'a>(value: Value) -> Option<&'a str> {
    let header = header_of(value)?;
    if (*header).type_id != well_known::STR {
        return None;
    }
    let s = header as *const StringObject;
    Some(&(*s).data)
}

fn dict_get_by_str_key(dict_value: Value, key: &str) -> Option<Value> {
    let header = header_of(dict_value)?;
    if unsafe { (*header).type_id } != well_known::DICT {
        return None;
    }
    let dict = header as *const DictObject;
    unsafe { &(*dict).entries }
        .iter()
        .find(|(k, _)| unsafe { value_as_str(*k) } == Some(key))
        .map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::{encode_instr, offset_of, CodeBuilder};

    fn run_code(builder: CodeBuilder) -> (Vm, Fiber, StepOutcome) {
        let code = Arc::new(builder.freeze());
        let mut vm = Vm::new(VmContext::new());
        let mut fiber = Fiber::new();
        let frame = fiber.alloc_frame(code);
        fiber.push_frame(frame);
        let outcome = vm.run(&mut fiber).expect("run should not error");
        (vm, fiber, outcome)
    }

    #[test]
    fn add_two_constants_and_return() {
        let mut b = CodeBuilder::new();
        b.set_requirements(4, 0, 0);
        let one = b.add_static(Constant::Int(1));
        let two = b.add_static(Constant::Int(2));
        let mut bytes = Vec::new();
        encode_instr(&mut bytes, OpCode::PshC, one);
        encode_instr(&mut bytes, OpCode::PshC, two);
        encode_instr(&mut bytes, OpCode::Add, 0);
        encode_instr(&mut bytes, OpCode::Ret, 0);
        b.extend_instructions(&bytes);

        let (_, _, outcome) = run_code(b);
        match outcome {
            StepOutcome::Returned(v) => assert_eq!(v.as_i32(), Some(3)),
            _ => panic!("expected a normal return"),
        }
    }

    #[test]
    fn division_by_zero_is_a_value_error() {
        let mut b = CodeBuilder::new();
        b.set_requirements(4, 0, 0);
        let five = b.add_static(Constant::Int(5));
        let zero = b.add_static(Constant::Int(0));
        let mut bytes = Vec::new();
        encode_instr(&mut bytes, OpCode::PshC, five);
        encode_instr(&mut bytes, OpCode::PshC, zero);
        encode_instr(&mut bytes, OpCode::Div, 0);
        encode_instr(&mut bytes, OpCode::Ret, 0);
        b.extend_instructions(&bytes);

        let code = Arc::new(b.freeze());
        let mut vm = Vm::new(VmContext::new());
        let mut fiber = Fiber::new();
        let frame = fiber.alloc_frame(code);
        fiber.push_frame(frame);
        assert!(matches!(vm.run(&mut fiber), Err(VmError::ValueError(_))));
    }

    #[test]
    fn explicit_panic_unwinds_to_a_trap_handler() {
        let mut b = CodeBuilder::new();
        b.set_requirements(4, 0, 0);
        let message = b.add_static(Constant::Int(99));
        let mut bytes = Vec::new();
        let trap_pos = bytes.len();
        encode_instr(&mut bytes, OpCode::Trap, 0); // patched below
        encode_instr(&mut bytes, OpCode::PshC, message);
        encode_instr(&mut bytes, OpCode::Panic, 0);
        let handler_offset = bytes.len() as u32;
        encode_instr(&mut bytes, OpCode::Ret, 0);

        let width = offset_of(OpCode::Trap) as usize;
        debug_assert_eq!(width, 4);
        let arg_bytes = handler_offset.to_le_bytes();
        bytes[trap_pos + 1] = arg_bytes[0];
        bytes[trap_pos + 2] = arg_bytes[1];
        bytes[trap_pos + 3] = arg_bytes[2];
        b.extend_instructions(&bytes);

        let (_, _, outcome) = run_code(b);
        match outcome {
            StepOutcome::Returned(v) => assert_eq!(v.as_i32(), Some(99)),
            _ => panic!("expected the trap handler's return value"),
        }
    }

    #[test]
    fn defer_runs_before_the_frame_finishes_unwinding() {
        let mut bumper = CodeBuilder::new();
        bumper.set_requirements(4, 0, 0);
        bumper.set_globals(vec!["counter".to_string()]);
        let one = bumper.add_static(Constant::Int(1));
        let mut bumper_bytes = Vec::new();
        encode_instr(&mut bumper_bytes, OpCode::LdGbl, 0);
        encode_instr(&mut bumper_bytes, OpCode::PshC, one);
        encode_instr(&mut bumper_bytes, OpCode::Add, 0);
        encode_instr(&mut bumper_bytes, OpCode::StGbl, 0);
        encode_instr(&mut bumper_bytes, OpCode::Ret, 0);
        bumper.extend_instructions(&bumper_bytes);
        let bumper_code = Arc::new(bumper.freeze());

        let mut main = CodeBuilder::new();
        main.set_requirements(4, 0, 0);
        let bumper_const = main.add_static(Constant::Code(bumper_code));
        let mut main_bytes = Vec::new();
        encode_instr(&mut main_bytes, OpCode::PshC, bumper_const);
        encode_instr(&mut main_bytes, OpCode::Dfr, 0);
        encode_instr(&mut main_bytes, OpCode::Ret, 0);
        main.extend_instructions(&main_bytes);

        let mut vm = Vm::new(VmContext::new());
        vm.context.set_global("counter".to_string(), Value::i32(0));
        let mut fiber = Fiber::new();
        let frame = fiber.alloc_frame(Arc::new(main.freeze()));
        fiber.push_frame(frame);
        vm.run(&mut fiber).expect("run should not error");
        assert_eq!(vm.context.get_global("counter"), Some(Value::i32(1)));
    }

    #[test]
    fn set_construction_collapses_duplicate_elements() {
        let mut b = CodeBuilder::new();
        b.set_requirements(4, 0, 0);
        let one = b.add_static(Constant::Int(1));
        let mut bytes = Vec::new();
        encode_instr(&mut bytes, OpCode::PshC, one);
        encode_instr(&mut bytes, OpCode::PshC, one);
        encode_instr(&mut bytes, OpCode::MkSt, 2);
        encode_instr(&mut bytes, OpCode::Ret, 0);
        b.extend_instructions(&bytes);

        let (_, _, outcome) = run_code(b);
        let StepOutcome::Returned(v) = outcome else {
            panic!("expected a normal return");
        };
        let header = header_of(v).expect("a set is a heap value");
        assert_eq!(unsafe { (*header).type_id }, well_known::DICT);
        let dict = header as *const DictObject;
        assert_eq!(unsafe { (*dict).entries.len() }, 1);
    }

    #[test]
    fn list_construction_round_trips_through_iteration() {
        let mut b = CodeBuilder::new();
        b.set_requirements(8, 0, 0);
        let one = b.add_static(Constant::Int(1));
        let two = b.add_static(Constant::Int(2));
        let mut bytes = Vec::new();
        encode_instr(&mut bytes, OpCode::PshC, one);
        encode_instr(&mut bytes, OpCode::PshC, two);
        encode_instr(&mut bytes, OpCode::MkLt, 2);
        encode_instr(&mut bytes, OpCode::LdIter, 0);
        encode_instr(&mut bytes, OpCode::Nxt, 0);
        encode_instr(&mut bytes, OpCode::Ret, 0);
        b.extend_instructions(&bytes);

        let (_, _, outcome) = run_code(b);
        match outcome {
            StepOutcome::Returned(v) => assert_eq!(v.as_bool(), Some(true)),
            _ => panic!("expected a normal return"),
        }
    }
}
