//! Translation unit: the compiler's per-function-or-module workspace.
//!
//! Owns everything one function body accumulates while it's being lowered —
//! its basic-block graph, its open J-blocks, its symbol table, the static
//! pool and name lists that end up on the assembled [`ember_bytecode::Code`],
//! and the paired `{required, current}` counters that track peak
//! evaluation-stack depth, local-slot count, and `sync` nesting depth.
//!
//! Units nest: [`TranslationUnitStack`] is an explicit `Vec` the compiler
//! pushes a unit onto when it starts lowering a nested function and pops
//! when it's done, standing in for an enclosing-scope `prev` pointer chain.

use crate::ir::{BasicBlockId, BasicBlockSeq, JBlock, JBlockStack, JBlockType};
use crate::symtab::{RedeclarationError, SymbolTable, SymbolType};
use ember_bytecode::{Constant, OpCode};
use rustc_hash::FxHashMap;

/// A paired peak/current counter: bumping `current` raises `required`
/// whenever it would exceed the high-water mark, so `required` always
/// holds the peak once lowering finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counter {
    pub required: u32,
    pub current: u32,
}

impl Counter {
    pub fn increment(&mut self, n: u32) {
        self.current += n;
        if self.current > self.required {
            self.required = self.current;
        }
    }

    pub fn decrement(&mut self, n: u32) {
        self.current = self.current.checked_sub(n).expect("stack underflow in translation unit bookkeeping");
    }

    /// Raise `required` to cover a depth the current value hasn't reached
    /// yet but a following instruction sequence will need transiently
    /// (e.g. an argument list built up before a call).
    pub fn increment_required(&mut self, n: u32) {
        if self.current + n > self.required {
            self.required = self.current + n;
        }
    }
}

/// Hashable stand-in for [`Constant`], since floats aren't `Eq`/`Hash` and
/// nested `Code` objects aren't comparable at all — used only to dedup the
/// scalar constants worth deduping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StaticKey {
    Nil,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Str(String),
}

impl StaticKey {
    fn of(c: &Constant) -> Option<Self> {
        Some(match c {
            Constant::Nil => StaticKey::Nil,
            Constant::Bool(b) => StaticKey::Bool(*b),
            Constant::Int(i) => StaticKey::Int(*i),
            Constant::Float(f) => StaticKey::FloatBits(f.to_bits()),
            Constant::Str(s) => StaticKey::Str(s.clone()),
            Constant::Code(_) => return None,
        })
    }
}

pub struct TranslationUnit {
    pub name: String,
    pub qname: String,
    pub symt: SymbolTable,

    statics_map: FxHashMap<StaticKey, u32>,
    pub statics: Vec<Constant>,
    /// Usage count per static slot, for the assembler's dead-static pass.
    pub statics_usage: Vec<u32>,

    /// Names of globals this unit references (by slot index).
    pub names: Vec<String>,
    /// Parameter names, in declaration order.
    pub lnames: Vec<String>,
    /// Free-variable names captured from an enclosing unit.
    pub enclosed: Vec<String>,

    pub jblock: JBlockStack,
    pub bb: BasicBlockSeq,

    pub stack: Counter,
    pub local: Counter,
    pub sync_stack: Counter,

    anon_count: u32,
}

impl TranslationUnit {
    pub fn new(name: impl Into<String>, qname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qname: qname.into(),
            symt: SymbolTable::new(),
            statics_map: FxHashMap::default(),
            statics: Vec::new(),
            statics_usage: Vec::new(),
            names: Vec::new(),
            lnames: Vec::new(),
            enclosed: Vec::new(),
            jblock: JBlockStack::new(),
            bb: BasicBlockSeq::new(),
            stack: Counter::default(),
            local: Counter::default(),
            sync_stack: Counter::default(),
            anon_count: 0,
        }
    }

    /// Allocate a fresh, disconnected basic block (the caller decides when
    /// to append it to the sequence via [`TranslationUnit::block_append`]).
    pub fn block_new(&mut self) -> BasicBlockId {
        self.bb.block_new_append()
    }

    /// Resume appending instructions to a previously allocated block.
    pub fn block_append(&mut self, id: BasicBlockId) {
        self.bb.set_current(id);
    }

    /// Intern a constant into the static pool, reusing an existing slot for
    /// scalar constants already present (nested `Code` objects are never
    /// deduped — each closure's body is distinct even when byte-identical).
    pub fn add_static(&mut self, value: Constant) -> u32 {
        if let Some(key) = StaticKey::of(&value) {
            if let Some(&slot) = self.statics_map.get(&key) {
                self.statics_usage[slot as usize] += 1;
                return slot;
            }
            let slot = self.statics.len() as u32;
            self.statics.push(value);
            self.statics_usage.push(1);
            self.statics_map.insert(key, slot);
            return slot;
        }
        let slot = self.statics.len() as u32;
        self.statics.push(value);
        self.statics_usage.push(1);
        slot
    }

    pub fn inc_static_usage(&mut self, slot: u32) {
        self.statics_usage[slot as usize] += 1;
    }

    /// Emit an instruction into the current block, targeting `dest` if this
    /// is a jump.
    pub fn emit(&mut self, op: OpCode, arg: i32, dest: Option<BasicBlockId>, line: u32) {
        if let Some(dest) = dest {
            self.bb.add_jump(op, dest, line);
        } else {
            self.bb.add_instr(op, arg, line);
        }
    }

    pub fn emit_pop(&mut self, line: u32) {
        self.emit(OpCode::Pop, 0, None, line);
        self.decrement_stack(1);
    }

    pub fn increment_stack(&mut self, n: u32) {
        self.stack.increment(n);
    }

    pub fn decrement_stack(&mut self, n: u32) {
        self.stack.decrement(n);
    }

    pub fn increment_required_stack(&mut self, n: u32) {
        self.stack.increment_required(n);
    }

    pub fn enter_sync(&mut self, line: u32) {
        let slot = self.sync_stack.current as i32;
        self.emit(OpCode::Sync, slot, None, line);
        self.sync_stack.increment(1);
    }

    pub fn exit_sync(&mut self, line: u32) {
        self.sync_stack.decrement(1);
        let slot = self.sync_stack.current as i32;
        self.emit(OpCode::Unsync, slot, None, line);
    }

    /// Enter a nested block scope for lowering an inner block statement.
    pub fn enter_sub(&mut self) {
        self.symt.push_scope();
    }

    /// Leave a nested block scope.
    pub fn exit_sub(&mut self) {
        self.symt.pop_scope();
    }

    /// A name for the next anonymous closure declared in this unit.
    pub fn next_anon_name(&mut self) -> String {
        let n = self.anon_count;
        self.anon_count += 1;
        format!("$anon{n}")
    }

    pub fn jb_push(&mut self, label: Option<String>, begin: BasicBlockId, end: BasicBlockId, ty: JBlockType) {
        self.jblock.push(label, begin, end, ty);
    }

    pub fn jb_pop(&mut self) -> Option<JBlock> {
        self.jblock.pop()
    }

    /// Resolve a (possibly unlabelled) `break`/`continue` target and the
    /// number of evaluation-stack slots it must pop to unwind cleanly.
    pub fn jb_find_label(&self, label: Option<&str>) -> Option<(&JBlock, u16)> {
        let block = match label {
            Some(l) => self.jblock.find_label(l)?,
            None => self.jblock.innermost_loop_or_switch()?,
        };
        let pops: u16 = self
            .jblock
            .unwind_path_to(block)
            .iter()
            .map(|b| b.pops)
            .sum();
        Some((block, pops))
    }

    pub fn check_block(&self, expected: JBlockType) -> bool {
        self.jblock.top().is_some_and(|b| b.ty == expected)
    }

    /// Declare a name in the current scope, allocating it a local slot the
    /// first time it's declared (re-declaring the same name/type is
    /// idempotent and returns the slot already assigned).
    pub fn declare(&mut self, name: &str, ty: SymbolType) -> Result<i16, RedeclarationError> {
        let sym = self.symt.insert(name, ty)?;
        if sym.id < 0 {
            let slot = self.local.current as i16;
            sym.id = slot;
            self.local.increment(1);
            Ok(slot)
        } else {
            Ok(sym.id)
        }
    }

    /// Emit a jump-family instruction whose target isn't known yet, deferring
    /// resolution to a later [`TranslationUnit::patch_jump`] call. Returns
    /// the `(block, index)` site to patch.
    pub fn emit_jump_placeholder(&mut self, op: OpCode, line: u32) -> (BasicBlockId, usize) {
        let block = self.bb.current().expect("emit_jump_placeholder needs an open block");
        self.bb.add_instr(op, 0, line);
        let index = self.bb.get(block).instrs().len() - 1;
        (block, index)
    }

    /// Resolve a jump site created by [`TranslationUnit::emit_jump_placeholder`]
    /// to its final target block, once that block exists.
    pub fn patch_jump(&mut self, block: BasicBlockId, index: usize, target: BasicBlockId) {
        self.bb.get_mut(block).instrs[index].jmp = Some(target);
    }
}

/// The enclosing-unit chain: one entry per function currently being
/// lowered, innermost last.
#[derive(Default)]
pub struct TranslationUnitStack {
    units: Vec<TranslationUnit>,
}

impl TranslationUnitStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_sub(&mut self, name: impl Into<String>, qname: impl Into<String>) {
        self.units.push(TranslationUnit::new(name, qname));
    }

    pub fn exit_sub(&mut self) -> Option<TranslationUnit> {
        self.units.pop()
    }

    pub fn current(&self) -> &TranslationUnit {
        self.units.last().expect("no translation unit is open")
    }

    pub fn current_mut(&mut self) -> &mut TranslationUnit {
        self.units.last_mut().expect("no translation unit is open")
    }

    pub fn depth(&self) -> usize {
        self.units.len()
    }

    /// Resolve `name`, searching the current unit's scopes first and then
    /// each enclosing unit in turn. A hit in an enclosing unit marks that
    /// unit's symbol `free` and records `name` in every intervening unit's
    /// `enclosed` list: a variable captured three functions out is threaded
    /// through every level in between, not just the innermost one.
    pub fn resolve(&mut self, name: &str) -> Option<SymbolType> {
        if let Some(sym) = self.units.last()?.symt.lookup(name) {
            return Some(sym.ty);
        }

        let found_at = self.units[..self.units.len() - 1]
            .iter()
            .rposition(|u| u.symt.lookup(name).is_some())?;

        let ty = self.units[found_at].symt.lookup(name).unwrap().ty;
        if let Some(sym) = self.units[found_at].symt.lookup_mut(name) {
            sym.free = true;
        }

        for unit in &mut self.units[found_at + 1..] {
            if !unit.enclosed.iter().any(|n| n == name) {
                unit.enclosed.push(name.to_string());
            }
        }

        Some(ty)
    }

    pub fn is_free_var(&self, name: &str) -> bool {
        self.units
            .last()
            .is_some_and(|u| u.enclosed.iter().any(|n| n == name))
    }
}
