//! AST-to-bytecode lowering.
//!
//! Walks a parsed module's statements into a [`crate::transl_unit`]'s
//! basic-block graph, then hands the finished graph to [`crate::assembler`].
//! Split by what a construct does to the evaluation stack: [`expr`] for
//! anything that leaves one value on it, [`stmt`] for everything else
//! (control flow, declarations, non-local exits).

mod expr;
mod stmt;

use crate::error::{CompileError, CompileResult};
use crate::symtab::SymbolType;
use crate::transl_unit::TranslationUnitStack;
use ember_bytecode::{verify_code, Code, OpCode};
use ember_parser::ast;

pub use expr::lower_expr;
pub use stmt::lower_stmt;

/// Threaded through every lowering function: the open translation-unit
/// chain plus the optimisation level passed down to the assembler once a
/// unit is finished, so nested function bodies assemble at the same level
/// as the module they're declared in.
pub struct LowerCtx {
    pub units: TranslationUnitStack,
    pub level: crate::optimize::OptimizationLevel,
}

/// Compile `module`'s top-level statements into its entry-point `Code`
/// object, named `name`.
pub fn lower_module(module: &ast::Module, name: &str, level: crate::optimize::OptimizationLevel) -> CompileResult<Code> {
    let mut ctx = LowerCtx {
        units: TranslationUnitStack::new(),
        level,
    };
    ctx.units.enter_sub(name, name);
    ctx.units.current_mut().block_new();

    for stmt in &module.stmts {
        lower_stmt(&mut ctx, stmt)?;
    }
    emit_implicit_return(&mut ctx, 0);

    let mut unit = ctx.units.exit_sub().expect("module unit was just entered");
    let qname = unit.qname.clone();
    let code = crate::assembler::assemble(&mut unit, level, Some(qname), None);
    verify_code(&code).map_err(|e| CompileError::Verification { message: e.to_string() })?;
    Ok(code)
}

/// If the current block doesn't already end in a terminal instruction, push
/// `nil` and return it — every `Code` object's control-flow must end in
/// `Ret`, `Panic`, or a threaded `Jmp`.
pub(crate) fn emit_implicit_return(ctx: &mut LowerCtx, line: u32) {
    let unit = ctx.units.current_mut();
    if unit.bb.check_last_instr(OpCode::Ret) {
        return;
    }
    unit.emit(OpCode::PshN, 0, None, line);
    unit.increment_stack(1);
    unit.emit(OpCode::Ret, 0, None, line);
    unit.decrement_stack(1);
}

/// Resolve `name` against the current unit's locals, the enclosing-unit
/// capture chain, and finally the global table, emitting the matching load
/// instruction. Shared by [`expr::lower_expr`]'s `Ident` case and by
/// closure creation, which re-resolves each of its captured names at the
/// enclosing unit's level.
pub(crate) fn load_var(ctx: &mut LowerCtx, name: &str, line: u32) -> CompileResult<()> {
    if let Some(sym) = ctx.units.current().symt.lookup(name) {
        if sym.id >= 0 {
            let id = sym.id as i32;
            let unit = ctx.units.current_mut();
            unit.emit(OpCode::LdLc, id, None, line);
            unit.increment_stack(1);
            return Ok(());
        }
    }

    if ctx.units.resolve(name).is_some() {
        let idx = enclosed_index(ctx, name);
        let unit = ctx.units.current_mut();
        unit.emit(OpCode::LdEnc, idx as i32, None, line);
        unit.increment_stack(1);
        return Ok(());
    }

    let idx = global_index(ctx, name);
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::LdGbl, idx as i32, None, line);
    unit.increment_stack(1);
    Ok(())
}

/// Store the top-of-stack value into `name`, resolving it the same way
/// [`load_var`] does, then re-push it so assignment reads as an expression.
pub(crate) fn store_var(ctx: &mut LowerCtx, name: &str, line: u32) -> CompileResult<()> {
    if let Some(sym) = ctx.units.current().symt.lookup(name) {
        if sym.id >= 0 {
            let id = sym.id as i32;
            let unit = ctx.units.current_mut();
            unit.emit(OpCode::Dup, 0, None, line);
            unit.increment_stack(1);
            unit.emit(OpCode::StLc, id, None, line);
            unit.decrement_stack(1);
            return Ok(());
        }
    }

    if ctx.units.is_free_var(name) || ctx.units.resolve(name).is_some() {
        let idx = enclosed_index(ctx, name);
        let unit = ctx.units.current_mut();
        unit.emit(OpCode::Dup, 0, None, line);
        unit.increment_stack(1);
        unit.emit(OpCode::StEnc, idx as i32, None, line);
        unit.decrement_stack(1);
        return Ok(());
    }

    let idx = global_index(ctx, name);
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::Dup, 0, None, line);
    unit.increment_stack(1);
    unit.emit(OpCode::StGbl, idx as i32, None, line);
    unit.decrement_stack(1);
    Ok(())
}

/// Position of `name` in the current unit's `enclosed` list, which
/// [`TranslationUnitStack::resolve`] populates lazily as names are captured.
fn enclosed_index(ctx: &mut LowerCtx, name: &str) -> usize {
    let unit = ctx.units.current_mut();
    match unit.enclosed.iter().position(|n| n == name) {
        Some(i) => i,
        None => {
            unit.enclosed.push(name.to_string());
            unit.enclosed.len() - 1
        }
    }
}

/// Position of `name` in the current unit's `names` (global-slot) table,
/// registering it on first reference.
fn global_index(ctx: &mut LowerCtx, name: &str) -> usize {
    let unit = ctx.units.current_mut();
    match unit.names.iter().position(|n| n == name) {
        Some(i) => i,
        None => {
            unit.names.push(name.to_string());
            unit.names.len() - 1
        }
    }
}

/// Declare a top-level `fn` through the global table rather than
/// [`crate::transl_unit::TranslationUnit::declare`]: by-value closure
/// capture (see [`stmt::lower_fn_decl`]) can't support a nested function
/// recursing through its own captured slot, since the slot snapshots `nil`
/// before the enclosing `StLc` ever runs. Globals are mutable shared state
/// visible the instant `StGbl` executes, so a self-call inside the body —
/// which resolves to nothing in any unit's symbol table and falls through
/// to this same global slot — sees the finished closure instead.
pub(crate) fn declare_top_level_fn(ctx: &mut LowerCtx, name: &str, line: u32) -> CompileResult<()> {
    let idx = global_index(ctx, name);
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::StGbl, idx as i32, None, line);
    unit.decrement_stack(1);
    Ok(())
}

/// Declare a nested `fn` in the enclosing scope (for lexical shadowing) and
/// store the freshly built closure into its local slot.
pub(crate) fn declare_nested_fn(ctx: &mut LowerCtx, name: &str, line: u32) -> CompileResult<()> {
    let slot = ctx.units.current_mut().declare(name, SymbolType::Nested)? as i32;
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::StLc, slot, None, line);
    unit.decrement_stack(1);
    Ok(())
}
