//! Statement lowering — control flow, declarations, and non-local exits.
//!
//! The backpatch pattern used by `If` and `Trap`: a block's final position
//! in the assembled `Code` is its allocation order, not the order its
//! contents are written in, so a jump whose target is "wherever the
//! skipped body ends" can't name that block until the body (and whatever
//! nested control flow it allocates) is fully lowered. Both constructs
//! emit the jump with a placeholder via
//! [`crate::transl_unit::TranslationUnit::emit_jump_placeholder`] and
//! resolve it once the target block exists.
//!
//! `While` has no such dependency — every transition in a loop (the head's
//! conditional exit, the back-edge, `break`, `continue`) is an explicit
//! jump, so its exit block can be pre-allocated before the body is lowered.

use super::{declare_nested_fn, declare_top_level_fn, emit_implicit_return, load_var, LowerCtx};
use crate::error::{CompileError, CompileResult};
use crate::ir::JBlockType;
use crate::symtab::SymbolType;
use ember_bytecode::{Constant, OpCode};
use ember_parser::ast::{Expr, FnDecl, Stmt};
use std::sync::Arc;

/// Lower one statement. Every case leaves the evaluation stack at the depth
/// it found it — declarations and control flow consume whatever they push.
pub fn lower_stmt(ctx: &mut LowerCtx, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
        Stmt::Let { name, value, line } => lower_binding(ctx, name, value, SymbolType::Constant, *line),
        Stmt::Var { name, value, line } => lower_binding(ctx, name, value, SymbolType::Variable, *line),
        Stmt::Expr(e) => {
            super::lower_expr(ctx, e)?;
            ctx.units.current_mut().emit_pop(e.line());
            Ok(())
        }
        Stmt::Block(stmts) => lower_block(ctx, stmts),
        Stmt::If { cond, then_branch, else_branch, line } => {
            lower_if(ctx, cond, then_branch, else_branch.as_deref(), *line)
        }
        Stmt::While { label, cond, body, line } => lower_while(ctx, label.clone(), cond, body, *line),
        Stmt::Break { label, line } => lower_break(ctx, label.as_deref(), *line),
        Stmt::Continue { label, line } => lower_continue(ctx, label.as_deref(), *line),
        Stmt::Return { value, line } => lower_return(ctx, value.as_ref(), *line),
        Stmt::Sync { on, body, line } => lower_sync(ctx, on, body, *line),
        Stmt::Trap { body, line } => lower_trap(ctx, body, *line),
        Stmt::Panic { value, line } => lower_panic(ctx, value, *line),
        Stmt::Defer { callee, args, line } => lower_defer(ctx, callee, args, *line),
        Stmt::Fn(decl) => lower_fn_decl(ctx, decl),
    }
}

fn lower_binding(ctx: &mut LowerCtx, name: &str, value: &Expr, ty: SymbolType, line: u32) -> CompileResult<()> {
    super::lower_expr(ctx, value)?;
    check_local_capacity(ctx)?;
    let slot = ctx.units.current_mut().declare(name, ty)? as i32;
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::StLc, slot, None, line);
    unit.decrement_stack(1);
    Ok(())
}

fn lower_block(ctx: &mut LowerCtx, stmts: &[Stmt]) -> CompileResult<()> {
    ctx.units.current_mut().enter_sub();
    for s in stmts {
        lower_stmt(ctx, s)?;
    }
    ctx.units.current_mut().exit_sub();
    Ok(())
}

fn lower_if(
    ctx: &mut LowerCtx,
    cond: &Expr,
    then_branch: &[Stmt],
    else_branch: Option<&[Stmt]>,
    line: u32,
) -> CompileResult<()> {
    super::lower_expr(ctx, cond)?;
    let unit = ctx.units.current_mut();
    let (jf_block, jf_idx) = unit.emit_jump_placeholder(OpCode::Jf, line);
    unit.decrement_stack(1);
    unit.block_new();

    ctx.units.current_mut().enter_sub();
    for s in then_branch {
        lower_stmt(ctx, s)?;
    }
    ctx.units.current_mut().exit_sub();

    match else_branch {
        Some(else_stmts) => {
            let unit = ctx.units.current_mut();
            let (jmp_block, jmp_idx) = unit.emit_jump_placeholder(OpCode::Jmp, line);
            let else_block = unit.block_new();
            ctx.units.current_mut().patch_jump(jf_block, jf_idx, else_block);

            ctx.units.current_mut().enter_sub();
            for s in else_stmts {
                lower_stmt(ctx, s)?;
            }
            ctx.units.current_mut().exit_sub();

            let unit = ctx.units.current_mut();
            let end_block = unit.block_new();
            unit.patch_jump(jmp_block, jmp_idx, end_block);
        }
        None => {
            let unit = ctx.units.current_mut();
            let end_block = unit.block_new();
            unit.patch_jump(jf_block, jf_idx, end_block);
        }
    }
    Ok(())
}

fn lower_while(ctx: &mut LowerCtx, label: Option<String>, cond: &Expr, body: &[Stmt], line: u32) -> CompileResult<()> {
    let head_block = ctx.units.current_mut().block_new();
    super::lower_expr(ctx, cond)?;

    let unit = ctx.units.current_mut();
    let (exit_jf_block, exit_jf_idx) = unit.emit_jump_placeholder(OpCode::Jf, line);
    unit.decrement_stack(1);

    let body_block = unit.block_new();
    let exit_block = unit.block_new();
    ctx.units.current_mut().block_append(body_block);

    ctx.units.current_mut().jb_push(label, head_block, exit_block, JBlockType::Loop);
    ctx.units.current_mut().enter_sub();
    for s in body {
        lower_stmt(ctx, s)?;
    }
    ctx.units.current_mut().exit_sub();

    let unit = ctx.units.current_mut();
    unit.emit(OpCode::Jmp, 0, Some(head_block), line);
    unit.jb_pop();
    unit.patch_jump(exit_jf_block, exit_jf_idx, exit_block);
    unit.block_append(exit_block);
    Ok(())
}

/// Emit the `Unsync` instructions a non-local exit needs to release `count`
/// currently-held `sync` locks, innermost first, without disturbing the
/// unit's lexical `sync_stack` depth counter — the lexical nesting is still
/// open for whatever code the fallthrough path reaches next.
fn unwind_sync(ctx: &mut LowerCtx, count: u16, line: u32) {
    let unit = ctx.units.current_mut();
    let mut depth = unit.sync_stack.current;
    for _ in 0..count {
        depth -= 1;
        unit.emit(OpCode::Unsync, depth as i32, None, line);
    }
}

fn lower_break(ctx: &mut LowerCtx, label: Option<&str>, line: u32) -> CompileResult<()> {
    let (end, pops) = {
        let unit = ctx.units.current();
        let (target, pops) = unit.jb_find_label(label).ok_or(CompileError::InvalidBreak)?;
        (target.end, pops)
    };
    unwind_sync(ctx, pops, line);
    ctx.units.current_mut().emit(OpCode::Jmp, 0, Some(end), line);
    Ok(())
}

fn lower_continue(ctx: &mut LowerCtx, label: Option<&str>, line: u32) -> CompileResult<()> {
    let (begin, pops) = {
        let unit = ctx.units.current();
        let (target, pops) = unit.jb_find_label(label).ok_or(CompileError::InvalidContinue)?;
        (target.begin, pops)
    };
    unwind_sync(ctx, pops, line);
    ctx.units.current_mut().emit(OpCode::Jmp, 0, Some(begin), line);
    Ok(())
}

fn lower_return(ctx: &mut LowerCtx, value: Option<&Expr>, line: u32) -> CompileResult<()> {
    match value {
        Some(e) => super::lower_expr(ctx, e)?,
        None => {
            let unit = ctx.units.current_mut();
            unit.emit(OpCode::PshN, 1, None, line);
            unit.increment_stack(1);
        }
    }
    let open_syncs = ctx.units.current().sync_stack.current as u16;
    unwind_sync(ctx, open_syncs, line);
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::Ret, 0, None, line);
    unit.decrement_stack(1);
    Ok(())
}

fn lower_sync(ctx: &mut LowerCtx, on: &Expr, body: &[Stmt], line: u32) -> CompileResult<()> {
    // A literal has no stable identity for the monitor table to key on.
    if matches!(on, Expr::Literal(..)) {
        return Err(CompileError::SyncOnLiteral);
    }
    super::lower_expr(ctx, on)?;
    let unit = ctx.units.current_mut();
    unit.enter_sync(line);
    unit.decrement_stack(1);
    let here = unit.bb.current().expect("enter_sync leaves a block open");
    unit.jb_push(None, here, here, JBlockType::Sync);
    unit.jblock.top_mut().expect("just pushed").pops = 1;

    ctx.units.current_mut().enter_sub();
    for s in body {
        lower_stmt(ctx, s)?;
    }
    ctx.units.current_mut().exit_sub();

    let unit = ctx.units.current_mut();
    unit.jb_pop();
    unit.exit_sync(line);
    Ok(())
}

fn lower_trap(ctx: &mut LowerCtx, body: &[Stmt], line: u32) -> CompileResult<()> {
    let unit = ctx.units.current_mut();
    let (trap_site_block, trap_site_idx) = unit.emit_jump_placeholder(OpCode::Trap, line);
    unit.block_new();

    ctx.units.current_mut().enter_sub();
    for s in body {
        lower_stmt(ctx, s)?;
    }
    ctx.units.current_mut().exit_sub();

    let unit = ctx.units.current_mut();
    // The body finished without panicking; uninstall the handler so a later
    // panic in this frame doesn't jump back into it.
    unit.emit(OpCode::Trap, ember_bytecode::TRAP_CLEAR as i32, None, line);
    let (skip_block, skip_idx) = unit.emit_jump_placeholder(OpCode::Jmp, line);
    let handler_block = unit.block_new();
    ctx.units.current_mut().patch_jump(trap_site_block, trap_site_idx, handler_block);

    // `raise` pushes the panic value onto the eval stack out of band before
    // jumping here; no instruction caused it, so the stack counter has to
    // be told about it by hand. This minimal `trap` has no catch-binding
    // syntax, so the value is discarded immediately.
    let unit = ctx.units.current_mut();
    unit.increment_stack(1);
    unit.emit_pop(line);

    let end_block = unit.block_new();
    ctx.units.current_mut().patch_jump(skip_block, skip_idx, end_block);
    Ok(())
}

fn lower_panic(ctx: &mut LowerCtx, value: &Expr, line: u32) -> CompileResult<()> {
    super::lower_expr(ctx, value)?;
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::Panic, 0, None, line);
    unit.decrement_stack(1);
    Ok(())
}

fn lower_defer(ctx: &mut LowerCtx, callee: &Expr, args: &[Expr], line: u32) -> CompileResult<()> {
    if args.len() > 255 {
        return Err(CompileError::TooManyParameters);
    }
    super::lower_expr(ctx, callee)?;
    for arg in args {
        super::lower_expr(ctx, arg)?;
    }
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::Dfr, args.len() as i32, None, line);
    unit.decrement_stack(args.len() as u32 + 1);
    Ok(())
}

/// Closure creation. `MkFn` builds the closure from a `Code` object sitting
/// in the *enclosing* unit's own static pool plus a snapshot of its
/// captured names' current values — not cells, so a nested closure that
/// calls itself by name to recurse would capture `nil` (its own binding
/// doesn't exist yet at the moment `MkFn` snapshots its captures). Top-level
/// functions sidestep this entirely by going through the global table
/// (see [`super::declare_top_level_fn`]), which recursion resolves through
/// naturally since a self-call inside the body finds nothing in any unit's
/// symbol table and falls through to the same mutable global slot.
/// Self-recursive nested closures remain unsupported under this capture
/// model.
fn lower_fn_decl(ctx: &mut LowerCtx, decl: &FnDecl) -> CompileResult<()> {
    if decl.params.len() > 255 {
        return Err(CompileError::TooManyParameters);
    }
    let is_top_level = ctx.units.depth() == 1;
    let qname = format!("{}.{}", ctx.units.current().qname, decl.name);

    ctx.units.enter_sub(decl.name.clone(), qname);
    {
        let unit = ctx.units.current_mut();
        unit.block_new();
    }
    for p in &decl.params {
        check_local_capacity(ctx)?;
        ctx.units.current_mut().lnames.push(p.clone());
        ctx.units.current_mut().declare(p, SymbolType::Variable)?;
    }
    for s in &decl.body {
        lower_stmt(ctx, s)?;
    }
    emit_implicit_return(ctx, decl.line);

    let mut nested_unit = ctx.units.exit_sub().expect("just entered above");
    let nested_enclosed = nested_unit.enclosed.clone();
    if nested_enclosed.len() > 4095 {
        return Err(CompileError::TooManyLocals);
    }
    let nested_qname = nested_unit.qname.clone();
    let code = crate::assembler::assemble(&mut nested_unit, ctx.level, Some(nested_qname), None);
    ember_bytecode::verify_code(&code).map_err(|e| CompileError::Verification { message: e.to_string() })?;

    let const_idx = {
        let enclosing = ctx.units.current_mut();
        enclosing.add_static(Constant::Code(Arc::new(code)))
    };
    if const_idx > 0xFFF {
        return Err(CompileError::TooManyConstants);
    }

    for name in &nested_enclosed {
        load_var(ctx, name, decl.line)?;
    }

    let packed = (const_idx & 0xFFF) | ((nested_enclosed.len() as u32) << 12);
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::MkFn, packed as i32, None, decl.line);
    unit.decrement_stack(nested_enclosed.len() as u32);
    unit.increment_stack(1);

    if is_top_level {
        declare_top_level_fn(ctx, &decl.name, decl.line)
    } else {
        check_local_capacity(ctx)?;
        declare_nested_fn(ctx, &decl.name, decl.line)
    }
}

/// `TranslationUnit::declare` narrows the next local slot to `i16`; catch an
/// overflow here; before it would silently wrap.
fn check_local_capacity(ctx: &LowerCtx) -> CompileResult<()> {
    if ctx.units.current().local.current >= i16::MAX as u32 {
        return Err(CompileError::TooManyLocals);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transl_unit::TranslationUnitStack;
    use ember_parser::ast::Literal;

    fn ctx() -> LowerCtx {
        let mut units = TranslationUnitStack::new();
        units.enter_sub("m", "m");
        units.current_mut().block_new();
        LowerCtx {
            units,
            level: crate::optimize::OptimizationLevel::Off,
        }
    }

    fn lit(i: i64) -> Expr {
        Expr::Literal(Literal::Int(i), 1)
    }

    #[test]
    fn a_let_binding_leaves_the_stack_empty_after_storing() {
        let mut ctx = ctx();
        lower_stmt(&mut ctx, &Stmt::Let { name: "x".into(), value: lit(1), line: 1 }).unwrap();
        assert_eq!(ctx.units.current().stack.current, 0);
        assert_eq!(ctx.units.current().local.current, 1);
    }

    #[test]
    fn an_if_with_no_else_produces_three_blocks() {
        let mut ctx = ctx();
        let stmt = Stmt::If {
            cond: lit(1),
            then_branch: vec![Stmt::Expr(lit(2))],
            else_branch: None,
            line: 1,
        };
        lower_stmt(&mut ctx, &stmt).unwrap();
        assert_eq!(ctx.units.current().bb.len(), 3);
        assert_eq!(ctx.units.current().stack.current, 0);
    }

    #[test]
    fn an_if_else_produces_four_blocks() {
        let mut ctx = ctx();
        let stmt = Stmt::If {
            cond: lit(1),
            then_branch: vec![Stmt::Expr(lit(2))],
            else_branch: Some(vec![Stmt::Expr(lit(3))]),
            line: 1,
        };
        lower_stmt(&mut ctx, &stmt).unwrap();
        assert_eq!(ctx.units.current().bb.len(), 4);
    }

    #[test]
    fn a_while_loop_ends_with_the_stack_back_at_zero() {
        let mut ctx = ctx();
        let stmt = Stmt::While {
            label: None,
            cond: lit(1),
            body: vec![Stmt::Break { label: None, line: 1 }],
            line: 1,
        };
        lower_stmt(&mut ctx, &stmt).unwrap();
        assert_eq!(ctx.units.current().stack.current, 0);
    }

    #[test]
    fn break_outside_a_loop_is_a_compile_error() {
        let mut ctx = ctx();
        let err = lower_stmt(&mut ctx, &Stmt::Break { label: None, line: 1 }).unwrap_err();
        assert!(matches!(err, CompileError::InvalidBreak));
    }

    #[test]
    fn a_labelled_break_never_resolves_since_while_never_defines_a_label() {
        let mut ctx = ctx();
        let stmt = Stmt::While {
            label: None,
            cond: lit(1),
            body: vec![Stmt::Break { label: Some("outer".into()), line: 1 }],
            line: 1,
        };
        let err = lower_stmt(&mut ctx, &stmt).unwrap_err();
        assert!(matches!(err, CompileError::InvalidBreak));
    }

    #[test]
    fn a_top_level_fn_declaration_stores_through_the_global_table() {
        let mut ctx = ctx();
        let decl = FnDecl {
            name: "f".into(),
            params: vec![],
            body: vec![Stmt::Return { value: Some(lit(1)), line: 1 }],
            line: 1,
        };
        lower_stmt(&mut ctx, &Stmt::Fn(decl)).unwrap();
        assert_eq!(ctx.units.current().names, vec!["f".to_string()]);
        assert_eq!(ctx.units.current().stack.current, 0);
    }

    #[test]
    fn a_closure_capturing_an_outer_local_threads_it_through_enclosed() {
        let mut ctx = ctx();
        lower_stmt(&mut ctx, &Stmt::Let { name: "x".into(), value: lit(1), line: 1 }).unwrap();
        let decl = FnDecl {
            name: "inner".into(),
            params: vec![],
            body: vec![Stmt::Return { value: Some(Expr::Ident("x".into(), 2)), line: 2 }],
            line: 2,
        };
        lower_stmt(&mut ctx, &Stmt::Fn(decl)).unwrap();
        assert_eq!(ctx.units.current().stack.current, 0);
    }

    #[test]
    fn a_sync_block_pairs_its_sync_and_unsync_at_the_same_slot() {
        let mut ctx = ctx();
        let stmt = Stmt::Sync {
            on: Expr::Ident("lock".into(), 1),
            body: vec![Stmt::Expr(lit(2))],
            line: 1,
        };
        lower_stmt(&mut ctx, &stmt).unwrap();
        assert_eq!(ctx.units.current().sync_stack.current, 0);
        assert_eq!(ctx.units.current().stack.current, 0);
    }

    #[test]
    fn sync_on_a_literal_is_a_compile_error() {
        let mut ctx = ctx();
        let stmt = Stmt::Sync {
            on: lit(1),
            body: vec![],
            line: 1,
        };
        let err = lower_stmt(&mut ctx, &stmt).unwrap_err();
        assert!(matches!(err, CompileError::SyncOnLiteral));
    }

    #[test]
    fn a_trap_block_discards_the_implicitly_pushed_panic_value() {
        let mut ctx = ctx();
        let stmt = Stmt::Trap {
            body: vec![Stmt::Expr(lit(1))],
            line: 1,
        };
        lower_stmt(&mut ctx, &stmt).unwrap();
        assert_eq!(ctx.units.current().stack.current, 0);
        assert_eq!(ctx.units.current().bb.len(), 4);
    }

    #[test]
    fn a_defer_statement_pops_the_callee_and_every_argument() {
        let mut ctx = ctx();
        let stmt = Stmt::Defer {
            callee: Expr::Ident("f".into(), 1),
            args: vec![lit(1), lit(2)],
            line: 1,
        };
        lower_stmt(&mut ctx, &stmt).unwrap();
        assert_eq!(ctx.units.current().stack.current, 0);
    }
}
