//! Expression lowering — every case leaves exactly one value on the
//! evaluation stack.

use super::{load_var, store_var, LowerCtx};
use crate::error::{CompileError, CompileResult};
use ember_bytecode::{Constant, OpCode};
use ember_parser::ast::{BinOp, Expr, Literal, UnOp};

/// Lower `expr`, leaving its value on top of the evaluation stack.
pub fn lower_expr(ctx: &mut LowerCtx, expr: &Expr) -> CompileResult<()> {
    match expr {
        Expr::Literal(lit, line) => lower_literal(ctx, lit, *line),
        Expr::Ident(name, line) => load_var(ctx, name, *line),
        Expr::Unary { op, operand, line } => lower_unary(ctx, *op, operand, *line),
        Expr::Binary { op, left, right, line } => lower_binary(ctx, *op, left, right, *line),
        Expr::Assign { name, value, line } => {
            lower_expr(ctx, value)?;
            store_var(ctx, name, *line)
        }
        Expr::Call { callee, args, line } => lower_call(ctx, OpCode::Call, callee, args, *line),
        Expr::Spawn { callee, args, line } => lower_call(ctx, OpCode::Spw, callee, args, *line),
        Expr::Await { operand, line } => {
            lower_expr(ctx, operand)?;
            let unit = ctx.units.current_mut();
            unit.emit(OpCode::Await, 0, None, *line);
            Ok(())
        }
    }
}

fn lower_literal(ctx: &mut LowerCtx, lit: &Literal, line: u32) -> CompileResult<()> {
    let unit = ctx.units.current_mut();
    match lit {
        Literal::Nil => {
            unit.emit(OpCode::PshN, 1, None, line);
        }
        Literal::Bool(b) => {
            let slot = unit.add_static(Constant::Bool(*b));
            unit.emit(OpCode::PshC, slot as i32, None, line);
        }
        Literal::Int(i) => {
            let slot = unit.add_static(Constant::Int(*i));
            unit.emit(OpCode::PshC, slot as i32, None, line);
        }
        Literal::Float(f) => {
            let slot = unit.add_static(Constant::Float(*f));
            unit.emit(OpCode::PshC, slot as i32, None, line);
        }
        Literal::Str(s) => {
            let slot = unit.add_static(Constant::Str(s.clone()));
            unit.emit(OpCode::PshC, slot as i32, None, line);
        }
    }
    unit.increment_stack(1);
    Ok(())
}

fn lower_unary(ctx: &mut LowerCtx, op: UnOp, operand: &Expr, line: u32) -> CompileResult<()> {
    lower_expr(ctx, operand)?;
    let unit = ctx.units.current_mut();
    let opcode = match op {
        UnOp::Neg => OpCode::Neg,
        UnOp::Not => OpCode::Not,
    };
    unit.emit(opcode, 0, None, line);
    Ok(())
}

/// `and`/`or` short-circuit by branching rather than by combining two
/// already-evaluated operands, so they're lowered separately from the
/// other binary operators below.
fn lower_binary(ctx: &mut LowerCtx, op: BinOp, left: &Expr, right: &Expr, line: u32) -> CompileResult<()> {
    if matches!(op, BinOp::And | BinOp::Or) {
        return lower_short_circuit(ctx, op, left, right, line);
    }

    lower_expr(ctx, left)?;
    lower_expr(ctx, right)?;
    let unit = ctx.units.current_mut();
    unit.decrement_stack(1);
    match op {
        BinOp::Add => unit.emit(OpCode::Add, 0, None, line),
        BinOp::Sub => unit.emit(OpCode::Sub, 0, None, line),
        BinOp::Mul => unit.emit(OpCode::Mul, 0, None, line),
        BinOp::Div => unit.emit(OpCode::Div, 0, None, line),
        BinOp::Mod => unit.emit(OpCode::Mod, 0, None, line),
        BinOp::Eq => unit.emit(OpCode::EqSt, 0, None, line),
        BinOp::Ne => {
            unit.emit(OpCode::EqSt, 0, None, line);
            unit.emit(OpCode::Not, 0, None, line);
        }
        // `compare`'s mode argument: 0 eq, 1 ne, 2 lt, 3 le, 4 gt, 5 ge.
        BinOp::Lt => unit.emit(OpCode::Cmp, 2, None, line),
        BinOp::Le => unit.emit(OpCode::Cmp, 3, None, line),
        BinOp::Gt => unit.emit(OpCode::Cmp, 4, None, line),
        BinOp::Ge => unit.emit(OpCode::Cmp, 5, None, line),
        BinOp::And | BinOp::Or => unreachable!("handled by lower_short_circuit above"),
    }
    Ok(())
}

/// `left and right` → evaluate `left`; if false, skip `right` and keep
/// `left`'s (falsy) value. `left or right` is the mirror image. Both leave
/// exactly one value on the stack either way, so no operand needs an extra
/// pop to balance the branch not taken.
fn lower_short_circuit(ctx: &mut LowerCtx, op: BinOp, left: &Expr, right: &Expr, line: u32) -> CompileResult<()> {
    lower_expr(ctx, left)?;
    let unit = ctx.units.current_mut();
    unit.emit(OpCode::Dup, 0, None, line);
    unit.increment_stack(1);

    let jump_op = if op == BinOp::And { OpCode::Jf } else { OpCode::Jt };
    let (site_block, site_idx) = unit.emit_jump_placeholder(jump_op, line);
    unit.decrement_stack(1);

    // Dup's copy survived the branch-not-taken path; discard it before
    // falling through to evaluate the other operand.
    unit.emit_pop(line);
    lower_expr(ctx, right)?;

    let unit = ctx.units.current_mut();
    let (skip_block, skip_idx) = unit.emit_jump_placeholder(OpCode::Jmp, line);
    let end_block = unit.block_new();
    unit.patch_jump(site_block, site_idx, end_block);
    unit.block_append(end_block);
    let unit = ctx.units.current_mut();
    unit.patch_jump(skip_block, skip_idx, end_block);
    Ok(())
}

/// Lower a call-family expression: the callee pushes first, then each
/// argument left to right, matching `pop_call_args`' expectation that the
/// callable sits below its arguments on the stack.
fn lower_call(ctx: &mut LowerCtx, opcode: OpCode, callee: &Expr, args: &[Expr], line: u32) -> CompileResult<()> {
    if args.len() > 255 {
        return Err(CompileError::TooManyParameters);
    }
    lower_expr(ctx, callee)?;
    for arg in args {
        lower_expr(ctx, arg)?;
    }
    let unit = ctx.units.current_mut();
    unit.emit(opcode, args.len() as i32, None, line);
    unit.decrement_stack(args.len() as u32);
    Ok(())
}
