//! Jump-threading peephole: retarget a jump straight to its final
//! destination when the block it currently targets is empty or itself
//! begins with an unconditional jump.
//!
//! Runs at every level above [`super::OptimizationLevel::Off`].
//! `JEX`/`JNIL`/`JNN` are left alone — they're the exception-dispatch and
//! null-check/try-operator jump variants whose targets carry dispatch
//! semantics (`OpCode::is_unthreadable`).

use super::OptimizationLevel;
use crate::ir::{BasicBlockId, BasicBlockSeq};
use ember_bytecode::OpCode;

/// Follow `start` forward through empty blocks (by emission order, not by
/// the jump graph — an empty block simply falls through to its successor)
/// and then through any chain of blocks that open with an unconditional
/// `JMP`, stopping at the first block that does neither. Termination: each
/// step strictly advances either the block index (finite) or commits to a
/// non-jump block, so the walk can't cycle.
fn resolve(seq: &BasicBlockSeq, start: BasicBlockId) -> BasicBlockId {
    let mut current = start;
    loop {
        let block = seq.get(current);
        if block.is_empty() {
            let next = BasicBlockId(current.0 + 1);
            if (next.0 as usize) >= seq.len() {
                return current;
            }
            current = next;
            continue;
        }

        let head = &block.instrs()[0];
        if head.opcode != OpCode::Jmp {
            return current;
        }
        match head.jmp {
            Some(target) if target != current => current = target,
            _ => return current,
        }
    }
}

/// Retarget every threadable jump in `seq` to its final destination.
pub fn thread_jumps(seq: &mut BasicBlockSeq, level: OptimizationLevel) {
    if level == OptimizationLevel::Off {
        return;
    }

    let block_ids: Vec<BasicBlockId> = seq.iter().map(|(id, _)| id).collect();
    for id in block_ids {
        let instr_count = seq.get(id).instrs().len();
        for idx in 0..instr_count {
            let (opcode, jmp) = {
                let instr = &seq.get(id).instrs()[idx];
                (instr.opcode, instr.jmp)
            };
            if !opcode.is_jump() || opcode.is_unthreadable() {
                continue;
            }
            let Some(target) = jmp else { continue };
            let resolved = resolve(seq, target);
            if resolved != target {
                seq.get_mut(id).instrs[idx].jmp = Some(resolved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_through_an_empty_intermediate_block() {
        let mut seq = BasicBlockSeq::new();
        let entry = seq.block_new_append();
        let empty = seq.block_new_append();
        let real = seq.block_new_append();
        seq.set_current(real);
        seq.add_instr(OpCode::Ret, 0, 1);

        seq.set_current(entry);
        seq.add_jump(OpCode::Jmp, empty, 1);

        thread_jumps(&mut seq, OptimizationLevel::Soft);

        assert_eq!(seq.get(entry).instrs()[0].jmp, Some(real));
    }

    #[test]
    fn threads_through_a_chain_of_unconditional_jumps() {
        let mut seq = BasicBlockSeq::new();
        let entry = seq.block_new_append();
        let mid = seq.block_new_append();
        let end = seq.block_new_append();
        seq.set_current(end);
        seq.add_instr(OpCode::Ret, 0, 1);
        seq.set_current(mid);
        seq.add_jump(OpCode::Jmp, end, 1);
        seq.set_current(entry);
        seq.add_jump(OpCode::Jt, mid, 1);

        thread_jumps(&mut seq, OptimizationLevel::Soft);

        assert_eq!(seq.get(entry).instrs()[0].jmp, Some(end));
    }

    #[test]
    fn leaves_unthreadable_jumps_alone() {
        let mut seq = BasicBlockSeq::new();
        let entry = seq.block_new_append();
        let mid = seq.block_new_append();
        let end = seq.block_new_append();
        seq.set_current(end);
        seq.add_instr(OpCode::Ret, 0, 1);
        seq.set_current(mid);
        seq.add_jump(OpCode::Jmp, end, 1);
        seq.set_current(entry);
        seq.add_jump(OpCode::Jnil, mid, 1);

        thread_jumps(&mut seq, OptimizationLevel::Hard);

        assert_eq!(seq.get(entry).instrs()[0].jmp, Some(mid));
    }

    #[test]
    fn off_level_does_not_touch_the_graph() {
        let mut seq = BasicBlockSeq::new();
        let entry = seq.block_new_append();
        let mid = seq.block_new_append();
        let end = seq.block_new_append();
        seq.set_current(end);
        seq.add_instr(OpCode::Ret, 0, 1);
        seq.set_current(mid);
        seq.add_jump(OpCode::Jmp, end, 1);
        seq.set_current(entry);
        seq.add_jump(OpCode::Jmp, mid, 1);

        thread_jumps(&mut seq, OptimizationLevel::Off);

        assert_eq!(seq.get(entry).instrs()[0].jmp, Some(mid));
    }
}
