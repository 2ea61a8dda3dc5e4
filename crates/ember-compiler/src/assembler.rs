//! Assembler: turns a translation unit's optimised basic-block graph into a
//! sealed [`ember_bytecode::Code`] object.
//!
//! Three passes over the block sequence: walk blocks in emission order
//! assigning byte offsets, walk again resolving every jump's block
//! reference to its target's offset and re-encoding the instruction, then
//! emit the resolved bytes and the run-length-encoded line table in one
//! final pass.

use crate::ir::BasicBlockId;
use crate::optimize::{thread_jumps, OptimizationLevel};
use crate::transl_unit::TranslationUnit;
use ember_bytecode::{encode_instr, offset_of, Code, CodeBuilder, LineTable};

/// Assemble `unit` into a sealed `Code` object at the given optimisation
/// level. Consumes the unit's basic-block graph; everything else
/// (`statics`, `names`, `lnames`, `enclosed`) is cloned onto the builder
/// as-is.
pub fn assemble(
    unit: &mut TranslationUnit,
    level: OptimizationLevel,
    qualified_name: Option<String>,
    docstring: Option<String>,
) -> Code {
    thread_jumps(&mut unit.bb, level);

    let mut offsets: Vec<u32> = Vec::with_capacity(unit.bb.len());
    let mut offset = 0u32;
    for (_, block) in unit.bb.iter() {
        offsets.push(offset);
        offset += block.byte_size();
    }

    let mut bytes = Vec::new();
    let mut line_table = LineTable::new();
    let mut cursor = 0u32;
    for (_, block) in unit.bb.iter() {
        for instr in block.instrs() {
            line_table.record(cursor, instr.lineno);

            let arg = match instr.jmp {
                Some(BasicBlockId(target)) => offsets[target as usize],
                None => instr.oparg as u32,
            };
            encode_instr(&mut bytes, instr.opcode, arg & 0x00FF_FFFF);

            cursor += offset_of(instr.opcode) as u32;
        }
    }

    let mut builder = CodeBuilder::new();
    builder.extend_instructions(&bytes);
    for constant in unit.statics.drain(..) {
        builder.add_static(constant);
    }
    builder.set_requirements(unit.stack.required, unit.local.required, unit.sync_stack.required);
    builder.set_globals(unit.names.clone());
    builder.set_params(unit.lnames.clone());
    builder.set_enclosed(unit.enclosed.clone());
    builder.set_line_table(line_table);
    builder.set_names(qualified_name, docstring);
    builder.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::{decode_instr, Constant, OpCode};

    #[test]
    fn resolves_a_forward_jump_to_its_targets_byte_offset() {
        let mut unit = TranslationUnit::new("f", "m.f");
        let entry = unit.block_new();
        let target = unit.block_new();

        unit.block_append(entry);
        unit.emit(OpCode::Jmp, 0, Some(target), 1);

        unit.block_append(target);
        unit.emit(OpCode::Ret, 0, None, 2);

        let code = assemble(&mut unit, OptimizationLevel::Off, None, None);

        let (op, arg, next) = decode_instr(code.instructions(), 0).unwrap();
        assert_eq!(op, OpCode::Jmp);
        // JMP (4 bytes) precedes RET, so the target offset is 4.
        assert_eq!(arg, 4);
        assert_eq!(next, 4);

        let (op, _, _) = decode_instr(code.instructions(), 4).unwrap();
        assert_eq!(op, OpCode::Ret);
    }

    #[test]
    fn records_stack_and_local_requirements() {
        let mut unit = TranslationUnit::new("f", "m.f");
        unit.increment_stack(3);
        unit.local.required = 2;
        unit.block_new();
        unit.emit(OpCode::Ret, 0, None, 1);

        let code = assemble(&mut unit, OptimizationLevel::Off, None, None);
        assert_eq!(code.stack_sz, 3);
        assert_eq!(code.locals_sz, 2);
    }

    #[test]
    fn threads_jumps_before_assembling_when_optimising() {
        let mut unit = TranslationUnit::new("f", "m.f");
        let entry = unit.block_new();
        let mid = unit.block_new();
        let end = unit.block_new();

        unit.block_append(end);
        unit.emit(OpCode::Ret, 0, None, 3);

        unit.block_append(mid);
        unit.emit(OpCode::Jmp, 0, Some(end), 2);

        unit.block_append(entry);
        unit.emit(OpCode::Jmp, 0, Some(mid), 1);

        let code = assemble(&mut unit, OptimizationLevel::Soft, None, None);

        let (_, arg, _) = decode_instr(code.instructions(), 0).unwrap();
        // entry's jump should land directly on `end`'s offset, past the
        // two 4-byte JMPs that entry and mid emit.
        let end_offset = 2 * offset_of(OpCode::Jmp) as u32;
        assert_eq!(arg, end_offset);
    }

    #[test]
    fn carries_statics_and_names_onto_the_sealed_code() {
        let mut unit = TranslationUnit::new("f", "m.f");
        unit.add_static(Constant::Int(42));
        unit.names.push("g".into());
        unit.lnames.push("p".into());
        unit.block_new();
        unit.emit(OpCode::Ret, 0, None, 1);

        let code = assemble(&mut unit, OptimizationLevel::Off, Some("m.f".into()), None);
        assert_eq!(code.statics, vec![Constant::Int(42)]);
        assert_eq!(code.globals, vec!["g".to_string()]);
        assert_eq!(code.params, vec!["p".to_string()]);
        assert_eq!(code.qualified_name.as_deref(), Some("m.f"));
    }
}
