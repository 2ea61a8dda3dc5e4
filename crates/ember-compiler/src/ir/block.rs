//! Basic-block instruction graph.
//!
//! A translation unit never emits instructions into a flat byte buffer
//! directly. Control-flow constructs (`if`, loops, `switch`, `sync`, `trap`)
//! lower into basic blocks first; jump instructions carry a block reference
//! rather than a byte offset. The assembler (see `crate::assembler`) walks
//! the finished graph once, in emission order, to assign offsets and resolve
//! every jump's block reference to a concrete argument.
//!
//! Blocks and instructions live in one arena (`BasicBlockSeq`'s `Vec`s)
//! and are referenced by index instead of by pointer — an intrusive linked
//! list of heap nodes would force `unsafe` aliasing for no gain here;
//! `BasicBlockId` plays the role a block pointer otherwise would.

use ember_bytecode::OpCode;

/// Index of a basic block inside a [`BasicBlockSeq`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(pub u32);

impl BasicBlockId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// One not-yet-assembled instruction.
///
/// `oparg` is signed because some lowerings (e.g. a not-yet-known local
/// slot) stage a placeholder before patching it; the assembler always sees
/// a resolved non-negative value by the time it encodes the instruction.
#[derive(Debug, Clone)]
pub struct Instr {
    pub opcode: OpCode,
    pub oparg: i32,
    pub lineno: u32,
    /// Jump target, for instructions whose argument the assembler must
    /// rewrite to a byte offset rather than encode as given.
    pub jmp: Option<BasicBlockId>,
}

/// A straight-line run of instructions with no internal control flow.
///
/// Emission order is the block's position in `BasicBlockSeq::blocks`;
/// there is no intrusive `next` pointer to maintain.
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub(crate) instrs: Vec<Instr>,
    /// Byte offset assigned by the assembler; `None` until then.
    pub offset: Option<u32>,
}

impl BasicBlock {
    fn new() -> Self {
        Self::default()
    }

    /// The block's instructions in emission order.
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Assembled byte size of this block, once every instruction's
    /// opcode-indexed width is known.
    pub fn byte_size(&self) -> u32 {
        self.instrs
            .iter()
            .map(|i| ember_bytecode::offset_of(i.opcode) as u32)
            .sum()
    }

    pub fn last_opcode(&self) -> Option<OpCode> {
        self.instrs.last().map(|i| i.opcode)
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

/// Owning arena of basic blocks plus the "current" block new instructions
/// land in.
#[derive(Debug, Default)]
pub struct BasicBlockSeq {
    blocks: Vec<BasicBlock>,
    current: Option<BasicBlockId>,
}

impl BasicBlockSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new block and make it current, returning its id.
    pub fn block_new_append(&mut self) -> BasicBlockId {
        let id = BasicBlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new());
        self.current = Some(id);
        id
    }

    /// The block instructions are currently being appended to.
    pub fn current(&self) -> Option<BasicBlockId> {
        self.current
    }

    /// Make `id` the block new instructions land in, without allocating.
    /// Used when a lowering returns to a block it built earlier (e.g. the
    /// merge point after an `if`).
    pub fn set_current(&mut self, id: BasicBlockId) {
        debug_assert!(id.index() < self.blocks.len());
        self.current = Some(id);
    }

    /// Whether the current block's last instruction is `opcode` — used to
    /// skip emitting a redundant trailing jump when the block already ends
    /// in one.
    pub fn check_last_instr(&self, opcode: OpCode) -> bool {
        self.current
            .and_then(|id| self.blocks[id.index()].instrs.last())
            .is_some_and(|i| i.opcode == opcode)
    }

    /// Append an instruction to `dest`'s instruction list, recording `jmp`
    /// as the jump target if this is a jump instruction.
    pub fn add_instr_to(
        &mut self,
        dest: BasicBlockId,
        opcode: OpCode,
        arg: i32,
        lineno: u32,
        jmp: Option<BasicBlockId>,
    ) {
        self.blocks[dest.index()].instrs.push(Instr {
            opcode,
            oparg: arg,
            lineno,
            jmp,
        });
    }

    /// Append an instruction to the current block, allocating an entry
    /// block first if none exists yet.
    pub fn add_instr(&mut self, opcode: OpCode, arg: i32, lineno: u32) {
        self.add_instr_jmp(opcode, arg, lineno, None)
    }

    /// Append a jump instruction targeting `dest` to the current block.
    pub fn add_jump(&mut self, opcode: OpCode, dest: BasicBlockId, lineno: u32) {
        self.add_instr_jmp(opcode, 0, lineno, Some(dest))
    }

    fn add_instr_jmp(&mut self, opcode: OpCode, arg: i32, lineno: u32, jmp: Option<BasicBlockId>) {
        let current = self.current.unwrap_or_else(|| self.block_new_append());
        self.add_instr_to(current, opcode, arg, lineno, jmp);
    }

    pub fn get(&self, id: BasicBlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn get_mut(&mut self, id: BasicBlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Blocks in emission order, paired with their id.
    pub fn iter(&self) -> impl Iterator<Item = (BasicBlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BasicBlockId(i as u32), b))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::OpCode;

    #[test]
    fn appending_before_any_block_allocates_an_entry_block() {
        let mut seq = BasicBlockSeq::new();
        seq.add_instr(OpCode::Cnt, 0, 1);
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.get(BasicBlockId(0)).instrs().len(), 1);
    }

    #[test]
    fn check_last_instr_matches_the_current_blocks_tail() {
        let mut seq = BasicBlockSeq::new();
        seq.add_instr(OpCode::Cnt, 0, 1);
        assert!(seq.check_last_instr(OpCode::Cnt));
        assert!(!seq.check_last_instr(OpCode::Ret));
    }

    #[test]
    fn jump_instructions_carry_their_target_block_id() {
        let mut seq = BasicBlockSeq::new();
        let entry = seq.block_new_append();
        let target = seq.block_new_append();
        seq.set_current(entry);
        seq.add_jump(OpCode::Jmp, target, 3);
        let jmp = seq.get(entry).instrs()[0].jmp;
        assert_eq!(jmp, Some(target));
    }

    #[test]
    fn blocks_are_iterated_in_allocation_order() {
        let mut seq = BasicBlockSeq::new();
        let a = seq.block_new_append();
        let b = seq.block_new_append();
        let ids: Vec<_> = seq.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
