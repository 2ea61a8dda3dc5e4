//! The ember instruction set.
//!
//! Every instruction carries an opcode byte, a 24-bit argument, a source line,
//! and (before assembly) an optional basic-block pointer standing in for the
//! jump target. On the wire the argument width is not inferred from its
//! value — it is looked up per-opcode in the [`offset_of`] width table.

use std::fmt;

/// One ember bytecode opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // --- arithmetic / numeric ---
    Add = 0x00,
    Sub = 0x01,
    Mul = 0x02,
    Div = 0x03,
    IDiv = 0x04,
    Mod = 0x05,
    Shl = 0x06,
    Shr = 0x07,
    Inc = 0x08,
    Dec = 0x09,
    IpAdd = 0x0A,
    IpSub = 0x0B,
    Neg = 0x0C,
    Pos = 0x0D,

    // --- comparison / logical ---
    Cmp = 0x10,
    EqSt = 0x11,
    Land = 0x12,
    Lor = 0x13,
    Lxor = 0x14,
    Not = 0x15,
    Inv = 0x16,

    // --- variable access ---
    LdGbl = 0x20,
    StGbl = 0x21,
    LdLc = 0x22,
    StLc = 0x23,
    LdEnc = 0x24,
    StEnc = 0x25,
    LdScope = 0x26,
    StScope = 0x27,
    LdAttr = 0x28,
    StAttr = 0x29,
    LdMeth = 0x2A,
    NgV = 0x2B,
    LStatic = 0x2C,

    // --- control flow ---
    Jmp = 0x30,
    Jt = 0x31,
    Jf = 0x32,
    Jex = 0x33,
    Jfop = 0x34,
    Jtop = 0x35,
    Jnil = 0x36,
    Jnn = 0x37,

    // --- container construction ---
    MkLt = 0x40,
    MkSt = 0x41,
    MkTp = 0x42,
    MkDt = 0x43,
    MkBnd = 0x44,
    MkFn = 0x45,
    MkStruct = 0x46,
    MkTrait = 0x47,

    // --- iteration ---
    LdIter = 0x50,
    Nxt = 0x51,

    // --- call protocol ---
    Call = 0x60,
    Dfr = 0x61,
    Spw = 0x62,
    Yld = 0x63,
    Await = 0x64,
    Ret = 0x65,
    Mth = 0x66,
    Init = 0x67,

    // --- safety ---
    Sync = 0x70,
    Unsync = 0x71,
    Trap = 0x72,
    Panic = 0x73,

    // --- stack manipulation ---
    Dup = 0x80,
    Pop = 0x81,
    PopC = 0x82,
    PopGt = 0x83,
    PshC = 0x84,
    PshN = 0x85,
    Unpack = 0x86,

    // --- module / import ---
    ImpMod = 0x90,
    ImpFrm = 0x91,
    ImpAll = 0x92,

    // --- misc ---
    Cnt = 0xA0,
    Extd = 0xA1,
}

/// Error raised when a raw byte does not name a known opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid opcode byte: 0x{0:02x}")]
pub struct InvalidOpcode(pub u8);

impl OpCode {
    /// Decode a raw instruction byte into an [`OpCode`].
    pub fn from_byte(byte: u8) -> Result<Self, InvalidOpcode> {
        use OpCode::*;
        Ok(match byte {
            0x00 => Add,
            0x01 => Sub,
            0x02 => Mul,
            0x03 => Div,
            0x04 => IDiv,
            0x05 => Mod,
            0x06 => Shl,
            0x07 => Shr,
            0x08 => Inc,
            0x09 => Dec,
            0x0A => IpAdd,
            0x0B => IpSub,
            0x0C => Neg,
            0x0D => Pos,
            0x10 => Cmp,
            0x11 => EqSt,
            0x12 => Land,
            0x13 => Lor,
            0x14 => Lxor,
            0x15 => Not,
            0x16 => Inv,
            0x20 => LdGbl,
            0x21 => StGbl,
            0x22 => LdLc,
            0x23 => StLc,
            0x24 => LdEnc,
            0x25 => StEnc,
            0x26 => LdScope,
            0x27 => StScope,
            0x28 => LdAttr,
            0x29 => StAttr,
            0x2A => LdMeth,
            0x2B => NgV,
            0x2C => LStatic,
            0x30 => Jmp,
            0x31 => Jt,
            0x32 => Jf,
            0x33 => Jex,
            0x34 => Jfop,
            0x35 => Jtop,
            0x36 => Jnil,
            0x37 => Jnn,
            0x40 => MkLt,
            0x41 => MkSt,
            0x42 => MkTp,
            0x43 => MkDt,
            0x44 => MkBnd,
            0x45 => MkFn,
            0x46 => MkStruct,
            0x47 => MkTrait,
            0x50 => LdIter,
            0x51 => Nxt,
            0x60 => Call,
            0x61 => Dfr,
            0x62 => Spw,
            0x63 => Yld,
            0x64 => Await,
            0x65 => Ret,
            0x66 => Mth,
            0x67 => Init,
            0x70 => Sync,
            0x71 => Unsync,
            0x72 => Trap,
            0x73 => Panic,
            0x80 => Dup,
            0x81 => Pop,
            0x82 => PopC,
            0x83 => PopGt,
            0x84 => PshC,
            0x85 => PshN,
            0x86 => Unpack,
            0x90 => ImpMod,
            0x91 => ImpFrm,
            0x92 => ImpAll,
            0xA0 => Cnt,
            0xA1 => Extd,
            other => return Err(InvalidOpcode(other)),
        })
    }

    /// True for the opcodes whose `jmp` field names a jump target (block
    /// pointer before assembly, byte offset after).
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jmp
                | OpCode::Jt
                | OpCode::Jf
                | OpCode::Jex
                | OpCode::Jfop
                | OpCode::Jtop
                | OpCode::Jnil
                | OpCode::Jnn
        )
    }

    /// Opcodes the jump-threading peephole must not rewrite: exception
    /// jumps and the null-check / try-operator variants, whose targets
    /// carry dispatch semantics beyond plain control transfer.
    pub fn is_unthreadable(self) -> bool {
        matches!(self, OpCode::Jex | OpCode::Jnil | OpCode::Jnn)
    }
}

/// Argument value for `TRAP` that uninstalls the frame's current handler
/// instead of installing one. The all-ones 24-bit pattern can never be a
/// real handler offset: a verified jump target must lie inside the
/// instruction buffer, and no unit grows to 16 MiB of bytecode.
pub const TRAP_CLEAR: u32 = 0x00FF_FFFF;

/// Instruction argument width on the wire: 1, 2, or 4 bytes, looked up by
/// opcode rather than inferred from the argument's value.
pub fn offset_of(op: OpCode) -> u8 {
    use OpCode::*;
    match op {
        // Stack manipulation without operands, and unary arithmetic, encode
        // in a single byte with no argument.
        Not | Inv | Neg | Pos | Dup | Pop | Unpack | Cnt => 1,
        // Small fixed-range argument forms (local/global/enclosed slot
        // indices, comparison/call-mode flags) fit in a 16-bit instruction.
        LdLc | StLc | LdEnc | StEnc | LdScope | StScope | Cmp | EqSt | Inc | Dec | IpAdd
        | IpSub | Sync | Unsync | PopC | PopGt | PshC | PshN => 2,
        // Everything else — jumps, calls, container/closure construction,
        // global/attribute names, import targets — carries a full 24-bit
        // argument in a 32-bit instruction word.
        _ => 4,
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
