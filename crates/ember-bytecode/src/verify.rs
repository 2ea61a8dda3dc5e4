//! Structural verification of an assembled [`Code`] object.
//!
//! This is a sanity pass, not a full bytecode verifier: it checks that the
//! instruction stream decodes cleanly and that every jump offset lands
//! inside the instruction buffer. It does not attempt stack-effect
//! simulation.

use crate::encoder::decode_instr;
use crate::module::Code;
use crate::opcode::OpCode;

/// Error raised by [`verify_code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The instruction stream failed to decode.
    #[error("malformed instruction at offset {0}")]
    Malformed(usize),
    /// A jump instruction's target lies outside the instruction buffer.
    #[error("jump at offset {0} targets out-of-range offset {1}")]
    JumpOutOfRange(usize, u32),
    /// `instr_sz` recorded by the Code object does not match the sum of
    /// per-instruction widths actually present in the buffer.
    #[error("instruction buffer length mismatch: recorded {recorded}, actual {actual}")]
    LengthMismatch {
        /// Length recorded by the Code object.
        recorded: usize,
        /// Length obtained by walking the decoded instruction stream.
        actual: usize,
    },
}

/// Verify that `code`'s instruction buffer is internally consistent.
pub fn verify_code(code: &Code) -> Result<(), VerifyError> {
    let bytes = code.instructions();
    let mut offset = 0usize;
    let mut walked = 0usize;

    while offset < bytes.len() {
        let (op, arg, next) =
            decode_instr(bytes, offset).map_err(|_| VerifyError::Malformed(offset))?;
        if op.is_jump() && (arg as usize) > bytes.len() {
            return Err(VerifyError::JumpOutOfRange(offset, arg));
        }
        walked = next;
        offset = next;
    }

    if walked != bytes.len() {
        return Err(VerifyError::LengthMismatch {
            recorded: bytes.len(),
            actual: walked,
        });
    }

    Ok(())
}

/// True if `op` may legally appear as the final instruction of a Code
/// object's control-flow (return, panic, or an unconditional jump that has
/// already been threaded to a terminal block).
pub fn is_terminal(op: OpCode) -> bool {
    matches!(op, OpCode::Ret | OpCode::Panic | OpCode::Jmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_instr;
    use crate::module::CodeBuilder;

    #[test]
    fn verifies_a_well_formed_stream() {
        let mut builder = CodeBuilder::new();
        let mut buf = Vec::new();
        encode_instr(&mut buf, OpCode::LdLc, 0);
        encode_instr(&mut buf, OpCode::Ret, 0);
        builder.extend_instructions(&buf);
        let code = builder.freeze();
        assert!(verify_code(&code).is_ok());
    }

    #[test]
    fn rejects_a_truncated_stream() {
        let mut builder = CodeBuilder::new();
        builder.extend_instructions(&[OpCode::Call as u8, 0x01]);
        let code = builder.freeze();
        assert!(verify_code(&code).is_err());
    }

    #[test]
    fn rejects_out_of_range_jump() {
        let mut builder = CodeBuilder::new();
        let mut buf = Vec::new();
        encode_instr(&mut buf, OpCode::Jmp, 9999);
        builder.extend_instructions(&buf);
        let code = builder.freeze();
        assert_eq!(
            verify_code(&code),
            Err(VerifyError::JumpOutOfRange(0, 9999))
        );
    }
}
