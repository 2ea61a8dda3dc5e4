//! Compilation errors

use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Too many local variables (max 32767)")]
    TooManyLocals,

    #[error("Too many constants (max 4095)")]
    TooManyConstants,

    #[error("Too many parameters (max 255)")]
    TooManyParameters,

    #[error("Invalid break statement (not in loop)")]
    InvalidBreak,

    #[error("Invalid continue statement (not in loop)")]
    InvalidContinue,

    #[error("sync target must be addressable, not a literal")]
    SyncOnLiteral,

    #[error("Bytecode verification failed: {message}")]
    Verification { message: String },

    #[error(transparent)]
    Redeclaration(#[from] crate::symtab::RedeclarationError),
}
