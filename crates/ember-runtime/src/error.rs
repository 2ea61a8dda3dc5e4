//! Runtime error types.

use thiserror::Error;

/// Errors surfaced by compilation, loading, or execution through the
/// embedding interface.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The source failed to parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// Lowering the parsed module to bytecode failed.
    #[error(transparent)]
    Compile(#[from] ember_compiler::CompileError),

    /// The interpreter returned a Rust-level error rather than a language
    /// panic.
    #[error(transparent)]
    Vm(#[from] ember_core::VmError),

    /// The lifecycle API failed: an unhandled panic reached the fiber's
    /// outermost frame, or no scheduler was attached.
    #[error(transparent)]
    Lifecycle(#[from] ember_core::vm::LifecycleError),

    /// File I/O error (reading a script or startup file).
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
