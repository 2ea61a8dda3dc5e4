//! Source compilation pipeline: lex + parse, then lower to bytecode.
//!
//! This is the embedding interface's `Compile(filename, source) → Code`.

use crate::error::RuntimeError;
use ember_bytecode::Code;
use ember_compiler::OptimizationLevel;
use std::sync::Arc;

/// Compile `source` into a runnable entry-point `Code` object named `name`.
pub fn compile_source(name: &str, source: &str) -> Result<Arc<Code>, RuntimeError> {
    let module = ember_parser::parse(source).map_err(RuntimeError::Parse)?;
    let code = ember_compiler::compile_module(&module, name, OptimizationLevel::Medium)?;
    Ok(Arc::new(code))
}
