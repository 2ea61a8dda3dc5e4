//! Basic-block compiler: lowers a parsed ember program into one or more
//! sealed [`ember_bytecode::Code`] objects.
//!
//! Pipeline: [`lower`] walks the AST emitting into a [`transl_unit`]'s
//! basic-block graph ([`ir::block`]) using its J-block stack
//! ([`ir::jblock`]) for non-local exits and its [`symtab`] for name
//! resolution and free-variable capture; [`assembler`] (after
//! [`optimize`]'s jump-threading pass) turns the finished graph into bytes.

pub mod assembler;
pub mod error;
pub mod ir;
pub mod lower;
pub mod optimize;
pub mod symtab;
pub mod transl_unit;

pub use error::{CompileError, CompileResult};
pub use optimize::OptimizationLevel;

use ember_bytecode::Code;
use ember_parser::ast;

/// Compile a parsed module's top-level statements into its entry-point
/// `Code` object.
pub fn compile_module(
    module: &ast::Module,
    name: &str,
    level: OptimizationLevel,
) -> CompileResult<Code> {
    lower::lower_module(module, name, level)
}
