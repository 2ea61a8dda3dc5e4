//! The Code object: a sealed, immutable unit produced by the compiler.

use crate::encoder::LineTable;
use sha2::{Digest, Sha256};
use std::fmt;

/// A constant stored in a Code object's static pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// The null/nil singleton.
    Nil,
    /// A boolean literal.
    Bool(bool),
    /// A 64-bit integer literal.
    Int(i64),
    /// A 64-bit float literal.
    Float(f64),
    /// A string literal.
    Str(String),
    /// A nested Code object (closures, nested functions).
    Code(std::sync::Arc<Code>),
}

/// A sealed, immutable bytecode unit.
///
/// Produced once by [`crate::module::CodeBuilder::freeze`] and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    /// Raw instruction bytes.
    instr: Vec<u8>,
    /// Static pool: tuple of constants referenced by index.
    pub statics: Vec<Constant>,
    /// Names of globals referenced by this code (by slot index).
    pub globals: Vec<String>,
    /// Parameter names, in declaration order.
    pub params: Vec<String>,
    /// Names of free variables captured from an enclosing scope.
    pub enclosed: Vec<String>,
    /// Run-length-encoded instruction-offset → source-line mapping.
    pub line_table: LineTable,
    /// Required evaluation-stack depth (peak, not just current).
    pub stack_sz: u32,
    /// Number of local-variable slots.
    pub locals_sz: u32,
    /// Maximum nested sync-block depth.
    pub sync_sz: u32,
    /// Optional fully qualified name (`module.Class.method`).
    pub qualified_name: Option<String>,
    /// Optional docstring.
    pub docstring: Option<String>,
    /// SHA-256 content hash of `instr`, computed at freeze time.
    instr_hash: [u8; 32],
}

impl Code {
    /// Raw instruction bytes.
    pub fn instructions(&self) -> &[u8] {
        &self.instr
    }

    /// Length of the instruction buffer in bytes (`instr_sz`).
    pub fn instr_len(&self) -> usize {
        self.instr.len()
    }

    /// The content hash computed when this Code was frozen.
    pub fn instr_hash(&self) -> &[u8; 32] {
        &self.instr_hash
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code {} ({} bytes)>",
            self.qualified_name.as_deref().unwrap_or("?"),
            self.instr.len()
        )
    }
}

/// Builder used by the assembler to materialise a [`Code`] object.
///
/// A `CodeBuilder` is write-only until [`freeze`](CodeBuilder::freeze); after
/// that the resulting `Code` can never be mutated, matching the "assembled
/// bytecode graph is not re-entered" invariant.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instr: Vec<u8>,
    statics: Vec<Constant>,
    globals: Vec<String>,
    params: Vec<String>,
    enclosed: Vec<String>,
    line_table: LineTable,
    stack_sz: u32,
    locals_sz: u32,
    sync_sz: u32,
    qualified_name: Option<String>,
    docstring: Option<String>,
}

impl CodeBuilder {
    /// Start a new, empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw instruction bytes emitted by the assembler.
    pub fn extend_instructions(&mut self, bytes: &[u8]) {
        self.instr.extend_from_slice(bytes);
    }

    /// Intern a constant into the static pool, returning its slot index.
    pub fn add_static(&mut self, value: Constant) -> u32 {
        self.statics.push(value);
        (self.statics.len() - 1) as u32
    }

    /// Set the required evaluation-stack / locals / sync-block depths.
    pub fn set_requirements(&mut self, stack_sz: u32, locals_sz: u32, sync_sz: u32) {
        self.stack_sz = stack_sz;
        self.locals_sz = locals_sz;
        self.sync_sz = sync_sz;
    }

    /// Set the parameter name list.
    pub fn set_params(&mut self, params: Vec<String>) {
        self.params = params;
    }

    /// Set the globals-name list.
    pub fn set_globals(&mut self, globals: Vec<String>) {
        self.globals = globals;
    }

    /// Set the enclosed (free-variable) name list.
    pub fn set_enclosed(&mut self, enclosed: Vec<String>) {
        self.enclosed = enclosed;
    }

    /// Set the line table emitted alongside assembly.
    pub fn set_line_table(&mut self, line_table: LineTable) {
        self.line_table = line_table;
    }

    /// Set the optional qualified name / docstring.
    pub fn set_names(&mut self, qualified_name: Option<String>, docstring: Option<String>) {
        self.qualified_name = qualified_name;
        self.docstring = docstring;
    }

    /// Seal the builder into an immutable [`Code`] object, computing its
    /// instruction-buffer content hash.
    pub fn freeze(self) -> Code {
        let mut hasher = Sha256::new();
        hasher.update(&self.instr);
        let digest = hasher.finalize();
        let mut instr_hash = [0u8; 32];
        instr_hash.copy_from_slice(&digest);

        Code {
            instr: self.instr,
            statics: self.statics,
            globals: self.globals,
            params: self.params,
            enclosed: self.enclosed,
            line_table: self.line_table,
            stack_sz: self.stack_sz,
            locals_sz: self.locals_sz,
            sync_sz: self.sync_sz,
            qualified_name: self.qualified_name,
            docstring: self.docstring,
            instr_hash,
        }
    }
}
