//! Persistent evaluation session for the REPL.
//!
//! Each eval accumulates top-level declarations (`let`, `var`, `fn`) and
//! replays them as a prefix for subsequent evals, on a fresh [`Runtime`]
//! each time — there is no incremental compilation, only re-running a
//! growing program, so declared state (and any side effects the
//! declarations themselves had) persists across inputs the same way source
//! pasted into one bigger file would.

use crate::config::Config;
use crate::error::RuntimeError;
use crate::Runtime;
use ember_core::Value;

/// A REPL's running state: accumulated declarations plus the config used to
/// build a fresh VM for each eval.
pub struct Session {
    config: Config,
    declarations: Vec<String>,
}

impl Session {
    /// A session with no accumulated state.
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            declarations: Vec::new(),
        }
    }

    /// Evaluate `code` against every declaration accumulated so far. A bare
    /// expression (no leading keyword, single line) is wrapped in `return`
    /// so its value comes back instead of being discarded as a statement.
    pub fn eval(&mut self, code: &str) -> Result<Value, RuntimeError> {
        let wrapped = if needs_wrapping(code) {
            format!("return {};", code.trim())
        } else {
            code.to_string()
        };

        let full_source = if self.declarations.is_empty() {
            wrapped
        } else {
            format!("{}\n{}", self.declarations.join("\n"), wrapped)
        };

        let mut runtime = Runtime::new(self.config.clone());
        let compiled = runtime.compile("__repl", &full_source)?;
        let value = runtime.eval(compiled)?;

        if is_declaration(code.trim()) {
            self.declarations.push(code.to_string());
        }

        Ok(value)
    }

    /// Discard all accumulated declarations.
    pub fn reset(&mut self, config: &Config) {
        self.config = config.clone();
        self.declarations.clear();
    }
}

fn is_declaration(code: &str) -> bool {
    code.starts_with("let ") || code.starts_with("var ") || code.starts_with("fn ")
}

fn needs_wrapping(code: &str) -> bool {
    let trimmed = code.trim();
    !trimmed.contains('\n')
        && !trimmed.starts_with("let ")
        && !trimmed.starts_with("var ")
        && !trimmed.starts_with("fn ")
        && !trimmed.starts_with("return")
        && !trimmed.starts_with("if ")
        && !trimmed.starts_with("while ")
        && !trimmed.starts_with("sync ")
        && !trimmed.starts_with("trap ")
        && !trimmed.starts_with("panic ")
        && !trimmed.starts_with("defer ")
}
