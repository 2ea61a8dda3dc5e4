//! Subcommand implementations: inline eval (`-c`), file execution, and the
//! interactive REPL.

pub mod eval;
pub mod repl;
pub mod run;

use crate::output;
use ember_runtime::{Config, Runtime};

/// Run the configured startup script, if any, before the real entry point.
/// Returns the exit code to bail with when the script is unreadable or
/// fails.
fn run_startup_script(runtime: &mut Runtime, config: &Config) -> Option<i32> {
    let path = config.startup_script.as_ref()?;
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!(
                "ember: cannot read startup script {}: {}",
                path.display(),
                err
            );
            return Some(output::EXIT_USAGE);
        }
    };
    let result = runtime
        .compile("__startup", &source)
        .and_then(|code| runtime.eval(code));
    match result {
        Ok(_) => None,
        Err(err) => Some(output::report_failure(&err)),
    }
}
