//! Execute a source file as the module `__main`.

use crate::output;
use ember_runtime::{Config, Runtime};
use std::path::Path;

pub fn execute(path: &Path, config: &Config) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("ember: cannot open {}: {}", path.display(), err);
            return output::EXIT_USAGE;
        }
    };
    let mut runtime = Runtime::new(config.clone());
    if let Some(code) = super::run_startup_script(&mut runtime, config) {
        return code;
    }
    let compiled = match runtime.compile("__main", &source) {
        Ok(compiled) => compiled,
        Err(err) => return output::report_failure(&err),
    };
    match runtime.eval(compiled) {
        Ok(_) => output::EXIT_OK,
        Err(err) => output::report_failure(&err),
    }
}
