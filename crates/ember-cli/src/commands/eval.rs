//! `ember -c <cmd>`: compile and run an inline program string.

use crate::output;
use ember_runtime::{Config, Runtime};

pub fn execute(source: &str, config: &Config) -> i32 {
    let mut runtime = Runtime::new(config.clone());
    if let Some(code) = super::run_startup_script(&mut runtime, config) {
        return code;
    }
    let compiled = match runtime.compile("__main", source) {
        Ok(compiled) => compiled,
        Err(err) => return output::report_failure(&err),
    };
    match runtime.eval(compiled) {
        Ok(value) => {
            output::print_result(&value, config.unbuffered);
            output::EXIT_OK
        }
        Err(err) => output::report_failure(&err),
    }
}
