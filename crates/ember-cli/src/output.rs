//! Terminal output shared by every command: result echoing, error
//! reporting, and the panic traceback printed when a program dies.

use ember_core::{LifecycleError, Panic};
use ember_runtime::{format_value, RuntimeError, Value};
use std::io::Write;

/// Process exit code for a clean run.
pub const EXIT_OK: i32 = 0;
/// Process exit code for an unhandled panic or any other runtime failure.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code for unusable command-line input (bad flag, missing
/// file, unreadable startup script).
pub const EXIT_USAGE: i32 = 2;

/// Echo a result value to stdout. Nil is skipped — statements have no value
/// worth printing.
pub fn print_result(value: &Value, unbuffered: bool) {
    if value.is_null() {
        return;
    }
    println!("{}", format_value(value));
    if unbuffered {
        let _ = std::io::stdout().flush();
    }
}

/// Report a failed run on stderr, rendering the full panic chain when the
/// error carries one, and return the exit code for `main`.
pub fn report_failure(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::Lifecycle(LifecycleError::Panicked(panic)) => print_panic_chain(panic),
        other => eprintln!("error: {other}"),
    }
    EXIT_FAILURE
}

/// Print every panic in the chain. A panic raised while the first one was
/// unwinding (an aborted defer or trap handler) chains on and is reported
/// after it.
fn print_panic_chain(panic: &Panic) {
    let mut next = Some(panic);
    while let Some(p) = next {
        eprintln!("panic: {}", format_value(&p.value));
        eprintln!("Traceback (most recent call FIRST):");
        for frame in &p.trace {
            eprintln!("  at {frame}");
        }
        next = p.aborted_by.as_deref();
    }
}
