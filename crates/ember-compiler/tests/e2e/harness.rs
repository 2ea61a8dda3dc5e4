//! Shared plumbing: parse, compile, and run a source snippet in a fresh VM.

use ember_compiler::{compile_module, OptimizationLevel};
use ember_core::{EmbeddedVm, LifecycleError, Value, VmOptions};
use std::sync::Arc;

/// Compile `source` at `level` and run it to completion in a fresh VM.
pub fn run_at(source: &str, level: OptimizationLevel) -> Result<Value, LifecycleError> {
    let module = ember_parser::parse(source).expect("source should parse");
    let code = compile_module(&module, "__test", level).expect("source should compile");
    let mut vm = EmbeddedVm::new(VmOptions::default(), 1);
    vm.eval(Arc::new(code))
}

/// Run `source` at the default optimisation level.
pub fn run(source: &str) -> Result<Value, LifecycleError> {
    run_at(source, OptimizationLevel::Medium)
}

/// Assert `source` returns the integer `expected` — at every optimisation
/// level, since jump-threading must never change observable behaviour.
pub fn expect_int(source: &str, expected: i32) {
    for level in [
        OptimizationLevel::Off,
        OptimizationLevel::Soft,
        OptimizationLevel::Medium,
        OptimizationLevel::Hard,
    ] {
        let value = run_at(source, level).expect("execution should succeed");
        assert_eq!(
            value.as_i32(),
            Some(expected),
            "wrong result at {level:?} for: {source}"
        );
    }
}

/// Assert `source` returns the boolean `expected`.
pub fn expect_bool(source: &str, expected: bool) {
    let value = run(source).expect("execution should succeed");
    assert_eq!(value.as_bool(), Some(expected), "wrong result for: {source}");
}

/// Assert `source` returns a float `expected`.
pub fn expect_float(source: &str, expected: f64) {
    let value = run(source).expect("execution should succeed");
    assert_eq!(value.as_f64(), Some(expected), "wrong result for: {source}");
}

/// Assert `source` dies with an unhandled panic.
pub fn expect_panic(source: &str) -> ember_core::Panic {
    match run(source) {
        Err(LifecycleError::Panicked(panic)) => panic,
        Err(other) => panic!("expected a language panic, got {other:?} for: {source}"),
        Ok(value) => panic!("expected a panic, got {value:?} for: {source}"),
    }
}
