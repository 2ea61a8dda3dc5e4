//! Embedding surface that binds [`ember_compiler`] and [`ember_core`]:
//! `Config`, the `Compile`/`Eval`/`EvalAsync`/`Spawn`/panic-plumbing
//! embedding interface, and the REPL session used by `ember-cli`.

pub mod compile;
pub mod config;
pub mod error;
pub mod session;

pub use compile::compile_source;
pub use config::Config;
pub use error::RuntimeError;
pub use session::Session;

pub use ember_core::Value;

use ember_bytecode::Code;
use ember_core::{EmbeddedVm, Panic, ResourceLimits, VmOptions};
use std::sync::Arc;

/// A configured VM plus the config it was built from: the `Initialize`
/// side of the embedding interface's lifecycle triple.
pub struct Runtime {
    config: Config,
    vm: EmbeddedVm,
}

impl Runtime {
    /// `Initialize(Config)`.
    pub fn new(config: Config) -> Self {
        let vm = build_vm(&config);
        Self { config, vm }
    }

    /// This runtime's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `Compile(filename, source) → Code`.
    pub fn compile(&self, name: &str, source: &str) -> Result<Arc<Code>, RuntimeError> {
        compile::compile_source(name, source)
    }

    /// `Eval(Context, Code, Namespace) → Result` — runs `code` as a fresh
    /// fiber to completion, blocking the calling thread.
    pub fn eval(&mut self, code: Arc<Code>) -> Result<Value, RuntimeError> {
        Ok(self.vm.eval(code)?)
    }

    /// `EvalAsync(Context, Function, args) → Future`. Fibers are scheduled
    /// cooperatively, not on a background OS thread, so "non-blocking"
    /// means the call returns before `code` runs rather than before some
    /// other thread finishes it; [`Runtime::drain`] is what actually drives
    /// it to completion.
    pub fn eval_async(&mut self, code: Arc<Code>) -> Result<(), RuntimeError> {
        Ok(self.vm.spawn(code)?)
    }

    /// `Spawn(Function, args)` — fire-and-forget; identical to
    /// [`Runtime::eval_async`] at this layer, since neither surfaces a
    /// result handle back to the caller.
    pub fn spawn(&mut self, code: Arc<Code>) -> Result<(), RuntimeError> {
        Ok(self.vm.spawn(code)?)
    }

    /// Run every fiber the scheduler currently holds until none remain
    /// runnable.
    pub fn drain(&mut self) -> Result<(), RuntimeError> {
        Ok(self.vm.drain()?)
    }

    /// `GetLastError()`.
    pub fn last_panic(&self) -> Option<&Panic> {
        self.vm.last_panic()
    }

    /// `DiscardLastPanic()`.
    pub fn discard_last_panic(&mut self) {
        self.vm.discard_last_panic()
    }

    /// `Shutdown()` — stop accepting new scheduler work.
    pub fn shutdown(&mut self) {
        self.vm.shutdown();
    }

    /// `Cleanup()` — terminal teardown, consuming the runtime.
    pub fn cleanup(self) {
        drop(self);
    }
}

fn build_vm(config: &Config) -> EmbeddedVm {
    let mut options = VmOptions::default();
    if config.max_heap_bytes > 0 {
        options.limits = ResourceLimits::with_heap_limit(config.max_heap_bytes);
    }
    EmbeddedVm::new(options, config.max_vcores.max(1))
}

/// Format a [`Value`] for display, e.g. in the REPL or `ember -c`.
///
/// Heap values render through their object payload (string contents, list
/// elements) instead of the raw pointer form `Value`'s `Display` falls
/// back to. Nesting is capped so a cyclic container terminates.
pub fn format_value(value: &Value) -> String {
    format_value_depth(value, 0)
}

const FORMAT_DEPTH_MAX: usize = 8;

fn format_value_depth(value: &Value, depth: usize) -> String {
    use ember_core::object::{ListObject, ObjectHeader, StringObject, TupleObject};
    use ember_core::types::well_known;

    let Some(ptr) = (unsafe { value.as_ptr::<ObjectHeader>() }) else {
        return value.to_string();
    };
    if depth >= FORMAT_DEPTH_MAX {
        return "...".to_string();
    }
    let header = ptr.as_ptr() as *const ObjectHeader;
    let type_id = unsafe { (*header).type_id };
    if type_id == well_known::STR {
        let s = header as *const StringObject;
        unsafe { (*s).data.clone() }
    } else if type_id == well_known::LIST {
        let list = header as *const ListObject;
        let items: Vec<String> = unsafe { &(*list).items }
            .iter()
            .map(|item| format_value_depth(item, depth + 1))
            .collect();
        format!("[{}]", items.join(", "))
    } else if type_id == well_known::TUPLE {
        let tuple = header as *const TupleObject;
        let items: Vec<String> = unsafe { &(*tuple).items }
            .iter()
            .map(|item| format_value_depth(item, depth + 1))
            .collect();
        format!("({})", items.join(", "))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_then_eval_runs_the_program() {
        let mut runtime = Runtime::new(Config::default());
        let code = runtime.compile("__test", "return 6 * 7;").unwrap();
        let value = runtime.eval(code).unwrap();
        assert_eq!(value.as_i32(), Some(42));
    }

    #[test]
    fn a_panic_is_recorded_as_the_last_panic() {
        let mut runtime = Runtime::new(Config::default());
        let code = runtime.compile("__test", "panic 1;").unwrap();
        assert!(runtime.eval(code).is_err());
        assert!(runtime.last_panic().is_some());
        runtime.discard_last_panic();
        assert!(runtime.last_panic().is_none());
    }

    #[test]
    fn heap_limit_is_threaded_through_to_the_vm_context() {
        let config = Config {
            max_heap_bytes: 4096,
            ..Config::default()
        };
        let vm = build_vm(&config);
        drop(vm);
    }
}
