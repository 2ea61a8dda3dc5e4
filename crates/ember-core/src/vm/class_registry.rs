//! Registry of class definitions and the function bodies their vtables
//! point into (`MKSTRUCT`, `LDMETH`).

use crate::object::Class;
use ember_bytecode::Code;
use std::sync::{Arc, RwLock};

/// Process-wide table of class definitions and compiled function bodies.
///
/// Classes and functions share one registry because a vtable slot is just
/// an index into `functions`: `LDMETH` resolves a class id + method slot to
/// a `Code` object without a second lookup table.
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<Vec<Class>>,
    functions: RwLock<Vec<Arc<Code>>>,
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class, returning its id.
    pub fn register_class(&self, class: Class) -> usize {
        let mut classes = self.classes.write().unwrap();
        classes.push(class);
        classes.len() - 1
    }

    /// Look up a class by id.
    pub fn class(&self, id: usize) -> Option<Class> {
        self.classes.read().unwrap().get(id).cloned()
    }

    /// Register a function body, returning its id.
    pub fn register_function(&self, code: Arc<Code>) -> usize {
        let mut functions = self.functions.write().unwrap();
        functions.push(code);
        functions.len() - 1
    }

    /// Look up a function body by id.
    pub fn function(&self, id: usize) -> Option<Arc<Code>> {
        self.functions.read().unwrap().get(id).cloned()
    }

    /// Resolve a method: the function id stored in `class_id`'s vtable at
    /// `slot`, then that function's code.
    pub fn method_code(&self, class_id: usize, slot: usize) -> Option<Arc<Code>> {
        let function_id = *self
            .classes
            .read()
            .unwrap()
            .get(class_id)?
            .vtable
            .methods
            .get(slot)?;
        self.function(function_id)
    }

    /// Number of registered classes.
    pub fn class_count(&self) -> usize {
        self.classes.read().unwrap().len()
    }
}
