//! Registry of type descriptors.
//!
//! Every object's behaviour — equality, hashing, representation, iteration,
//! arithmetic, and (for tracked objects) GC tracing — is table-driven
//! through its [`TypeDescriptor`] rather than dispatched via Rust trait
//! objects, so a header's type id is the only dynamic dispatch key.

use super::TypeId;
use crate::object::ObjectHeader;
use crate::value::Value;
use std::fmt;

/// Called by the tracing collector's "Subtract internal references" step to
/// enumerate an object's outgoing references. Each referent is passed to
/// `visit`; the collector decides whether it is tracked and in the
/// generation currently being collected.
pub type TraceFn = fn(object: *const ObjectHeader, visit: &mut dyn FnMut(Value));

/// Repr (string conversion) callback.
pub type ReprFn = fn(object: *const ObjectHeader) -> String;

/// Equality callback.
pub type EqFn = fn(a: *const ObjectHeader, b: *const ObjectHeader) -> bool;

/// Table-driven behaviour for one language-level type.
#[derive(Clone)]
pub struct TypeDescriptor {
    /// Name used in diagnostics and `repr`.
    pub name: &'static str,
    /// Enumerates outgoing references for the tracing collector. `None` for
    /// types that cannot hold references to other tracked objects.
    pub trace: Option<TraceFn>,
    /// String representation, used for `Str()` and panic tracebacks.
    pub repr: Option<ReprFn>,
    /// Structural equality, used by `EQST`.
    pub eq: Option<EqFn>,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("traceable", &self.trace.is_some())
            .finish()
    }
}

impl TypeDescriptor {
    /// A descriptor for a type that holds no references to other tracked
    /// objects, and so is never worth GC-tracking itself.
    pub fn leaf(name: &'static str) -> Self {
        Self {
            name,
            trace: None,
            repr: None,
            eq: None,
        }
    }

    /// A descriptor for a type whose fields may reference other tracked
    /// objects, supplying the tracer callback the cycle collector needs.
    pub fn traceable(name: &'static str, trace: TraceFn) -> Self {
        Self {
            name,
            trace: Some(trace),
            repr: None,
            eq: None,
        }
    }

    /// True if this type can hold references to other tracked objects.
    pub fn can_be_tracked(&self) -> bool {
        self.trace.is_some()
    }
}

/// A dense registry mapping [`TypeId`] to [`TypeDescriptor`].
#[derive(Debug, Default)]
pub struct TypeRegistry {
    descriptors: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, returning its newly assigned [`TypeId`].
    pub fn register(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let id = TypeId(self.descriptors.len() as u32);
        self.descriptors.push(descriptor);
        id
    }

    /// Look up a descriptor by id.
    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.descriptors.get(id.0 as usize)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Dense, well-known slots into [`create_standard_registry`]'s table, so
/// callers that need "the list type" don't have to carry a name string
/// around.
pub mod well_known {
    use super::TypeId;

    /// The `nil` singleton's type.
    pub const NIL: TypeId = TypeId(0);
    /// `bool`.
    pub const BOOL: TypeId = TypeId(1);
    /// `int`.
    pub const INT: TypeId = TypeId(2);
    /// `float`.
    pub const FLOAT: TypeId = TypeId(3);
    /// `str`.
    pub const STR: TypeId = TypeId(4);
    /// `list`.
    pub const LIST: TypeId = TypeId(5);
    /// `tuple`.
    pub const TUPLE: TypeId = TypeId(6);
    /// `dict`.
    pub const DICT: TypeId = TypeId(7);
    /// `function` (also used for closures).
    pub const FUNCTION: TypeId = TypeId(8);
    /// `object` (plain user-defined-class instances).
    pub const OBJECT: TypeId = TypeId(9);
    /// A method bound to a receiver.
    pub const BOUND_METHOD: TypeId = TypeId(10);
    /// A list/tuple/dict iterator.
    pub const ITERATOR: TypeId = TypeId(11);
    /// A future produced by `SPW`.
    pub const FUTURE: TypeId = TypeId(12);
}

/// Build the registry covering ember's built-in primitive and container
/// shapes: integers, floats, strings, lists, tuples, dicts, and functions.
/// Containers are traceable because their elements may be user objects
/// that participate in a cycle; primitives are leaves. Order and indices
/// are load-bearing — see [`well_known`].
pub fn create_standard_registry() -> TypeRegistry {
    use crate::object::{
        trace_bound_method, trace_closure, trace_dict, trace_future, trace_iterator, trace_list,
        trace_object_fields, trace_tuple,
    };

    let mut reg = TypeRegistry::new();
    reg.register(TypeDescriptor::leaf("nil"));
    reg.register(TypeDescriptor::leaf("bool"));
    reg.register(TypeDescriptor::leaf("int"));
    reg.register(TypeDescriptor::leaf("float"));
    // Strings compare by content, not identity: two separately allocated
    // literals with the same text are equal under `EQST`.
    reg.register(TypeDescriptor {
        name: "str",
        trace: None,
        repr: Some(str_repr),
        eq: Some(str_eq),
    });
    reg.register(TypeDescriptor::traceable("list", trace_list));
    reg.register(TypeDescriptor::traceable("tuple", trace_tuple));
    reg.register(TypeDescriptor::traceable("dict", trace_dict));
    reg.register(TypeDescriptor::traceable("function", trace_closure));
    reg.register(TypeDescriptor::traceable("object", trace_object_fields));
    reg.register(TypeDescriptor::traceable("bound_method", trace_bound_method));
    reg.register(TypeDescriptor::traceable("iterator", trace_iterator));
    reg.register(TypeDescriptor::traceable("future", trace_future));
    reg
}

fn str_eq(a: *const ObjectHeader, b: *const ObjectHeader) -> bool {
    let a = a as *const crate::object::StringObject;
    let b = b as *const crate::object::StringObject;
    unsafe { (*a).data == (*b).data }
}

fn str_repr(object: *const ObjectHeader) -> String {
    let s = object as *const crate::object::StringObject;
    unsafe { (*s).data.clone() }
}
