//! Type descriptors: the table-driven equality/hash/repr/iteration/
//! arithmetic and GC-tracer dispatch every object defers to through its
//! header's type id.

pub mod registry;

pub use registry::{well_known, TraceFn, TypeDescriptor, TypeRegistry};

use once_cell::sync::Lazy;
use std::sync::Arc;

static STANDARD_REGISTRY: Lazy<Arc<TypeRegistry>> =
    Lazy::new(|| Arc::new(registry::create_standard_registry()));

/// The process-wide shared instance of the standard registry. Descriptors
/// are immutable once built, so every context can point at the same table.
pub fn standard_registry() -> Arc<TypeRegistry> {
    STANDARD_REGISTRY.clone()
}

/// Identifies a runtime type within a [`TypeRegistry`].
///
/// Unlike `std::any::TypeId` (which names a *Rust* type), this id names a
/// *language-level* type — `int`, `string`, a user-defined class — and is
/// assigned sequentially as types are registered, so it doubles as a dense
/// array index for fast dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);
