//! Heap allocation ([`heap::Heap`] on top of [`crate::arena`]) and
//! the generational tracing cycle collector that runs above hybrid RC
//! ([`collector::GenerationalCollector`]).
//!
//! # Memory layout
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ ObjectHeader (type_id, RcWord, GcLink)   │
//! ├─────────────────────────────────────────┤  ← GcPtr points here
//! │ Object payload (variable size)           │
//! └─────────────────────────────────────────┘
//! ```

mod collector;
mod heap;
mod ptr;

pub use collector::{GcStats, GenerationalCollector, DEFAULT_THRESHOLD, GENERATION_COUNT};
pub use heap::Heap;
pub use ptr::GcPtr;
