//! VM execution context: an isolated heap, GC generation set, resource
//! accounting, and global namespace.

use crate::gc::{GcStats, GenerationalCollector, Heap};
use crate::types::TypeRegistry;
use crate::value::Value;
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Unique identifier for a [`VmContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmContextId(u64);

impl VmContextId {
    /// Mint a fresh, process-unique context id.
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        VmContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for VmContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Caps on a context's resource consumption.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Maximum heap size in bytes (`None` = unlimited).
    pub max_heap_bytes: Option<usize>,
    /// Maximum number of concurrently live fibers (`None` = unlimited).
    pub max_fibers: Option<usize>,
    /// Maximum interpreter step budget (`None` = unlimited).
    pub max_step_budget: Option<u64>,
}

impl ResourceLimits {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Limit only the heap size.
    pub fn with_heap_limit(max_heap_bytes: usize) -> Self {
        Self {
            max_heap_bytes: Some(max_heap_bytes),
            ..Default::default()
        }
    }

    /// Limit only the number of concurrently live fibers.
    pub fn with_fiber_limit(max_fibers: usize) -> Self {
        Self {
            max_fibers: Some(max_fibers),
            ..Default::default()
        }
    }

    /// Limit only the interpreter step budget.
    pub fn with_step_budget(max_step_budget: u64) -> Self {
        Self {
            max_step_budget: Some(max_step_budget),
            ..Default::default()
        }
    }
}

/// Live resource usage counters, updated as fibers spawn/finish and the
/// interpreter executes instructions.
#[derive(Debug, Default)]
pub struct ResourceCounters {
    active_fibers: AtomicUsize,
    total_steps: AtomicU64,
    peak_fibers: AtomicUsize,
}

impl ResourceCounters {
    /// Fresh, zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fiber spawn, returning the new active count.
    pub fn increment_fibers(&self) -> usize {
        let count = self.active_fibers.fetch_add(1, Ordering::Relaxed) + 1;
        let mut peak = self.peak_fibers.load(Ordering::Relaxed);
        while count > peak {
            match self.peak_fibers.compare_exchange_weak(
                peak,
                count,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
        count
    }

    /// Record a fiber completion, returning the new active count.
    pub fn decrement_fibers(&self) -> usize {
        self.active_fibers.fetch_sub(1, Ordering::Relaxed) - 1
    }

    /// Current number of active fibers.
    pub fn active_fibers(&self) -> usize {
        self.active_fibers.load(Ordering::Relaxed)
    }

    /// Highest active-fiber count observed so far.
    pub fn peak_fibers(&self) -> usize {
        self.peak_fibers.load(Ordering::Relaxed)
    }

    /// Record `count` interpreter steps.
    pub fn increment_steps(&self, count: u64) {
        self.total_steps.fetch_add(count, Ordering::Relaxed);
    }

    /// Total interpreter steps executed so far.
    pub fn total_steps(&self) -> u64 {
        self.total_steps.load(Ordering::Relaxed)
    }

    /// Reset every counter to zero.
    pub fn reset(&self) {
        self.active_fibers.store(0, Ordering::Relaxed);
        self.total_steps.store(0, Ordering::Relaxed);
        self.peak_fibers.store(0, Ordering::Relaxed);
    }
}

/// Options used to build a [`VmContext`].
#[derive(Clone)]
pub struct VmOptions {
    /// Resource caps.
    pub limits: ResourceLimits,
    /// Allocation-count threshold before generation 0 is collected.
    pub gc_threshold: usize,
    /// Type registry shared across every context in the process.
    pub type_registry: Arc<TypeRegistry>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            gc_threshold: crate::gc::DEFAULT_THRESHOLD[0],
            type_registry: crate::types::standard_registry(),
        }
    }
}

/// One isolated execution environment: its own heap, collector, global
/// namespace, and resource accounting.
pub struct VmContext {
    id: VmContextId,
    heap: Heap,
    collector: GenerationalCollector,
    globals: FxHashMap<String, Value>,
    limits: ResourceLimits,
    counters: ResourceCounters,
    type_registry: Arc<TypeRegistry>,
}

impl VmContext {
    /// A context with default options.
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// A context with explicit options.
    pub fn with_options(options: VmOptions) -> Self {
        let mut heap = Heap::new();
        if let Some(max_heap) = options.limits.max_heap_bytes {
            heap.set_max_heap_size(max_heap);
        }
        Self {
            id: VmContextId::new(),
            heap,
            collector: GenerationalCollector::new(),
            globals: FxHashMap::default(),
            limits: options.limits,
            counters: ResourceCounters::new(),
            type_registry: options.type_registry,
        }
    }

    /// This context's id.
    pub fn id(&self) -> VmContextId {
        self.id
    }

    /// The context's heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The context's heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The context's cycle collector.
    pub fn collector_mut(&mut self) -> &mut GenerationalCollector {
        &mut self.collector
    }

    /// Run a generation-0 collection if its allocation threshold has been
    /// crossed, returning the collection stats if one ran.
    pub fn maybe_collect(&mut self) -> Option<GcStats> {
        if self.collector.should_collect(0) {
            Some(unsafe { self.collector.collect(0, &self.type_registry) })
        } else {
            None
        }
    }

    /// Look up a global binding.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    /// Bind a global.
    pub fn set_global(&mut self, name: String, value: Value) {
        self.globals.insert(name, value);
    }

    /// This context's resource limits.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// This context's live resource counters.
    pub fn counters(&self) -> &ResourceCounters {
        &self.counters
    }

    /// The shared type registry.
    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.type_registry
    }

    /// Whether another fiber may be spawned under this context's limits.
    pub fn can_spawn_fiber(&self) -> bool {
        match self.limits.max_fibers {
            Some(max) => self.counters.active_fibers() < max,
            None => true,
        }
    }

    /// Whether the configured step budget has been exhausted.
    pub fn is_step_budget_exhausted(&self) -> bool {
        match self.limits.max_step_budget {
            Some(max) => self.counters.total_steps() >= max,
            None => false,
        }
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry of live [`VmContext`]s, keyed by id. Lookups from
/// worker threads only contend on the touched shard, not on one global lock.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: DashMap<VmContextId, Arc<Mutex<VmContext>>>,
}

impl ContextRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `context`, returning a shared handle to it.
    pub fn register(&self, context: VmContext) -> Arc<Mutex<VmContext>> {
        let id = context.id();
        let context = Arc::new(Mutex::new(context));
        self.contexts.insert(id, context.clone());
        context
    }

    /// Look up a context by id.
    pub fn get(&self, id: VmContextId) -> Option<Arc<Mutex<VmContext>>> {
        self.contexts.get(&id).map(|entry| entry.clone())
    }

    /// Remove and return a context.
    pub fn remove(&self, id: VmContextId) -> Option<Arc<Mutex<VmContext>>> {
        self.contexts.remove(&id).map(|(_, context)| context)
    }

    /// Number of registered contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True if no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Ids of every registered context.
    pub fn all_ids(&self) -> Vec<VmContextId> {
        self.contexts.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_unique() {
        let a = VmContextId::new();
        let b = VmContextId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn resource_limits_builders_set_one_field_at_a_time() {
        assert_eq!(
            ResourceLimits::with_heap_limit(1024).max_heap_bytes,
            Some(1024)
        );
        assert_eq!(ResourceLimits::with_fiber_limit(3).max_fibers, Some(3));
        assert_eq!(
            ResourceLimits::with_step_budget(10).max_step_budget,
            Some(10)
        );
    }

    #[test]
    fn counters_track_active_and_peak_fibers() {
        let counters = ResourceCounters::new();
        assert_eq!(counters.increment_fibers(), 1);
        assert_eq!(counters.increment_fibers(), 2);
        assert_eq!(counters.decrement_fibers(), 1);
        assert_eq!(counters.active_fibers(), 1);
        assert_eq!(counters.peak_fibers(), 2);
    }

    #[test]
    fn context_globals_round_trip() {
        let mut ctx = VmContext::new();
        assert!(ctx.get_global("x").is_none());
        ctx.set_global("x".into(), Value::i32(42));
        assert_eq!(ctx.get_global("x"), Some(Value::i32(42)));
    }

    #[test]
    fn fiber_limit_gates_can_spawn_fiber() {
        let ctx = VmContext::with_options(VmOptions {
            limits: ResourceLimits::with_fiber_limit(1),
            ..VmOptions::default()
        });
        assert!(ctx.can_spawn_fiber());
        ctx.counters().increment_fibers();
        assert!(!ctx.can_spawn_fiber());
    }

    #[test]
    fn context_registry_register_get_remove() {
        let registry = ContextRegistry::new();
        let ctx = VmContext::new();
        let id = ctx.id();
        registry.register(ctx);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(id).is_some());
        registry.remove(id);
        assert!(registry.get(id).is_none());
    }
}
