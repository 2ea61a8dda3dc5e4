//! The three-generation tracing cycle collector.
//!
//! Layered on top of the hybrid RC in `crate::rc`: RC reclaims the acyclic
//! majority of objects immediately; this collector exists solely to break
//! reference cycles among the opt-in tracked subset.

use crate::object::ObjectHeader;
use crate::rc::DecStrongOutcome;
use crate::types::TypeRegistry;
use crate::value::Value;
use rustc_hash::FxHashMap;

/// Number of generations, youngest (0) to oldest (2).
pub const GENERATION_COUNT: usize = 3;

/// Default allocation-count threshold before a generation is collected.
pub const DEFAULT_THRESHOLD: [usize; GENERATION_COUNT] = [700, 10, 10];

/// One generation's tracked-object list and its collection threshold.
#[derive(Default)]
struct Generation {
    members: Vec<*mut ObjectHeader>,
    threshold: usize,
    allocations_since_collect: usize,
}

/// Statistics produced by one [`GenerationalCollector::collect`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects reclaimed by this collection.
    pub collected: usize,
    /// Objects that survived (promoted, or left in place).
    pub uncollected: usize,
}

/// The per-context tracing collector.
pub struct GenerationalCollector {
    generations: [Generation; GENERATION_COUNT],
    /// Scratch field used by step 2 ("Count"): object address -> strong
    /// count snapshot taken at the start of the current collection.
    scratch: FxHashMap<usize, usize>,
    /// Disabled while a fiber holds a GC-managed lock, to avoid re-entering
    /// tracing inside a destructor running `repr`.
    entry_disabled: bool,
}

impl GenerationalCollector {
    /// A fresh collector with the default per-generation thresholds.
    pub fn new() -> Self {
        let mut generations: [Generation; GENERATION_COUNT] = Default::default();
        for (g, threshold) in generations.iter_mut().zip(DEFAULT_THRESHOLD) {
            g.threshold = threshold;
        }
        Self {
            generations,
            scratch: FxHashMap::default(),
            entry_disabled: false,
        }
    }

    /// Register a freshly allocated tracked object in generation 0.
    pub fn register(&mut self, header: *mut ObjectHeader) {
        self.generations[0].members.push(header);
        self.generations[0].allocations_since_collect += 1;
    }

    /// Disable GC entry (a fiber has taken a GC-managed lock).
    pub fn disable_entry(&mut self) {
        self.entry_disabled = true;
    }

    /// Re-enable GC entry.
    pub fn enable_entry(&mut self) {
        self.entry_disabled = false;
    }

    /// Whether generation `g` has crossed its allocation threshold and
    /// should be collected at the next safe point.
    pub fn should_collect(&self, g: usize) -> bool {
        !self.entry_disabled
            && self.generations[g].allocations_since_collect >= self.generations[g].threshold
    }

    /// Run one collection of generation `g`:
    /// Merge → Count → Subtract-internal-refs → Root-identification →
    /// Sweep → Promote.
    ///
    /// # Safety
    /// All pointers registered for generations `0..=g` must currently be
    /// live, correctly typed `ObjectHeader`s whose payload type matches
    /// what `registry` was told to expect via their `type_id`.
    pub unsafe fn collect(&mut self, g: usize, registry: &TypeRegistry) -> GcStats {
        if self.entry_disabled {
            return GcStats::default();
        }

        // 1. Merge: splice younger generations into g's list.
        for younger in 0..g {
            let mut moved = std::mem::take(&mut self.generations[younger].members);
            self.generations[g].members.append(&mut moved);
            self.generations[younger].allocations_since_collect = 0;
        }

        // 2. Count: snapshot each object's current strong count.
        self.scratch.clear();
        for &ptr in &self.generations[g].members {
            let header = &*ptr;
            self.scratch.insert(ptr as usize, header.rc.current_strong());
        }

        // 3. Subtract internal references: for every tracked referent in g,
        // decrement its scratch count once per incoming reference from
        // within g.
        for &ptr in &self.generations[g].members {
            let header = &*ptr;
            if let Some(descriptor) = registry.get(header.type_id) {
                if let Some(trace) = descriptor.trace {
                    trace(ptr, &mut |referent| {
                        if let Some(referent_ptr) = pointer_of(referent) {
                            if let Some(count) = self.scratch.get_mut(&(referent_ptr as usize)) {
                                *count = count.saturating_sub(1);
                            }
                        }
                    });
                }
            }
        }

        // 4. Root identification: objects whose scratch count is still
        // positive are reachable from outside g; mark them (and
        // transitively their referents) visited.
        let roots: Vec<*mut ObjectHeader> = self.generations[g]
            .members
            .iter()
            .copied()
            .filter(|ptr| self.scratch.get(&(*ptr as usize)).copied().unwrap_or(0) > 0)
            .collect();

        for root in roots {
            mark_visited_transitively(root, registry);
        }

        // 5. Sweep: unvisited objects are unreachable cycles.
        let mut survivors = Vec::new();
        let mut collected = 0usize;
        for &ptr in &self.generations[g].members {
            let header = &*ptr;
            let link = header.gc.as_ref().expect("generation member must be tracked");
            if link.is_visited() {
                survivors.push(ptr);
            } else {
                if !link.is_finalized() {
                    link.set_finalized(true);
                }
                if header.rc.dec_strong() == DecStrongOutcome::Free {
                    // Caller's heap owns actual deallocation; the collector
                    // only certifies the object is unreachable garbage.
                }
                collected += 1;
            }
        }

        // 6. Promote: survivors move to the next-older generation; clear
        // the visited bit.
        let uncollected = survivors.len();
        for &ptr in &survivors {
            (*ptr).gc.as_ref().unwrap().set_visited(false);
        }
        let target = (g + 1).min(GENERATION_COUNT - 1);
        if target == g {
            self.generations[g].members = survivors;
        } else {
            self.generations[g].members.clear();
            self.generations[target].members.extend(survivors);
        }
        self.generations[g].allocations_since_collect = 0;

        GcStats {
            collected,
            uncollected,
        }
    }
}

impl Default for GenerationalCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn pointer_of(value: Value) -> Option<*mut ObjectHeader> {
    unsafe { value.as_ptr::<ObjectHeader>() }.map(|p| p.as_ptr())
}

fn mark_visited_transitively(root: *mut ObjectHeader, registry: &TypeRegistry) {
    let mut stack = vec![root];
    while let Some(ptr) = stack.pop() {
        let header = unsafe { &*ptr };
        let Some(link) = header.gc.as_ref() else {
            continue;
        };
        if link.is_visited() {
            continue;
        }
        link.set_visited(true);
        if let Some(descriptor) = registry.get(header.type_id) {
            if let Some(trace) = descriptor.trace {
                trace(ptr, &mut |referent| {
                    if let Some(p) = pointer_of(referent) {
                        stack.push(p);
                    }
                });
            }
        }
    }
}
