//! Bounded work-stealing run queue for a single virtual core.

use crate::fiber::Fiber;
use crossbeam_deque::{Injector, Stealer, Worker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maximum fibers a single virtual core's local run queue may hold before
/// new arrivals spill to the global injector.
pub const VCORE_QUEUE_LENGTH_MAX: usize = 256;

/// A virtual core's local run queue plus the means to steal from its
/// siblings and fall back to the global injector.
///
/// Work search runs local-pop, then steal-siblings, then steal-global;
/// `push` enforces [`VCORE_QUEUE_LENGTH_MAX`] and spills overflow into the
/// injector rather than assuming unbounded local capacity.
pub struct RunQueue {
    local: Worker<Box<Fiber>>,
    stealers: Vec<Stealer<Box<Fiber>>>,
    injector: Arc<Injector<Box<Fiber>>>,
    len: AtomicUsize,
}

impl RunQueue {
    /// Build a run queue for one virtual core.
    pub fn new(
        local: Worker<Box<Fiber>>,
        stealers: Vec<Stealer<Box<Fiber>>>,
        injector: Arc<Injector<Box<Fiber>>>,
    ) -> Self {
        Self {
            local,
            stealers,
            injector,
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue a fiber. Once the local queue reaches
    /// [`VCORE_QUEUE_LENGTH_MAX`], new arrivals spill to the global
    /// injector instead of growing the local deque further.
    pub fn push(&self, fiber: Box<Fiber>) {
        if self.len.load(Ordering::Acquire) >= VCORE_QUEUE_LENGTH_MAX {
            self.injector.push(fiber);
            return;
        }
        self.len.fetch_add(1, Ordering::AcqRel);
        self.local.push(fiber);
    }

    /// Pop from the local queue only (no stealing).
    pub fn pop_local(&self) -> Option<Box<Fiber>> {
        let popped = self.local.pop();
        if popped.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        popped
    }

    /// Find work: local pop, then steal from siblings, then the injector.
    pub fn find_work(&self) -> Option<Box<Fiber>> {
        if let Some(fiber) = self.pop_local() {
            return Some(fiber);
        }
        loop {
            if let Some(fiber) = self.steal_from_siblings() {
                return Some(fiber);
            }
            match self.injector.steal() {
                crossbeam_deque::Steal::Success(fiber) => return Some(fiber),
                crossbeam_deque::Steal::Empty => return None,
                crossbeam_deque::Steal::Retry => continue,
            }
        }
    }

    fn steal_from_siblings(&self) -> Option<Box<Fiber>> {
        use rand::Rng;
        if self.stealers.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..self.stealers.len());
        for i in 0..self.stealers.len() {
            let stealer = &self.stealers[(start + i) % self.stealers.len()];
            loop {
                match stealer.steal() {
                    crossbeam_deque::Steal::Success(fiber) => return Some(fiber),
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Approximate count of fibers in the local queue.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True if the local queue is empty (the global injector may still
    /// hold work).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_local_round_trips() {
        let worker = Worker::new_lifo();
        let injector = Arc::new(Injector::new());
        let q = RunQueue::new(worker, vec![], injector);
        q.push(Box::new(Fiber::new()));
        assert_eq!(q.len(), 1);
        assert!(q.pop_local().is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_spills_to_the_injector() {
        let worker = Worker::new_lifo();
        let injector = Arc::new(Injector::new());
        let q = RunQueue::new(worker, vec![], injector.clone());
        for _ in 0..VCORE_QUEUE_LENGTH_MAX {
            q.push(Box::new(Fiber::new()));
        }
        assert_eq!(q.len(), VCORE_QUEUE_LENGTH_MAX);
        q.push(Box::new(Fiber::new()));
        assert_eq!(q.len(), VCORE_QUEUE_LENGTH_MAX);
        assert!(matches!(
            injector.steal(),
            crossbeam_deque::Steal::Success(_)
        ));
    }

    #[test]
    fn find_work_steals_from_siblings_then_injector() {
        let w1 = Worker::new_lifo();
        let w2 = Worker::new_lifo();
        let stealer2 = w2.stealer();
        let injector = Arc::new(Injector::new());

        let q1 = RunQueue::new(w1, vec![stealer2], injector.clone());
        w2.push(Box::new(Fiber::new()));
        assert!(q1.find_work().is_some());

        injector.push(Box::new(Fiber::new()));
        assert!(q1.find_work().is_some());
        assert!(q1.find_work().is_none());
    }
}
