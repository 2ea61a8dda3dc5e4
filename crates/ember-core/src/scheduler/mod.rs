//! M:N work-stealing scheduler: fibers run cooperatively on a bounded
//! pool of virtual cores, each backed by an OS thread.

mod deque;

pub use deque::{RunQueue, VCORE_QUEUE_LENGTH_MAX};

use crate::fiber::{Fiber, FiberStatus};
use crossbeam_deque::{Injector, Worker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Default number of virtual cores when unconfigured.
pub const DEFAULT_MAX_VCORES: usize = 4;

/// Hard ceiling on the number of OS threads a scheduler may start.
pub const MAX_OS_THREADS: usize = 10_000;

/// Instructions a fiber may execute before the interpreter dispatch loop
/// checks whether it should yield to the scheduler.
pub const SCHEDULE_TICK_BEFORE_CHECK: u32 = 32;

/// Shared scheduling state: one [`RunQueue`] per virtual core, a global
/// overflow injector, and the shutdown flag workers poll.
pub struct Scheduler {
    queues: Vec<Arc<RunQueue>>,
    injector: Arc<Injector<Box<Fiber>>>,
    park: Mutex<()>,
    wake: Condvar,
    shutdown: AtomicBool,
    active_fibers: AtomicUsize,
}

impl Scheduler {
    /// Build a scheduler topology with `vcores` virtual cores (clamped to
    /// at least 1 and to [`MAX_OS_THREADS`]).
    pub fn new(vcores: usize) -> Arc<Self> {
        let vcores = vcores.clamp(1, MAX_OS_THREADS);
        let workers: Vec<Worker<Box<Fiber>>> = (0..vcores).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<_> = workers.iter().map(|w| w.stealer()).collect();
        let injector = Arc::new(Injector::new());

        let queues = workers
            .into_iter()
            .enumerate()
            .map(|(i, worker)| {
                let siblings = stealers
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, s)| s.clone())
                    .collect();
                Arc::new(RunQueue::new(worker, siblings, injector.clone()))
            })
            .collect();

        Arc::new(Self {
            queues,
            injector,
            park: Mutex::new(()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_fibers: AtomicUsize::new(0),
        })
    }

    /// A scheduler with [`DEFAULT_MAX_VCORES`] virtual cores, or fewer on a
    /// machine with fewer physical cores.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(DEFAULT_MAX_VCORES.min(num_cpus::get().max(1)))
    }

    /// Number of virtual cores in this topology.
    pub fn vcore_count(&self) -> usize {
        self.queues.len()
    }

    /// Spawn a runnable fiber onto the virtual core with the shortest
    /// local queue (simple least-loaded placement).
    pub fn spawn(&self, fiber: Box<Fiber>) {
        self.active_fibers.fetch_add(1, Ordering::AcqRel);
        self.enqueue(fiber);
    }

    fn enqueue(&self, mut fiber: Box<Fiber>) {
        fiber.status = FiberStatus::Runnable;
        let target = self
            .queues
            .iter()
            .min_by_key(|q| q.len())
            .expect("at least one virtual core");
        target.push(fiber);
        self.wake.notify_one();
    }

    /// Worker loop body for virtual core `vcore`: try local work, then
    /// siblings/global via [`RunQueue::find_work`], then park briefly.
    pub fn next_for(&self, vcore: usize) -> Option<Box<Fiber>> {
        let queue = &self.queues[vcore];
        if let Some(fiber) = queue.find_work() {
            return Some(fiber);
        }
        match self.injector.steal() {
            crossbeam_deque::Steal::Success(fiber) => Some(fiber),
            _ => None,
        }
    }

    /// Block the calling worker thread until woken by a spawn or shutdown.
    pub fn park(&self) {
        let guard = self.park.lock().unwrap();
        let _ = self
            .wake
            .wait_timeout(guard, std::time::Duration::from_millis(10))
            .unwrap();
    }

    /// Re-enqueue a fiber whose status transitioned back to `RUNNABLE`
    /// (e.g. a notify-queue wakeup or a completed I/O event). Unlike
    /// [`Scheduler::spawn`] this does not count a new fiber — the one being
    /// resumed was already counted and has not been retired.
    pub fn resume(&self, fiber: Box<Fiber>) {
        self.enqueue(fiber);
    }

    /// Called by a worker when a fiber finishes or blocks permanently.
    pub fn retire(&self) {
        self.active_fibers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of fibers currently spawned and not yet retired.
    pub fn active_fibers(&self) -> usize {
        self.active_fibers.load(Ordering::Acquire)
    }

    /// Signal all worker threads to stop after their current fiber.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_places_fiber_on_least_loaded_vcore() {
        let sched = Scheduler::new(2);
        sched.spawn(Box::new(Fiber::new()));
        assert_eq!(sched.active_fibers(), 1);
        let found = (0..2).find_map(|i| sched.next_for(i));
        assert!(found.is_some());
    }

    #[test]
    fn vcore_count_is_clamped_to_at_least_one() {
        let sched = Scheduler::new(0);
        assert_eq!(sched.vcore_count(), 1);
    }

    #[test]
    fn shutdown_flag_is_observable() {
        let sched = Scheduler::new(1);
        assert!(!sched.is_shutting_down());
        sched.shutdown();
        assert!(sched.is_shutting_down());
    }

    #[test]
    fn retire_balances_active_fiber_count() {
        let sched = Scheduler::new(1);
        sched.spawn(Box::new(Fiber::new()));
        sched.retire();
        assert_eq!(sched.active_fibers(), 0);
    }
}
