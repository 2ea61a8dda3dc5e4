//! Single-dispatcher-thread event loop: timers plus OS I/O readiness,
//! feeding completions back to the scheduler as fiber wakeups.

mod epoll;
mod event;
mod timer;

pub use event::{CallbackOutcome, Direction, Event, EventPool};
pub use timer::{Timer, TimerHeap};

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Default poll tick when no timer is closer than this.
pub const DEFAULT_TICK: Duration = Duration::from_millis(24);

/// Bound on the per-loop event free-list.
pub const MAX_FREE_EVENTS: usize = 512;

/// A fiber wakeup produced by either a timer or an I/O completion.
#[derive(Debug, Clone, Copy)]
pub struct Wakeup {
    /// Scheduler-assigned fiber identity to resume.
    pub waiter: usize,
    /// Whether the wakeup was due to a deadline instead of completion.
    pub timed_out: bool,
}

/// Coordinates timers and readiness polling for one VM context.
///
/// The dispatcher thread itself is driven externally (by calling
/// [`EventLoop::tick`] in a loop); this keeps the loop testable without
/// spinning a real background thread.
pub struct EventLoop {
    timers: Mutex<TimerHeap>,
    poller: epoll::Poller,
    registered: Mutex<usize>,
    idle: Mutex<()>,
    wake_idle: Condvar,
}

impl EventLoop {
    /// Build a fresh event loop with its own epoll instance (Unix) or a
    /// no-op poller elsewhere.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            timers: Mutex::new(TimerHeap::new()),
            poller: epoll::Poller::new()?,
            registered: Mutex::new(0),
            idle: Mutex::new(()),
            wake_idle: Condvar::new(),
        })
    }

    /// Register interest in `fd` becoming ready for `direction`, waking
    /// `waiter` on completion.
    pub fn register(&self, fd: i32, direction: Direction, waiter: usize) -> std::io::Result<()> {
        self.poller.add(fd, direction, waiter)?;
        *self.registered.lock().unwrap() += 1;
        self.wake_idle.notify_one();
        Ok(())
    }

    /// Deregister `fd`.
    pub fn deregister(&self, fd: i32) -> std::io::Result<()> {
        self.poller.remove(fd)?;
        let mut count = self.registered.lock().unwrap();
        *count = count.saturating_sub(1);
        Ok(())
    }

    /// Schedule `waiter` to be woken at `deadline`; if I/O on `fd` completes
    /// first the timer becomes a no-op (the loser of the race, tracked via
    /// the event's `race_refcount`, simply never fires).
    pub fn schedule_timeout(&self, deadline: Instant, waiter: usize) -> u64 {
        let id = self.timers.lock().unwrap().insert(deadline, waiter);
        self.wake_idle.notify_one();
        id
    }

    /// One iteration of the dispatcher loop: sleep until there's something
    /// to do, then drain expired timers and ready descriptors into the
    /// `ready` wakeup queue, returning everything collected this tick.
    pub fn tick(&self) -> Vec<Wakeup> {
        if *self.registered.lock().unwrap() == 0 && self.timers.lock().unwrap().is_empty() {
            let guard = self.idle.lock().unwrap();
            let _ = self
                .wake_idle
                .wait_timeout(guard, DEFAULT_TICK)
                .unwrap();
        }

        let now = Instant::now();
        let timeout = {
            let timers = self.timers.lock().unwrap();
            match timers.peek() {
                Some(next) if next.deadline > now => {
                    (next.deadline - now).min(DEFAULT_TICK)
                }
                Some(_) => Duration::ZERO,
                None => DEFAULT_TICK,
            }
        };

        let mut wakeups: Vec<Wakeup> = self
            .poller
            .poll(timeout)
            .into_iter()
            .map(|waiter| Wakeup {
                waiter,
                timed_out: false,
            })
            .collect();

        let expired = self.timers.lock().unwrap().drain_expired(Instant::now());
        wakeups.extend(expired.into_iter().map(|t| Wakeup {
            waiter: t.event_id,
            timed_out: true,
        }));

        wakeups
    }
}
