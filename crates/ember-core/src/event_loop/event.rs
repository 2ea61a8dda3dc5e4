//! Pooled I/O event objects: one per pending registration, tracking a
//! callback plus the readiness direction(s) it cares about.

/// Outcome of invoking an event's callback once its readiness fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Leave the event registered; it may fire again.
    Retry,
    /// The operation failed; drop the registration.
    Failure,
    /// The operation completed; drop the registration and wake the waiter.
    Success,
}

/// Which direction(s) of readiness this event cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Readable.
    In,
    /// Writable.
    Out,
}

/// A single pending I/O registration.
pub struct Event {
    /// Raw file descriptor being watched.
    pub fd: i32,
    /// Readiness direction this event reacts to.
    pub direction: Direction,
    /// Fiber (by scheduler identity) to wake on completion.
    pub waiter: usize,
    /// Optional timer id; if the timer fires first, this event is
    /// cancelled and the waiter woken with a timeout instead.
    pub timeout_id: Option<u64>,
    /// Shared refcount decremented by whichever of {I/O, timeout} loses
    /// the race to complete first, so the loser's side drops cleanly.
    pub race_refcount: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

/// A free-list pool of [`Event`] slots, recycled up to `max_free` entries
/// instead of allocating and freeing on every registration.
pub struct EventPool {
    free: Vec<Box<Event>>,
    max_free: usize,
}

impl EventPool {
    /// A pool that recycles at most `max_free` idle events.
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Vec::new(),
            max_free,
        }
    }

    /// Take an event slot from the pool, or allocate a fresh one.
    pub fn acquire(&mut self, fd: i32, direction: Direction, waiter: usize) -> Box<Event> {
        let mut event = self.free.pop().unwrap_or_else(|| {
            Box::new(Event {
                fd: 0,
                direction: Direction::In,
                waiter: 0,
                timeout_id: None,
                race_refcount: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            })
        });
        event.fd = fd;
        event.direction = direction;
        event.waiter = waiter;
        event.timeout_id = None;
        event
            .race_refcount
            .store(1, std::sync::atomic::Ordering::Release);
        event
    }

    /// Return an event slot to the pool for reuse, unless already full.
    pub fn release(&mut self, event: Box<Event>) {
        if self.free.len() < self.max_free {
            self.free.push(event);
        }
    }

    /// Number of idle events currently pooled.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// True if no events are pooled.
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_resets_fields() {
        let mut pool = EventPool::new(4);
        let e = pool.acquire(3, Direction::In, 7);
        assert_eq!(e.fd, 3);
        assert_eq!(e.waiter, 7);
        pool.release(e);
        let e2 = pool.acquire(9, Direction::Out, 1);
        assert_eq!(e2.fd, 9);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn release_beyond_capacity_is_dropped() {
        let mut pool = EventPool::new(1);
        pool.release(Box::new(Event {
            fd: 1,
            direction: Direction::In,
            waiter: 0,
            timeout_id: None,
            race_refcount: Default::default(),
        }));
        pool.release(Box::new(Event {
            fd: 2,
            direction: Direction::In,
            waiter: 0,
            timeout_id: None,
            race_refcount: Default::default(),
        }));
        assert_eq!(pool.len(), 1);
    }
}
