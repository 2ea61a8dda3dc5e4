//! Min-heap timer wheel keyed by deadline, tiebroken by a monotonic id so
//! insertion order is preserved for timers sharing a deadline.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// A single pending timer.
#[derive(Debug, Clone)]
pub struct Timer {
    /// Absolute wake time.
    pub deadline: Instant,
    /// Monotonic id, used only to break deadline ties (FIFO among equals).
    pub id: u64,
    /// The fiber (by scheduler-assigned identity) or event this timer wakes.
    pub event_id: usize,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Timer {}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of pending timers.
#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Timer>,
    next_id: u64,
}

impl TimerHeap {
    /// An empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a wakeup at `deadline` for `event_id`.
    pub fn insert(&mut self, deadline: Instant, event_id: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Timer {
            deadline,
            id,
            event_id,
        });
        id
    }

    /// Peek the earliest timer without removing it.
    pub fn peek(&self) -> Option<&Timer> {
        self.heap.peek()
    }

    /// Pop the earliest timer.
    pub fn pop(&mut self) -> Option<Timer> {
        self.heap.pop()
    }

    /// Drain every timer whose deadline has already passed (relative to
    /// `now`), in deadline order.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<Timer> {
        let mut expired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            expired.push(self.heap.pop().unwrap());
        }
        expired
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True if no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
