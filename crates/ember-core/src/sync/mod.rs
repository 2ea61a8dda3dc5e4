//! Fiber-level synchronization: the FIFO notify queue fibers park on, and
//! the recursive shared mutex built on top of it for `sync`-block opcodes.

mod mutex;
mod ticket;

pub use mutex::RecursiveSharedMutex;
pub use ticket::{NotifyQueue, NotifyQueueTicket};
