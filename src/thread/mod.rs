//! Cooperative threads.
//!
//! Exactly one thread runs on the simulated CPU at a time; switches happen
//! only at the documented suspension points (yield, blocking semaphore P,
//! condition wait, channel rendezvous, blocking lock acquire, synchronous
//! disk I/O). Every simulated thread is backed by a parked host thread and
//! a wakeup token, which is the host-side equivalent of the context switch
//! a real kernel would perform.

pub mod scheduler;
#[allow(clippy::module_inception)]
pub mod thread;

pub use scheduler::{current, exit, fork, lookup, yield_now};
pub use thread::Thread;
