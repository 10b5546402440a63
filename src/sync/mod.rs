//! Synchronization primitives.
//!
//! [`SpinLock`] is the atomicity primitive everything else is built on; it
//! stands in for the interrupt masking a real kernel would use. The
//! sleeping primitives ([`Semaphore`], [`Lock`], [`Condition`],
//! [`Channel`], [`ReadWriteController`]) suspend the calling thread through
//! the scheduler instead of busy waiting.

pub mod channel;
pub mod condition;
pub mod lock;
pub mod rwcontrol;
pub mod semaphore;
pub mod spinlock;

pub use channel::Channel;
pub use condition::Condition;
pub use lock::Lock;
pub use rwcontrol::ReadWriteController;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};
