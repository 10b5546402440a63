use std::collections::VecDeque;
use std::sync::Arc;

use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::SpinLock;

/// Condition variable with Mesa semantics, bound to one [`Lock`].
///
/// `signal` never hands the lock over; a woken waiter re-acquires it and
/// the caller of `wait` must re-check its predicate in a loop.
///
/// Each waiter blocks on a private binary semaphore queued FIFO, so
/// wakeups are targeted and ordered.
pub struct Condition {
    name: &'static str,
    lock: Arc<Lock>,
    waiters: SpinLock<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(name: &'static str, lock: Arc<Lock>) -> Self {
        Self {
            name,
            lock,
            waiters: SpinLock::new(VecDeque::new(), "condition waiters"),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release the bound lock, suspend until signalled, re-acquire.
    /// The lock must be held.
    pub fn wait(&self) {
        assert!(
            self.lock.held_by_current_thread(),
            "condition {:?}: wait without the lock",
            self.name
        );
        let sem = Arc::new(Semaphore::new("condition wait", 0));
        self.waiters.acquire().push_back(sem.clone());
        self.lock.release();
        sem.p();
        self.lock.acquire();
    }

    /// Wake the eldest waiter, if any. The lock must be held.
    pub fn signal(&self) {
        assert!(
            self.lock.held_by_current_thread(),
            "condition {:?}: signal without the lock",
            self.name
        );
        if let Some(sem) = self.waiters.acquire().pop_front() {
            sem.v();
        }
    }

    /// Wake every waiter. The lock must be held.
    pub fn broadcast(&self) {
        assert!(
            self.lock.held_by_current_thread(),
            "condition {:?}: broadcast without the lock",
            self.name
        );
        let mut waiters = self.waiters.acquire();
        while let Some(sem) = waiters.pop_front() {
            sem.v();
        }
    }
}
