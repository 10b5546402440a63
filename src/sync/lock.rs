use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::semaphore::Semaphore;
use crate::thread::scheduler;

const NO_OWNER: usize = 0;

/// Mutual-exclusion lock with owner tracking, built on a binary semaphore.
///
/// The owner is recorded by thread id. Acquiring a lock already held by
/// the caller, or releasing one it does not hold, is a kernel bug and
/// panics.
pub struct Lock {
    name: &'static str,
    sem: Semaphore,
    owner: AtomicUsize,
}

impl Lock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sem: Semaphore::new(name, 1),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn acquire(&self) {
        assert!(
            !self.held_by_current_thread(),
            "lock {:?}: re-acquire by owner",
            self.name
        );
        self.sem.p();
        self.owner
            .store(scheduler::current().tid(), Ordering::Relaxed);
    }

    pub fn release(&self) {
        assert!(
            self.held_by_current_thread(),
            "lock {:?}: release by non-owner",
            self.name
        );
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.sem.v();
    }

    pub fn held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == scheduler::current().tid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ownership_is_tracked() {
        let lock = Lock::new("test");
        assert!(!lock.held_by_current_thread());
        lock.acquire();
        assert!(lock.held_by_current_thread());
        lock.release();
        assert!(!lock.held_by_current_thread());
    }

    #[test]
    #[should_panic(expected = "release by non-owner")]
    fn release_unheld_panics() {
        let _serial = crate::thread::tests::serialize();
        let lock = Arc::new(Lock::new("test"));
        lock.release();
    }
}
