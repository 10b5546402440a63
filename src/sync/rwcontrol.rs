use std::sync::Arc;

use crate::sync::condition::Condition;
use crate::sync::lock::Lock;
use crate::sync::spinlock::SpinLock;

/// Many-readers / one-writer controller guarding an on-disk file body.
///
/// Readers only touch the internal lock long enough to adjust the count;
/// a writer holds it for the whole critical section, waiting out the
/// readers first. Readers and writers must be disjoint callers; writer
/// starvation is possible and accepted.
pub struct ReadWriteController {
    lock: Arc<Lock>,
    no_readers: Condition,
    readers: SpinLock<usize>,
}

impl Default for ReadWriteController {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadWriteController {
    pub fn new() -> Self {
        let lock = Arc::new(Lock::new("read counter"));
        Self {
            no_readers: Condition::new("no readers", lock.clone()),
            lock,
            readers: SpinLock::new(0, "reader count"),
        }
    }

    pub fn acquire_read(&self) {
        self.lock.acquire();
        *self.readers.acquire() += 1;
        self.lock.release();
    }

    pub fn release_read(&self) {
        self.lock.acquire();
        let remaining = {
            let mut readers = self.readers.acquire();
            assert!(*readers > 0, "release_read without acquire_read");
            *readers -= 1;
            *readers
        };
        if remaining == 0 {
            self.no_readers.broadcast();
        }
        self.lock.release();
    }

    /// Returns with the internal lock held; pair with `release_write`.
    pub fn acquire_write(&self) {
        self.lock.acquire();
        while *self.readers.acquire() > 0 {
            self.no_readers.wait();
        }
    }

    pub fn release_write(&self) {
        self.no_readers.signal();
        self.lock.release();
    }
}
