use std::collections::VecDeque;
use std::sync::Arc;

use crate::sync::spinlock::SpinLock;
use crate::thread::scheduler;
use crate::thread::Thread;

struct Inner {
    count: usize,
    waiters: VecDeque<Arc<Thread>>,
}

/// Counting semaphore with FIFO wakeup.
///
/// `p` and `v` are the only operations; there is no way to read the count
/// without racing, so none is offered.
pub struct Semaphore {
    name: &'static str,
    inner: SpinLock<Inner>,
}

impl Semaphore {
    pub fn new(name: &'static str, count: usize) -> Self {
        Self {
            name,
            inner: SpinLock::new(
                Inner {
                    count,
                    waiters: VecDeque::new(),
                },
                "semaphore",
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decrement, suspending until the count is positive.
    ///
    /// Waiters are woken oldest first. A woken thread re-checks the count:
    /// another runnable thread may have taken it in between, in which case
    /// it queues again.
    pub fn p(&self) {
        let current = scheduler::current();
        let mut inner = self.inner.acquire();
        while inner.count == 0 {
            inner.waiters.push_back(current.clone());
            drop(inner);
            scheduler::sleep_current();
            inner = self.inner.acquire();
        }
        inner.count -= 1;
    }

    /// Increment and make the eldest waiter runnable.
    pub fn v(&self) {
        let mut inner = self.inner.acquire();
        inner.count += 1;
        if let Some(thread) = inner.waiters.pop_front() {
            scheduler::ready_to_run(thread);
        }
    }
}
