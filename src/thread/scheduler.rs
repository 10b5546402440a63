use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;

use super::thread::Thread;
use crate::sync::spinlock::SpinLock;

/// The ready queue and the thread registry. One per kernel; threads are
/// ambient state, so this is the one global singleton in the crate.
pub struct Scheduler {
    ready: SpinLock<VecDeque<Arc<Thread>>>,
    registry: SpinLock<BTreeMap<usize, Arc<Thread>>>,
    next_tid: AtomicUsize,
}

lazy_static! {
    static ref SCHEDULER: Scheduler = Scheduler {
        ready: SpinLock::new(VecDeque::new(), "scheduler ready"),
        registry: SpinLock::new(BTreeMap::new(), "scheduler registry"),
        next_tid: AtomicUsize::new(1),
    };
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// The currently running thread.
///
/// A host thread that enters the kernel without having been forked (the
/// test harness, the boot path) is adopted as a non-joinable thread on
/// first use.
pub fn current() -> Arc<Thread> {
    CURRENT.with(|c| {
        let mut cur = c.borrow_mut();
        if cur.is_none() {
            let tid = SCHEDULER.next_tid.fetch_add(1, Ordering::Relaxed);
            let th = Arc::new(Thread::new(tid, "main", false, 0));
            SCHEDULER.registry.acquire().insert(tid, th.clone());
            log::trace!(target: "thread", "adopted host thread as tid {}", tid);
            *cur = Some(th);
        }
        cur.as_ref().expect("current thread just installed").clone()
    })
}

/// Look up a live thread by id. Used by `Join` and the process table.
pub fn lookup(tid: usize) -> Option<Arc<Thread>> {
    SCHEDULER.registry.acquire().get(&tid).cloned()
}

/// Create a thread running `body` and place it on the ready queue.
/// The thread's exit status is the closure's return value, or the value
/// passed to [`exit`] if the body never returns.
pub fn fork<F>(name: &str, joinable: bool, priority: i32, body: F) -> Arc<Thread>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let tid = SCHEDULER.next_tid.fetch_add(1, Ordering::Relaxed);
    let thread = Arc::new(Thread::new(tid, name, joinable, priority));
    SCHEDULER.registry.acquire().insert(tid, thread.clone());
    log::debug!(target: "thread", "forking {:?} as tid {}", name, tid);

    let th = thread.clone();
    std::thread::Builder::new()
        .name(format!("sim:{}", name))
        .spawn(move || {
            CURRENT.with(|c| *c.borrow_mut() = Some(th.clone()));
            // Hold still until dispatched for the first time.
            th.parker.park();
            let status = body();
            finish(status);
        })
        .expect("host thread spawn failed");

    ready_to_run(thread.clone());
    thread
}

/// Put a thread back on the tail of the ready queue without running it.
pub(crate) fn ready_to_run(thread: Arc<Thread>) {
    SCHEDULER.ready.acquire().push_back(thread);
}

/// Hand the CPU to the next ready thread, if any. `from` is the thread
/// giving it up; its per-thread machine state is saved first.
fn dispatch_next(from: Option<&Arc<Thread>>) {
    if let Some(cur) = from {
        cur.context_switch_out();
    }
    let next = SCHEDULER.ready.acquire().pop_front();
    match next {
        Some(th) => {
            th.context_switch_in();
            th.parker.unpark();
        }
        None => log::trace!(target: "thread", "ready queue empty, CPU idles"),
    }
}

/// Yield the CPU, staying runnable. Returns when rescheduled.
pub fn yield_now() {
    let cur = current();
    let next = {
        let mut ready = SCHEDULER.ready.acquire();
        ready.push_back(cur.clone());
        ready.pop_front().expect("ready queue cannot be empty here")
    };
    if Arc::ptr_eq(&next, &cur) {
        return;
    }
    cur.context_switch_out();
    next.context_switch_in();
    next.parker.unpark();
    cur.parker.park();
}

/// Suspend the current thread. The caller must already have queued it on
/// some waiter list a future wakeup will move back to the ready queue.
pub(crate) fn sleep_current() {
    let cur = current();
    dispatch_next(Some(&cur));
    cur.parker.park();
}

fn finish(status: i32) {
    let cur = current();
    log::debug!(
        target: "thread",
        "thread {} (tid {}) finished with status {}",
        cur.name(),
        cur.tid(),
        status
    );
    cur.set_exit_status(status);
    if !cur.joinable() {
        SCHEDULER.registry.acquire().remove(&cur.tid());
    }
    dispatch_next(Some(&cur));
}

/// Remove a joined thread from the registry once its status was consumed.
pub(crate) fn reap(tid: usize) {
    SCHEDULER.registry.acquire().remove(&tid);
}

/// Terminate the current thread with `status`, never returning. Forked
/// bodies that simply return get the same effect with their return value.
pub fn exit(status: i32) -> ! {
    finish(status);
    // The simulated thread is gone; quietly retire the host thread.
    loop {
        std::thread::park();
    }
}
