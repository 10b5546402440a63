use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::define::vm::NUM_PHYS_PAGES;
use crate::fs::bitmap::Bitmap;
use crate::fs::file_system::FileSystem;
use crate::machine::disk::RawDisk;
use crate::machine::Machine;
use crate::sync::spinlock::SpinLock;
use crate::thread::Thread;
use crate::vm::addr_space::LoadPolicy;
use crate::vm::core_map::{CoreMap, ReplacementPolicy};

/// One booted kernel: the machine it runs on, its file system, and the
/// physical-frame bookkeeping shared by all address spaces.
pub struct Kernel {
    pub machine: Arc<Machine>,
    pub file_system: Arc<FileSystem>,
    pub(crate) core_map: Arc<CoreMap>,
    pub(crate) used_pages: Arc<SpinLock<Bitmap>>,
    load_policy: LoadPolicy,
    next_pid: AtomicUsize,
    processes: SpinLock<BTreeMap<usize, Arc<Thread>>>,
}

impl Kernel {
    /// Boot over `disk`, formatting it when `format` is set. `load_policy`
    /// decides how address spaces populate memory; `replacement` picks the
    /// eviction policy under memory pressure.
    pub fn new(
        disk: RawDisk,
        format: bool,
        load_policy: LoadPolicy,
        replacement: ReplacementPolicy,
    ) -> Result<Arc<Kernel>, &'static str> {
        let file_system = FileSystem::new(disk, format)?;
        // The booting thread starts at the root directory.
        file_system.register_thread();
        Ok(Arc::new(Kernel {
            machine: Arc::new(Machine::new()),
            file_system,
            core_map: Arc::new(CoreMap::new(NUM_PHYS_PAGES, replacement)),
            used_pages: Arc::new(SpinLock::new(Bitmap::new(NUM_PHYS_PAGES), "used pages")),
            load_policy,
            next_pid: AtomicUsize::new(1),
            processes: SpinLock::new(BTreeMap::new(), "process table"),
        }))
    }

    pub fn load_policy(&self) -> LoadPolicy {
        self.load_policy
    }

    /// The physical-frame manager, for inspection.
    pub fn core_map(&self) -> &CoreMap {
        &self.core_map
    }

    pub(crate) fn alloc_pid(&self) -> usize {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_process(&self, pid: usize, thread: Arc<Thread>) {
        self.processes.acquire().insert(pid, thread);
    }

    pub(crate) fn take_process(&self, pid: usize) -> Option<Arc<Thread>> {
        self.processes.acquire().remove(&pid)
    }

    /// The thread running process `pid`, while it is alive.
    pub fn process(&self, pid: usize) -> Option<Arc<Thread>> {
        self.processes.acquire().get(&pid).cloned()
    }
}
