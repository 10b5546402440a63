use std::sync::{Arc, Condvar, Mutex};

use crate::define::param::{FIRST_FILE_FID, MAX_OPEN_FILES};
use crate::define::vm::NUM_TOTAL_REGS;
use crate::fs::file_path::FilePath;
use crate::fs::open_file::OpenFile;
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::SpinLock;
use crate::vm::addr_space::AddressSpace;

/// Wakeup token a suspended thread blocks on. A stored wakeup is never
/// lost: unparking before the park consumes the token immediately.
pub(crate) struct Parker {
    token: Mutex<bool>,
    cond: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            token: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn park(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        while !*token {
            token = self.cond.wait(token).unwrap_or_else(|e| e.into_inner());
        }
        *token = false;
    }

    pub(crate) fn unpark(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *token = true;
        self.cond.notify_one();
    }
}

/// A kernel thread.
///
/// Besides the scheduling state, a thread carries what the process model
/// hangs off it: an optional address space, the per-process open-file
/// table, a working directory and the per-directory lock protecting
/// read-only path operations.
pub struct Thread {
    tid: usize,
    name: String,
    joinable: bool,
    priority: i32,
    pub(crate) parker: Parker,
    exit_status: SpinLock<Option<i32>>,
    join_sem: Semaphore,
    user_regs: SpinLock<[i32; NUM_TOTAL_REGS]>,
    space: SpinLock<Option<Arc<AddressSpace>>>,
    files: SpinLock<Vec<Option<Arc<OpenFile>>>>,
    path: SpinLock<FilePath>,
    pub(crate) current_dir_lock: SpinLock<Option<Arc<Lock>>>,
}

impl Thread {
    pub(crate) fn new(tid: usize, name: &str, joinable: bool, priority: i32) -> Self {
        let mut files = Vec::with_capacity(MAX_OPEN_FILES);
        files.resize_with(FIRST_FILE_FID, || None); // console fids
        Self {
            tid,
            name: String::from(name),
            joinable,
            priority,
            parker: Parker::new(),
            exit_status: SpinLock::new(None, "thread exit status"),
            join_sem: Semaphore::new("thread join", 0),
            user_regs: SpinLock::new([0; NUM_TOTAL_REGS], "thread user regs"),
            space: SpinLock::new(None, "thread space"),
            files: SpinLock::new(files, "thread files"),
            path: SpinLock::new(FilePath::new(), "thread path"),
            current_dir_lock: SpinLock::new(None, "thread dir lock"),
        }
    }

    /// Stable identifier, unique for the lifetime of the kernel. Lock
    /// ownership is tracked by tid, never by name.
    pub fn tid(&self) -> usize {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn joinable(&self) -> bool {
        self.joinable
    }

    /// Block until this thread finishes, then return its exit status.
    pub fn join(&self) -> i32 {
        assert!(self.joinable, "join on a non-joinable thread");
        self.join_sem.p();
        let status = self
            .exit_status
            .acquire()
            .expect("joined thread has no exit status");
        super::scheduler::reap(self.tid);
        status
    }

    pub(crate) fn set_exit_status(&self, status: i32) {
        *self.exit_status.acquire() = Some(status);
        if self.joinable {
            self.join_sem.v();
        }
    }

    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.space.acquire().clone()
    }

    pub fn set_space(&self, space: Option<Arc<AddressSpace>>) {
        *self.space.acquire() = space;
    }

    /// Current working directory as a path copy.
    pub fn get_path(&self) -> FilePath {
        self.path.acquire().clone()
    }

    pub fn set_path(&self, path: FilePath) {
        *self.path.acquire() = path;
    }

    /// Install an open file in the per-process table; the returned fid
    /// starts at [`FIRST_FILE_FID`].
    pub fn add_file(&self, file: Arc<OpenFile>) -> Option<usize> {
        let mut files = self.files.acquire();
        for (fid, slot) in files.iter_mut().enumerate().skip(FIRST_FILE_FID) {
            if slot.is_none() {
                *slot = Some(file);
                return Some(fid);
            }
        }
        if files.len() < MAX_OPEN_FILES {
            files.push(Some(file));
            return Some(files.len() - 1);
        }
        None
    }

    pub fn get_file(&self, fid: usize) -> Option<Arc<OpenFile>> {
        self.files.acquire().get(fid).cloned().flatten()
    }

    pub fn remove_file(&self, fid: usize) -> Option<Arc<OpenFile>> {
        let mut files = self.files.acquire();
        if fid < FIRST_FILE_FID {
            return None;
        }
        files.get_mut(fid).and_then(|slot| slot.take())
    }

    /// Save machine state private to this thread when it is switched out:
    /// the user registers and, through the address space, the TLB bits.
    pub(crate) fn context_switch_out(&self) {
        if let Some(space) = self.space.acquire().clone() {
            space.machine().save_registers(&mut self.user_regs.acquire());
            space.save_state();
        }
    }

    /// Restore machine state when this thread is switched in. The whole
    /// TLB is invalidated; the new space repopulates it on demand.
    pub(crate) fn context_switch_in(&self) {
        if let Some(space) = self.space.acquire().clone() {
            space.machine().restore_registers(&self.user_regs.acquire());
            space.restore_state();
        }
    }
}
