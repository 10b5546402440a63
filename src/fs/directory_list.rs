use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sync::lock::Lock;
use crate::sync::spinlock::SpinLock;

struct DirListEntry {
    opened: usize,
    dir_lock: Arc<Lock>,
}

/// Registry of directories currently in use, keyed by header sector.
/// Hands out the per-directory lock that serializes structural changes
/// (creating and removing children).
///
/// The registry's own lock is a kernel lock because path resolution does
/// disk I/O while holding it. The discipline everywhere: take the
/// registry lock, look up or pin the per-directory lock, release the
/// registry lock, then acquire the per-directory lock.
pub struct DirectoryList {
    list_lock: Lock,
    entries: SpinLock<BTreeMap<u32, DirListEntry>>,
}

impl Default for DirectoryList {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryList {
    pub fn new() -> Self {
        Self {
            list_lock: Lock::new("directory list"),
            entries: SpinLock::new(BTreeMap::new(), "directory list entries"),
        }
    }

    pub fn lock_acquire(&self) {
        self.list_lock.acquire();
    }

    pub fn lock_release(&self) {
        self.list_lock.release();
    }

    /// Pin the directory at `sector` and return its lock, creating the
    /// entry on first use. The registry lock must be held.
    pub fn open_directory(&self, sector: u32) -> Arc<Lock> {
        assert!(self.list_lock.held_by_current_thread());
        let mut entries = self.entries.acquire();
        let entry = entries.entry(sector).or_insert_with(|| DirListEntry {
            opened: 0,
            dir_lock: Arc::new(Lock::new("directory")),
        });
        entry.opened += 1;
        entry.dir_lock.clone()
    }

    /// Unpin the directory at `sector`, reaping the entry at zero. The
    /// registry lock must be held.
    pub fn close_directory(&self, sector: u32) {
        assert!(self.list_lock.held_by_current_thread());
        let mut entries = self.entries.acquire();
        let entry = entries
            .get_mut(&sector)
            .expect("closing a directory that is not open");
        if entry.opened > 1 {
            entry.opened -= 1;
        } else {
            entries.remove(&sector);
        }
    }

    /// A directory may be removed only while nothing references it. The
    /// registry lock must be held.
    pub fn can_remove(&self, sector: u32) -> bool {
        assert!(self.list_lock.held_by_current_thread());
        !self.entries.acquire().contains_key(&sector)
    }
}
