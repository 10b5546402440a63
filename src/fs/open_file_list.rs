use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sync::rwcontrol::ReadWriteController;
use crate::sync::spinlock::SpinLock;

struct FileMetaData {
    controller: Arc<ReadWriteController>,
    open_instances: usize,
    pending_remove: bool,
}

/// System-wide registry of open *files* (directories have their own),
/// keyed by header sector. It hands every opener of a sector the same
/// read/write controller and carries the pending-removal protocol: a
/// removed file that is still open is deallocated by whoever closes the
/// last handle.
pub struct OpenFileList {
    entries: SpinLock<BTreeMap<u32, FileMetaData>>,
}

impl Default for OpenFileList {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenFileList {
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BTreeMap::new(), "open file list"),
        }
    }

    /// Register one more opener of `sector`. `None` means the file is on
    /// its way out and may not be opened again.
    pub fn add_open_file(&self, sector: u32) -> Option<Arc<ReadWriteController>> {
        let mut entries = self.entries.acquire();
        match entries.get_mut(&sector) {
            Some(meta) => {
                if meta.pending_remove {
                    None
                } else {
                    meta.open_instances += 1;
                    Some(meta.controller.clone())
                }
            }
            None => {
                let controller = Arc::new(ReadWriteController::new());
                entries.insert(
                    sector,
                    FileMetaData {
                        controller: controller.clone(),
                        open_instances: 1,
                        pending_remove: false,
                    },
                );
                Some(controller)
            }
        }
    }

    /// Drop one opener. Returns true when this was the last handle of a
    /// file pending removal: the caller must delete it from disk.
    pub fn close_open_file(&self, sector: u32) -> bool {
        let mut entries = self.entries.acquire();
        let meta = entries
            .get_mut(&sector)
            .expect("closing a file that is not open");
        if meta.open_instances > 1 {
            meta.open_instances -= 1;
            false
        } else {
            let pending = meta.pending_remove;
            entries.remove(&sector);
            pending
        }
    }

    /// Flag `sector` for removal. Returns whether anyone has it open,
    /// which decides between deferred and immediate deletion.
    pub fn set_up_removal(&self, sector: u32) -> bool {
        let mut entries = self.entries.acquire();
        match entries.get_mut(&sector) {
            Some(meta) => {
                meta.pending_remove = true;
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, sector: u32) -> bool {
        self.entries.acquire().contains_key(&sector)
    }
}
