use std::sync::Arc;

use crate::define::fs::{
    free_map_file_size, DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, DIR_ENTRY_SIZE, FILE_NAME_MAX_LEN,
    FREE_MAP_SECTOR, INDIR_MAX_FILE_SIZE, NUM_DIR_ENTRIES,
};
use crate::fs::bitmap::Bitmap;
use crate::fs::directory::{Directory, DirectoryEntry};
use crate::fs::directory_list::DirectoryList;
use crate::fs::file_header::FileHeader;
use crate::fs::file_path::FilePath;
use crate::fs::open_file::{read_file_at, write_file_at, OpenFile};
use crate::fs::open_file_list::OpenFileList;
use crate::fs::synch_disk::SynchDisk;
use crate::machine::disk::RawDisk;
use crate::sync::lock::Lock;
use crate::thread;

/// The file system: path resolution, create/open/remove, and the
/// concurrency discipline tying the pieces together.
///
/// Shared structures and their guards:
/// * the on-disk free map, mutated only under `free_map_lock`, fetched
///   before reading and written back before releasing;
/// * each in-use directory, guarded by its per-directory lock from the
///   [`DirectoryList`] registry during create/remove of children;
/// * each open file, guarded by a shared read/write controller from the
///   [`OpenFileList`] registry.
///
/// Path names are resolved relative to the calling thread's working
/// directory unless they start with `/`.
pub struct FileSystem {
    disk: SynchDisk,
    free_map_lock: Lock,
    open_files: OpenFileList,
    dir_list: DirectoryList,
}

impl FileSystem {
    /// Wrap `disk`, formatting it first when `format` is set: free-map
    /// file at sector 0, empty root directory at sector 1.
    pub fn new(disk: RawDisk, format: bool) -> Result<Arc<FileSystem>, &'static str> {
        let disk = SynchDisk::new(disk);
        let num_sectors = disk.num_sectors();
        if format {
            log::debug!(target: "fs", "formatting a {}-sector disk", num_sectors);
            let mut free_map = Bitmap::new(num_sectors);
            free_map.mark(FREE_MAP_SECTOR as usize);
            free_map.mark(DIRECTORY_SECTOR as usize);

            let mut map_hdr = FileHeader::new();
            map_hdr.allocate(&mut free_map, free_map_file_size(num_sectors))?;
            let mut dir_hdr = FileHeader::new();
            dir_hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE)?;

            map_hdr.write_back(&disk, FREE_MAP_SECTOR);
            dir_hdr.write_back(&disk, DIRECTORY_SECTOR);

            let root = Directory::new(NUM_DIR_ENTRIES);
            write_file_at(&disk, &dir_hdr, &root.to_bytes(), 0);
            write_file_at(&disk, &map_hdr, &free_map.as_bytes(), 0);
        }
        Ok(Arc::new(FileSystem {
            disk,
            free_map_lock: Lock::new("file system free map"),
            open_files: OpenFileList::new(),
            dir_list: DirectoryList::new(),
        }))
    }

    pub(crate) fn disk(&self) -> &SynchDisk {
        &self.disk
    }

    pub(crate) fn open_raw(self: &Arc<Self>, sector: u32) -> OpenFile {
        OpenFile::new_raw(self.clone(), sector)
    }

    /// Walk `path` from the root, yielding the terminal entry.
    pub fn find_path(self: &Arc<Self>, path: &FilePath) -> Option<DirectoryEntry> {
        let mut entry = DirectoryEntry {
            in_use: true,
            is_dir: true,
            sector: DIRECTORY_SECTOR,
            name: String::new(),
        };
        for part in path.components() {
            if !entry.is_dir {
                return None;
            }
            let dir_file = self.open_raw(entry.sector);
            let mut dir = Directory::new(0);
            dir.fetch_from(&dir_file);
            let index = match dir.find(part) {
                Some(i) => i,
                None => {
                    log::debug!(target: "fs", "path component {:?} not found", part);
                    return None;
                }
            };
            entry = dir.get(index).clone();
        }
        Some(entry)
    }

    /// Create a file (or directory) of `initial_size` bytes.
    ///
    /// Fails when the name exists, no header sector is free, the parent
    /// directory is full and cannot extend, or the data does not fit.
    pub fn create(
        self: &Arc<Self>,
        name: &str,
        initial_size: usize,
        is_directory: bool,
    ) -> Result<(), &'static str> {
        let initial_size = if is_directory && initial_size == 0 {
            DIRECTORY_FILE_SIZE
        } else {
            initial_size
        };
        if initial_size > INDIR_MAX_FILE_SIZE {
            return Err("create: size beyond maximum file size");
        }
        let mut path = thread::current().get_path();
        path.merge(name);
        let file_name = path.split().ok_or("create: empty file name")?;
        if file_name.len() > FILE_NAME_MAX_LEN {
            return Err("create: name too long");
        }
        log::debug!(
            target: "fs",
            "creating {} {:?}, size {}",
            if is_directory { "directory" } else { "file" },
            file_name,
            initial_size
        );

        self.dir_list.lock_acquire();
        let parent = match self.find_path(&path) {
            Some(e) if e.is_dir => e,
            _ => {
                self.dir_list.lock_release();
                return Err("create: parent directory not found");
            }
        };
        let dir_lock = self.dir_list.open_directory(parent.sector);
        self.dir_list.lock_release();
        dir_lock.acquire();

        let result = self.create_in_dir(parent.sector, &file_name, initial_size, is_directory);

        self.dir_list.lock_acquire();
        dir_lock.release();
        self.dir_list.close_directory(parent.sector);
        self.dir_list.lock_release();
        result
    }

    fn create_in_dir(
        self: &Arc<Self>,
        dir_sector: u32,
        name: &str,
        initial_size: usize,
        is_directory: bool,
    ) -> Result<(), &'static str> {
        let dir_file = self.open_raw(dir_sector);
        let mut dir = Directory::new(0);
        dir.fetch_from(&dir_file);
        if dir.find(name).is_some() {
            return Err("create: name already exists");
        }

        self.free_map_lock.acquire();
        let result = (|| {
            let mut free_map = self.load_free_map();
            let sector = free_map
                .find()
                .ok_or("create: no free sector for the header")? as u32;
            let should_extend = dir.add(name, sector, is_directory);
            if should_extend {
                let mut dir_hdr = dir_file.header_clone();
                dir_hdr.extend(&mut free_map, DIR_ENTRY_SIZE)?;
                dir_hdr.write_back(&self.disk, dir_sector);
                dir_file.set_header(dir_hdr);
            }
            let mut hdr = FileHeader::new();
            hdr.allocate(&mut free_map, initial_size)?;

            // Everything fit; only now do the changes reach the disk.
            hdr.write_back(&self.disk, sector);
            dir.write_back(&dir_file)?;
            self.store_free_map(&free_map);
            if is_directory {
                let child_file = self.open_raw(sector);
                let child = Directory::new(initial_size / DIR_ENTRY_SIZE);
                child.write_back(&child_file)?;
            }
            Ok(())
        })();
        self.free_map_lock.release();
        result
    }

    /// Open a file for reading and writing. Directories cannot be opened.
    pub fn open(self: &Arc<Self>, name: &str) -> Option<Arc<OpenFile>> {
        let mut path = thread::current().get_path();
        path.merge(name);

        self.dir_list.lock_acquire();
        let entry = match self.find_path(&path) {
            Some(e) if !e.is_dir => e,
            _ => {
                self.dir_list.lock_release();
                return None;
            }
        };
        path.split();
        let parent = match self.find_path(&path) {
            Some(p) => p,
            None => {
                self.dir_list.lock_release();
                return None;
            }
        };
        let dir_lock = self.dir_list.open_directory(parent.sector);
        self.dir_list.lock_release();
        dir_lock.acquire();

        log::debug!(target: "fs", "opening {:?} at sector {}", entry.name, entry.sector);
        let file = self
            .open_files
            .add_open_file(entry.sector)
            .map(|controller| Arc::new(OpenFile::new_registered(self.clone(), entry.sector, controller)));

        self.dir_list.lock_acquire();
        dir_lock.release();
        self.dir_list.close_directory(parent.sector);
        self.dir_list.lock_release();
        file
    }

    /// Remove a name.
    ///
    /// A file still open elsewhere is unlinked now and deallocated by the
    /// last close. A directory must be empty and unreferenced.
    pub fn remove(self: &Arc<Self>, name: &str) -> Result<(), &'static str> {
        let mut path = thread::current().get_path();
        path.merge(name);

        self.dir_list.lock_acquire();
        let entry = match self.find_path(&path) {
            Some(e) => e,
            None => {
                self.dir_list.lock_release();
                return Err("remove: no such file or directory");
            }
        };
        let file_name = match path.split() {
            Some(n) => n,
            None => {
                self.dir_list.lock_release();
                return Err("remove: cannot remove the root directory");
            }
        };
        // Resolve the parent once; the entry's sector is reused below.
        let parent = match self.find_path(&path) {
            Some(p) => p,
            None => {
                self.dir_list.lock_release();
                return Err("remove: parent directory not found");
            }
        };
        let dir_lock = self.dir_list.open_directory(parent.sector);
        self.dir_list.lock_release();
        dir_lock.acquire();

        let result = if entry.is_dir {
            self.remove_directory(&entry, parent.sector, &file_name)
        } else {
            self.remove_file(&entry, parent.sector, &file_name)
        };

        self.dir_list.lock_acquire();
        dir_lock.release();
        self.dir_list.close_directory(parent.sector);
        self.dir_list.lock_release();
        result
    }

    // The caller holds the parent's directory lock.
    fn remove_file(
        self: &Arc<Self>,
        entry: &DirectoryEntry,
        parent_sector: u32,
        name: &str,
    ) -> Result<(), &'static str> {
        // Unlink first: once the name is gone no new open can reach the
        // sector, so the registry decision below stays accurate.
        let dir_file = self.open_raw(parent_sector);
        let mut dir = Directory::new(0);
        dir.fetch_from(&dir_file);
        if !dir.remove(name) {
            return Err("remove: no such file");
        }
        dir.write_back(&dir_file)?;

        if self.open_files.set_up_removal(entry.sector) {
            log::debug!(
                target: "fs",
                "sector {} still open, deallocation deferred to last close",
                entry.sector
            );
        } else {
            self.delete_from_disk(entry.sector);
        }
        Ok(())
    }

    // The caller holds the parent's directory lock.
    fn remove_directory(
        self: &Arc<Self>,
        entry: &DirectoryEntry,
        parent_sector: u32,
        name: &str,
    ) -> Result<(), &'static str> {
        // The target must be empty and unreferenced.
        self.dir_list.lock_acquire();
        let target_lock = self.dir_list.open_directory(entry.sector);
        self.dir_list.lock_release();
        target_lock.acquire();
        let target_file = self.open_raw(entry.sector);
        let mut target = Directory::new(0);
        target.fetch_from(&target_file);
        let empty = target.is_empty();

        // The registry lock stays held from the decision until the
        // sectors are gone; nothing can re-open the directory in between.
        self.dir_list.lock_acquire();
        target_lock.release();
        self.dir_list.close_directory(entry.sector);
        let unreferenced = self.dir_list.can_remove(entry.sector);
        let result = (|| {
            if !empty {
                return Err("remove: directory not empty");
            }
            if !unreferenced {
                return Err("remove: directory in use");
            }
            let dir_file = self.open_raw(parent_sector);
            let mut dir = Directory::new(0);
            dir.fetch_from(&dir_file);
            if !dir.remove(name) {
                return Err("remove: no such directory");
            }
            dir.write_back(&dir_file)?;
            self.delete_from_disk(entry.sector);
            Ok(())
        })();
        self.dir_list.lock_release();
        result
    }

    /// Release every sector of the file whose header lives at `sector`,
    /// the header sector included.
    pub(crate) fn delete_from_disk(&self, sector: u32) {
        log::debug!(target: "fs", "deallocating file at sector {}", sector);
        self.free_map_lock.acquire();
        let mut hdr = FileHeader::new();
        hdr.fetch_from(&self.disk, sector);
        let mut free_map = self.load_free_map();
        hdr.deallocate(&mut free_map);
        free_map.clear(sector as usize);
        self.store_free_map(&free_map);
        self.free_map_lock.release();
    }

    /// Called by a registered [`OpenFile`] when it drops.
    pub(crate) fn file_closed(self: Arc<Self>, sector: u32) {
        if self.open_files.close_open_file(sector) {
            // Last handle of a file pending removal.
            self.delete_from_disk(sector);
        }
    }

    /// Grow an open file by `extra` bytes under the free-map lock.
    pub(crate) fn extend_file(&self, file: &OpenFile, extra: usize) -> Result<(), &'static str> {
        self.free_map_lock.acquire();
        let result = (|| {
            let mut free_map = self.load_free_map();
            let mut hdr = file.header_clone();
            hdr.extend(&mut free_map, extra)?;
            hdr.write_back(&self.disk, file.sector());
            self.store_free_map(&free_map);
            file.set_header(hdr);
            Ok(())
        })();
        self.free_map_lock.release();
        result
    }

    /// Names in the calling thread's working directory.
    pub fn list(self: &Arc<Self>) -> Vec<String> {
        let path = thread::current().get_path();
        self.dir_list.lock_acquire();
        let entry = match self.find_path(&path) {
            Some(e) if e.is_dir => e,
            _ => {
                self.dir_list.lock_release();
                return Vec::new();
            }
        };
        let dir_lock = self.dir_list.open_directory(entry.sector);
        self.dir_list.lock_release();
        dir_lock.acquire();

        let dir_file = self.open_raw(entry.sector);
        let mut dir = Directory::new(0);
        dir.fetch_from(&dir_file);
        let names = dir.list();

        self.dir_list.lock_acquire();
        dir_lock.release();
        self.dir_list.close_directory(entry.sector);
        self.dir_list.lock_release();
        names
    }

    /// Pin the calling thread's working directory and hand it the
    /// per-directory lock used for read-only path operations.
    pub fn register_thread(self: &Arc<Self>) {
        let thread = thread::current();
        let path = thread.get_path();
        self.dir_list.lock_acquire();
        if let Some(entry) = self.find_path(&path) {
            if entry.is_dir {
                let lock = self.dir_list.open_directory(entry.sector);
                *thread.current_dir_lock.acquire() = Some(lock);
            }
        }
        self.dir_list.lock_release();
    }

    /// Full consistency check: rebuild a shadow bitmap by walking both
    /// reserved headers and every header reachable through the directory
    /// tree, then compare it with the persisted free map. Also verifies
    /// header size invariants, name bounds and duplicate names.
    pub fn check(self: &Arc<Self>) -> bool {
        log::debug!(target: "fs", "running consistency check");
        self.free_map_lock.acquire();
        let num_sectors = self.disk.num_sectors();
        let mut shadow = Bitmap::new(num_sectors);
        shadow.mark(FREE_MAP_SECTOR as usize);
        shadow.mark(DIRECTORY_SECTOR as usize);
        let mut error = false;

        let mut map_hdr = FileHeader::new();
        map_hdr.fetch_from(&self.disk, FREE_MAP_SECTOR);
        if map_hdr.length() != free_map_file_size(num_sectors) {
            log::debug!(target: "fs", "check: bad free map header size");
            error = true;
        }
        error |= Self::check_header(&map_hdr, num_sectors, &mut shadow);

        error |= self.check_directory_tree(DIRECTORY_SECTOR, num_sectors, &mut shadow);

        let free_map = self.load_free_map();
        for sector in 0..num_sectors {
            if free_map.test(sector) != shadow.test(sector) {
                log::debug!(target: "fs", "check: bitmap mismatch at sector {}", sector);
                error = true;
            }
        }
        self.free_map_lock.release();
        !error
    }

    fn check_header(hdr: &FileHeader, num_sectors: usize, shadow: &mut Bitmap) -> bool {
        let mut error = false;
        if !hdr.size_invariant_holds() {
            log::debug!(target: "fs", "check: header size invariant broken");
            error = true;
        }
        for sector in hdr.reachable_sectors() {
            let sector = sector as usize;
            if sector >= num_sectors {
                log::debug!(target: "fs", "check: sector {} out of range", sector);
                error = true;
            } else if shadow.test(sector) {
                log::debug!(target: "fs", "check: sector {} claimed twice", sector);
                error = true;
            } else {
                shadow.mark(sector);
            }
        }
        error
    }

    fn check_directory_tree(
        self: &Arc<Self>,
        sector: u32,
        num_sectors: usize,
        shadow: &mut Bitmap,
    ) -> bool {
        let mut error = false;
        let mut hdr = FileHeader::new();
        hdr.fetch_from(&self.disk, sector);
        error |= Self::check_header(&hdr, num_sectors, shadow);

        let dir_file = self.open_raw(sector);
        let mut dir = Directory::new(0);
        dir.fetch_from(&dir_file);
        let mut known_names: Vec<String> = Vec::new();
        for entry in dir.entries().iter().filter(|e| e.in_use) {
            if entry.name.len() > FILE_NAME_MAX_LEN {
                log::debug!(target: "fs", "check: name {:?} too long", entry.name);
                error = true;
            }
            if known_names.contains(&entry.name) {
                log::debug!(target: "fs", "check: repeated name {:?}", entry.name);
                error = true;
            } else {
                known_names.push(entry.name.clone());
            }
            let s = entry.sector as usize;
            if s >= num_sectors {
                log::debug!(target: "fs", "check: entry sector {} out of range", s);
                error = true;
                continue;
            }
            if shadow.test(s) {
                log::debug!(target: "fs", "check: entry sector {} claimed twice", s);
                error = true;
                continue;
            }
            shadow.mark(s);
            if entry.is_dir {
                error |= self.check_directory_tree(entry.sector, num_sectors, shadow);
            } else {
                let mut entry_hdr = FileHeader::new();
                entry_hdr.fetch_from(&self.disk, entry.sector);
                error |= Self::check_header(&entry_hdr, num_sectors, shadow);
            }
        }
        error
    }

    /// Log the free map and the root directory, for debugging.
    pub fn print(self: &Arc<Self>) {
        self.free_map_lock.acquire();
        let free_map = self.load_free_map();
        log::debug!(
            target: "fs",
            "free map: {} of {} sectors free",
            free_map.count_clear(),
            free_map.num_bits()
        );
        self.free_map_lock.release();
        let root_file = self.open_raw(DIRECTORY_SECTOR);
        let mut root = Directory::new(0);
        root.fetch_from(&root_file);
        root.print();
    }

    // The free map travels disk -> memory -> disk around every mutation;
    // the caller holds the free-map lock.
    fn load_free_map(&self) -> Bitmap {
        let mut hdr = FileHeader::new();
        hdr.fetch_from(&self.disk, FREE_MAP_SECTOR);
        let mut free_map = Bitmap::new(self.disk.num_sectors());
        let mut bytes = vec![0u8; self.disk.num_sectors().div_ceil(8)];
        read_file_at(&self.disk, &hdr, &mut bytes, 0);
        free_map.load_bytes(&bytes);
        free_map
    }

    fn store_free_map(&self, free_map: &Bitmap) {
        let mut hdr = FileHeader::new();
        hdr.fetch_from(&self.disk, FREE_MAP_SECTOR);
        write_file_at(&self.disk, &hdr, &free_map.as_bytes(), 0);
    }
}
