use std::sync::Arc;

use crate::define::fs::SECTOR_SIZE;
use crate::fs::file_header::FileHeader;
use crate::fs::file_system::FileSystem;
use crate::fs::synch_disk::SynchDisk;
use crate::sync::rwcontrol::ReadWriteController;
use crate::sync::spinlock::SpinLock;

/// Read `buf.len()` bytes of the file described by `hdr` starting at
/// `offset`, clamped to the file length. Returns the byte count.
pub(crate) fn read_file_at(
    disk: &SynchDisk,
    hdr: &FileHeader,
    buf: &mut [u8],
    offset: usize,
) -> usize {
    let length = hdr.length();
    if offset >= length {
        return 0;
    }
    let n = buf.len().min(length - offset);
    let mut done = 0;
    let mut sector_buf = [0u8; SECTOR_SIZE];
    while done < n {
        let at = offset + done;
        let start = at % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - start).min(n - done);
        disk.read_sector(hdr.byte_to_sector(at), &mut sector_buf);
        buf[done..done + chunk].copy_from_slice(&sector_buf[start..start + chunk]);
        done += chunk;
    }
    n
}

/// Write `buf` into the file described by `hdr` starting at `offset`,
/// clamped to the file length; partial sectors are read, patched and
/// written back. Returns the byte count.
pub(crate) fn write_file_at(disk: &SynchDisk, hdr: &FileHeader, buf: &[u8], offset: usize) -> usize {
    let length = hdr.length();
    if offset >= length {
        return 0;
    }
    let n = buf.len().min(length - offset);
    let mut done = 0;
    let mut sector_buf = [0u8; SECTOR_SIZE];
    while done < n {
        let at = offset + done;
        let start = at % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - start).min(n - done);
        let sector = hdr.byte_to_sector(at);
        if chunk == SECTOR_SIZE {
            sector_buf.copy_from_slice(&buf[done..done + SECTOR_SIZE]);
        } else {
            disk.read_sector(sector, &mut sector_buf);
            sector_buf[start..start + chunk].copy_from_slice(&buf[done..done + chunk]);
        }
        disk.write_sector(sector, &sector_buf);
        done += chunk;
    }
    n
}

/// A handle on a file, identified by its header sector.
///
/// Handles opened through [`FileSystem::open`] carry the file's shared
/// read/write controller and are tracked by the open-file registry; on
/// drop they close themselves there, performing the deferred disk
/// deletion when they were the last reference to a file pending removal.
/// Raw handles (the file system's own use) have neither.
///
/// Each handle caches its own copy of the header; like every open file in
/// this design, it sees extensions made through other handles only after
/// re-reading the header.
pub struct OpenFile {
    fs: Arc<FileSystem>,
    sector: u32,
    hdr: SpinLock<FileHeader>,
    pos: SpinLock<usize>,
    controller: Option<Arc<ReadWriteController>>,
}

impl OpenFile {
    pub(crate) fn new_raw(fs: Arc<FileSystem>, sector: u32) -> Self {
        let mut hdr = FileHeader::new();
        hdr.fetch_from(fs.disk(), sector);
        Self {
            fs,
            sector,
            hdr: SpinLock::new(hdr, "open file header"),
            pos: SpinLock::new(0, "open file position"),
            controller: None,
        }
    }

    pub(crate) fn new_registered(
        fs: Arc<FileSystem>,
        sector: u32,
        controller: Arc<ReadWriteController>,
    ) -> Self {
        let mut file = Self::new_raw(fs, sector);
        file.controller = Some(controller);
        file
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn length(&self) -> usize {
        self.hdr.acquire().length()
    }

    pub(crate) fn header_clone(&self) -> FileHeader {
        self.hdr.acquire().clone()
    }

    pub(crate) fn set_header(&self, hdr: FileHeader) {
        *self.hdr.acquire() = hdr;
    }

    pub fn seek(&self, position: usize) {
        *self.pos.acquire() = position;
    }

    pub fn tell(&self) -> usize {
        *self.pos.acquire()
    }

    /// Positionless read, unsynchronized: the caller coordinates access.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let hdr = self.header_clone();
        read_file_at(self.fs.disk(), &hdr, buf, offset)
    }

    /// Positionless write, unsynchronized and non-extending.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let hdr = self.header_clone();
        write_file_at(self.fs.disk(), &hdr, buf, offset)
    }

    /// Read from the seek position under the file's read lock.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, &'static str> {
        if let Some(controller) = &self.controller {
            controller.acquire_read();
        }
        let offset = self.tell();
        let n = self.read_at(buf, offset);
        self.seek(offset + n);
        if let Some(controller) = &self.controller {
            controller.release_read();
        }
        Ok(n)
    }

    /// Write at the seek position under the file's write lock, extending
    /// the file first when the write reaches past the end.
    pub fn write(&self, buf: &[u8]) -> Result<usize, &'static str> {
        if let Some(controller) = &self.controller {
            controller.acquire_write();
        }
        let result = self.write_locked(buf);
        if let Some(controller) = &self.controller {
            controller.release_write();
        }
        result
    }

    fn write_locked(&self, buf: &[u8]) -> Result<usize, &'static str> {
        let offset = self.tell();
        let end = offset + buf.len();
        let length = self.length();
        if end > length {
            self.fs.extend_file(self, end - length)?;
        }
        let n = self.write_at(buf, offset);
        self.seek(offset + n);
        Ok(n)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if self.controller.is_some() {
            self.fs.clone().file_closed(self.sector);
        }
    }
}
