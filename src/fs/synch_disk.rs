use crate::define::fs::SECTOR_SIZE;
use crate::machine::disk::RawDisk;
use crate::sync::semaphore::Semaphore;

/// Sector I/O with mutual exclusion: one disk request at a time, the
/// requesting thread blocked until its transfer completes.
pub struct SynchDisk {
    disk: RawDisk,
    mutex: Semaphore,
}

impl SynchDisk {
    pub fn new(disk: RawDisk) -> Self {
        Self {
            disk,
            mutex: Semaphore::new("synch disk", 1),
        }
    }

    pub fn num_sectors(&self) -> usize {
        self.disk.num_sectors()
    }

    pub fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) {
        self.mutex.p();
        self.disk.read_sector(sector, buf);
        self.mutex.v();
    }

    pub fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) {
        self.mutex.p();
        self.disk.write_sector(sector, buf);
        self.mutex.v();
    }
}
