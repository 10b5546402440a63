use core::mem::size_of;

/// Size of a disk sector in bytes, the unit of allocation and I/O.
pub const SECTOR_SIZE: usize = 128;

/// Default number of sectors on a freshly created disk.
pub const NUM_SECTORS: usize = 1024;

/// Number of sector entries in a file header. The header must fit in
/// exactly one sector: file size + sector count + the entry table.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 2 * size_of::<u32>()) / size_of::<u32>();

/// Largest file representable by a direct header.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT * SECTOR_SIZE;

/// Largest file representable at all: one level of indirection, every
/// entry pointing at a full direct header.
pub const INDIR_MAX_FILE_SIZE: usize = NUM_DIRECT * NUM_DIRECT * SECTOR_SIZE;

/// Sector holding the free-map file header.
pub const FREE_MAP_SECTOR: u32 = 0;
/// Sector holding the root directory file header.
pub const DIRECTORY_SECTOR: u32 = 1;

/// Longest file name stored in a directory entry.
pub const FILE_NAME_MAX_LEN: usize = 9;

/// On-disk size of one directory entry: in-use flag, directory flag,
/// header sector, and a NUL-padded name.
pub const DIR_ENTRY_SIZE: usize = 2 + size_of::<u32>() + FILE_NAME_MAX_LEN + 1;

/// Initial capacity of a newly formatted directory.
pub const NUM_DIR_ENTRIES: usize = 10;

/// Initial size of a directory file body.
pub const DIRECTORY_FILE_SIZE: usize = NUM_DIR_ENTRIES * DIR_ENTRY_SIZE;

/// Size of the free-map file for a disk of `num_sectors` sectors, one bit
/// per sector.
pub fn free_map_file_size(num_sectors: usize) -> usize {
    num_sectors.div_ceil(8)
}

/// How many sectors are needed to store `bytes` bytes.
pub fn sectors_for(bytes: usize) -> usize {
    bytes.div_ceil(SECTOR_SIZE)
}
