use crate::define::fs::{
    sectors_for, INDIR_MAX_FILE_SIZE, MAX_FILE_SIZE, NUM_DIRECT, SECTOR_SIZE,
};
use crate::fs::bitmap::Bitmap;
use crate::fs::sector::ByteRw;
use crate::fs::synch_disk::SynchDisk;

/// On-disk file header, exactly one sector: file size, total sector count
/// (data plus indirection) and the sector table.
#[derive(Clone, Copy, Debug)]
pub struct RawFileHeader {
    pub num_bytes: u32,
    pub num_sectors: u32,
    pub data_sectors: [u32; NUM_DIRECT],
}

impl RawFileHeader {
    fn empty() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            data_sectors: [0; NUM_DIRECT],
        }
    }

    fn from_sector(buf: &mut [u8; SECTOR_SIZE]) -> Self {
        let rw = ByteRw::new(buf);
        let mut raw = Self {
            num_bytes: rw.read_u32(0),
            num_sectors: rw.read_u32(4),
            data_sectors: [0; NUM_DIRECT],
        };
        for (i, s) in raw.data_sectors.iter_mut().enumerate() {
            *s = rw.read_u32(8 + 4 * i);
        }
        raw
    }

    fn to_sector(self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut rw = ByteRw::new(&mut buf);
        rw.write_u32(0, self.num_bytes);
        rw.write_u32(4, self.num_sectors);
        for (i, s) in self.data_sectors.iter().enumerate() {
            rw.write_u32(8 + 4 * i, *s);
        }
        buf
    }
}

/// In-memory file header. A header is either *direct* (every table entry
/// is a data sector) or *indirect* (every used entry points at a child
/// header, kept in `children`, parallel to the table).
///
/// Invariant: `num_sectors` counts data sectors plus, when indirect, the
/// child header sectors.
#[derive(Clone, Debug)]
pub struct FileHeader {
    raw: RawFileHeader,
    children: Vec<FileHeader>,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            raw: RawFileHeader::empty(),
            children: Vec::new(),
        }
    }

    pub fn raw(&self) -> &RawFileHeader {
        &self.raw
    }

    /// Number of bytes in the file.
    pub fn length(&self) -> usize {
        self.raw.num_bytes as usize
    }

    pub fn uses_indirection(&self) -> bool {
        self.raw.num_bytes as usize > MAX_FILE_SIZE
    }

    fn data_sector_count(&self) -> usize {
        sectors_for(self.raw.num_bytes as usize)
    }

    fn indirection_sector_count(&self) -> usize {
        if self.uses_indirection() {
            self.data_sector_count().div_ceil(NUM_DIRECT)
        } else {
            0
        }
    }

    /// Claim space for a file of `size` bytes out of `free_map`.
    ///
    /// The required sector count is checked against the free map before
    /// anything is claimed, so a failure leaves the map untouched. The
    /// caller holds the free-map lock, which keeps the check sound.
    pub fn allocate(&mut self, free_map: &mut Bitmap, size: usize) -> Result<(), &'static str> {
        if size > INDIR_MAX_FILE_SIZE {
            return Err("file header: file too large");
        }
        self.raw.num_bytes = size as u32;

        let data_sectors = self.data_sector_count();
        let indirection_sectors = self.indirection_sector_count();
        self.raw.num_sectors = (data_sectors + indirection_sectors) as u32;
        if free_map.count_clear() < data_sectors + indirection_sectors {
            self.raw = RawFileHeader::empty();
            return Err("file header: not enough free sectors");
        }

        if !self.uses_indirection() {
            for i in 0..data_sectors {
                self.raw.data_sectors[i] =
                    free_map.find().expect("free count checked above") as u32;
            }
        } else {
            let mut remaining = size;
            for i in 0..indirection_sectors {
                self.raw.data_sectors[i] =
                    free_map.find().expect("free count checked above") as u32;
                let chunk = remaining.min(MAX_FILE_SIZE);
                let mut child = FileHeader::new();
                child.allocate(free_map, chunk)?;
                remaining -= chunk;
                self.children.push(child);
            }
        }
        Ok(())
    }

    /// Release every sector reachable from this header, indirection
    /// sectors included. Each one must still be marked in the map.
    pub fn deallocate(&mut self, free_map: &mut Bitmap) {
        for child in &mut self.children {
            child.deallocate(free_map);
        }
        let own = if self.uses_indirection() {
            self.indirection_sector_count()
        } else {
            self.raw.num_sectors as usize
        };
        for i in 0..own {
            let sector = self.raw.data_sectors[i] as usize;
            assert!(free_map.test(sector), "deallocating unmarked sector {}", sector);
            free_map.clear(sector);
        }
        self.children.clear();
        self.raw = RawFileHeader::empty();
    }

    /// Read this header (and, when indirect, its children) from disk.
    pub fn fetch_from(&mut self, disk: &SynchDisk, sector: u32) {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf);
        self.raw = RawFileHeader::from_sector(&mut buf);
        self.children.clear();
        for i in 0..self.indirection_sector_count() {
            let mut child = FileHeader::new();
            child.fetch_from(disk, self.raw.data_sectors[i]);
            self.children.push(child);
        }
    }

    /// Write this header (and, when indirect, its children) to disk.
    pub fn write_back(&self, disk: &SynchDisk, sector: u32) {
        disk.write_sector(sector, &self.raw.to_sector());
        for (i, child) in self.children.iter().enumerate() {
            child.write_back(disk, self.raw.data_sectors[i]);
        }
    }

    /// Which sector stores the byte at `offset`. `offset` must be inside
    /// the file.
    pub fn byte_to_sector(&self, offset: usize) -> u32 {
        assert!(
            offset < self.raw.num_bytes as usize,
            "byte_to_sector: offset {} beyond file of {} bytes",
            offset,
            self.raw.num_bytes
        );
        if self.uses_indirection() {
            self.children[offset / MAX_FILE_SIZE].byte_to_sector_inner(offset % MAX_FILE_SIZE)
        } else {
            self.raw.data_sectors[offset / SECTOR_SIZE]
        }
    }

    // Children of a full indirect file report num_bytes == MAX_FILE_SIZE,
    // so the plain entry lookup suffices; the parent already validated the
    // overall offset.
    fn byte_to_sector_inner(&self, offset: usize) -> u32 {
        self.raw.data_sectors[offset / SECTOR_SIZE]
    }

    /// Grow the file by `extra` bytes, preserving existing content.
    ///
    /// Growth that fits in the last sector's slack allocates nothing.
    /// Past that, direct sectors are added up to the table size; beyond
    /// the table, the header converts to indirect by wrapping its current
    /// sectors into a first child, then grows children.
    pub fn extend(&mut self, free_map: &mut Bitmap, extra: usize) -> Result<(), &'static str> {
        if extra == 0 {
            return Ok(());
        }
        let old_bytes = self.raw.num_bytes as usize;
        let old_total = self.raw.num_sectors as usize;
        let new_bytes = old_bytes + extra;
        if new_bytes > INDIR_MAX_FILE_SIZE {
            return Err("file header: extension exceeds maximum file size");
        }

        let new_data = sectors_for(new_bytes);
        let new_indirection = if new_bytes > MAX_FILE_SIZE {
            new_data.div_ceil(NUM_DIRECT)
        } else {
            0
        };
        let needed = (new_data + new_indirection).saturating_sub(old_total);
        if free_map.count_clear() < needed {
            return Err("file header: not enough free sectors to extend");
        }

        if !self.uses_indirection() && new_bytes <= MAX_FILE_SIZE {
            // Stays direct: fill the slack, then claim more sectors.
            let old_data = sectors_for(old_bytes);
            for i in old_data..new_data {
                self.raw.data_sectors[i] = free_map.find().expect("free count checked") as u32;
            }
        } else {
            if !self.uses_indirection() {
                // Convert: current direct sectors become the first child.
                let old_data = sectors_for(old_bytes);
                let mut first = FileHeader::new();
                first.raw.num_bytes = old_bytes as u32;
                first.raw.num_sectors = old_data as u32;
                first.raw.data_sectors[..old_data]
                    .copy_from_slice(&self.raw.data_sectors[..old_data]);
                self.raw.data_sectors = [0; NUM_DIRECT];
                self.raw.data_sectors[0] = free_map.find().expect("free count checked") as u32;
                self.children.push(first);
            }
            self.grow_children(free_map, new_bytes);
        }

        self.raw.num_bytes = new_bytes as u32;
        self.raw.num_sectors = (new_data + new_indirection) as u32;
        Ok(())
    }

    // Extend the last child up to a full direct header, then append
    // children until `new_bytes` is covered. The free count was checked
    // by the caller.
    fn grow_children(&mut self, free_map: &mut Bitmap, new_bytes: usize) {
        let last_index = self.children.len() - 1;
        let covered_before_last = last_index * MAX_FILE_SIZE;
        let last = &mut self.children[last_index];
        let last_target = (new_bytes - covered_before_last).min(MAX_FILE_SIZE);
        let last_extra = last_target - last.raw.num_bytes as usize;
        last.extend(free_map, last_extra)
            .expect("free count checked by caller");

        while self.children.len() * MAX_FILE_SIZE < new_bytes {
            let index = self.children.len();
            self.raw.data_sectors[index] = free_map.find().expect("free count checked") as u32;
            let chunk = (new_bytes - index * MAX_FILE_SIZE).min(MAX_FILE_SIZE);
            let mut child = FileHeader::new();
            child
                .allocate(free_map, chunk)
                .expect("free count checked by caller");
            self.children.push(child);
        }
    }

    /// Every sector reachable from this header, indirection sectors
    /// included. Used by the consistency check.
    pub fn reachable_sectors(&self) -> Vec<u32> {
        let mut out = Vec::new();
        if self.uses_indirection() {
            for i in 0..self.indirection_sector_count() {
                out.push(self.raw.data_sectors[i]);
            }
            for child in &self.children {
                out.extend(child.reachable_sectors());
            }
        } else {
            for i in 0..self.raw.num_sectors as usize {
                out.push(self.raw.data_sectors[i]);
            }
        }
        out
    }

    /// The structural invariant relating sizes and sector counts.
    pub fn size_invariant_holds(&self) -> bool {
        self.raw.num_sectors as usize == self.data_sector_count() + self.indirection_sector_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::fs::NUM_SECTORS;

    #[test]
    fn allocate_direct_counts_sectors() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, 3 * SECTOR_SIZE + 1).unwrap();
        assert_eq!(hdr.raw().num_sectors, 4);
        assert!(!hdr.uses_indirection());
        assert!(hdr.size_invariant_holds());
        assert_eq!(free_map.count_clear(), NUM_SECTORS - 4);
    }

    #[test]
    fn allocate_indirect_builds_children() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let mut hdr = FileHeader::new();
        let size = MAX_FILE_SIZE + SECTOR_SIZE;
        hdr.allocate(&mut free_map, size).unwrap();
        assert!(hdr.uses_indirection());
        // NUM_DIRECT + 1 data sectors, two indirection sectors.
        assert_eq!(hdr.raw().num_sectors as usize, NUM_DIRECT + 1 + 2);
        assert!(hdr.size_invariant_holds());
    }

    #[test]
    fn allocate_too_large_fails_cleanly() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let mut hdr = FileHeader::new();
        assert!(hdr.allocate(&mut free_map, INDIR_MAX_FILE_SIZE + 1).is_err());
        assert_eq!(free_map.count_clear(), NUM_SECTORS);
    }

    #[test]
    fn allocate_without_space_leaves_map_untouched() {
        let mut free_map = Bitmap::new(8);
        for i in 0..6 {
            free_map.mark(i);
        }
        let mut hdr = FileHeader::new();
        assert!(hdr.allocate(&mut free_map, 4 * SECTOR_SIZE).is_err());
        assert_eq!(free_map.count_clear(), 2);
    }

    #[test]
    fn byte_to_sector_is_deterministic() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.mark(0);
        free_map.mark(1);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, 2 * SECTOR_SIZE).unwrap();
        // Lowest-first allocation: sectors 2 and 3.
        assert_eq!(hdr.byte_to_sector(0), 2);
        assert_eq!(hdr.byte_to_sector(SECTOR_SIZE - 1), 2);
        assert_eq!(hdr.byte_to_sector(SECTOR_SIZE), 3);
    }

    #[test]
    fn extend_within_slack_allocates_nothing() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, 10).unwrap();
        let clear = free_map.count_clear();
        hdr.extend(&mut free_map, SECTOR_SIZE - 10).unwrap();
        assert_eq!(free_map.count_clear(), clear);
        assert_eq!(hdr.length(), SECTOR_SIZE);
        assert!(hdr.size_invariant_holds());
    }

    #[test]
    fn extend_across_indirection_preserves_mapping() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, MAX_FILE_SIZE).unwrap();
        let mapping_before: Vec<u32> =
            (0..NUM_DIRECT).map(|i| hdr.byte_to_sector(i * SECTOR_SIZE)).collect();
        hdr.extend(&mut free_map, 2 * SECTOR_SIZE).unwrap();
        assert!(hdr.uses_indirection());
        assert!(hdr.size_invariant_holds());
        let mapping_after: Vec<u32> =
            (0..NUM_DIRECT).map(|i| hdr.byte_to_sector(i * SECTOR_SIZE)).collect();
        assert_eq!(mapping_before, mapping_after);
        // And the new bytes map somewhere fresh.
        let new_sector = hdr.byte_to_sector(MAX_FILE_SIZE);
        assert!(!mapping_before.contains(&new_sector));
    }

    #[test]
    fn write_back_fetch_from_round_trips() {
        use crate::machine::disk::RawDisk;
        use rand::distributions::Alphanumeric;
        use rand::{thread_rng, Rng};

        let mut path = std::path::PathBuf::from("/tmp");
        path.push(format!(
            "{}.disk",
            thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect::<String>()
        ));
        let disk = SynchDisk::new(RawDisk::scratch(&path, NUM_SECTORS).unwrap());

        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.mark(0);
        let size = MAX_FILE_SIZE + 5 * SECTOR_SIZE + 17;
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, size).unwrap();
        hdr.write_back(&disk, 0);

        let mut copy = FileHeader::new();
        copy.fetch_from(&disk, 0);
        assert_eq!(copy.raw().num_bytes, hdr.raw().num_bytes);
        assert_eq!(copy.raw().num_sectors, hdr.raw().num_sectors);
        assert_eq!(copy.raw().data_sectors, hdr.raw().data_sectors);
        for offset in (0..size).step_by(SECTOR_SIZE / 2) {
            assert_eq!(copy.byte_to_sector(offset), hdr.byte_to_sector(offset));
        }
        assert_eq!(copy.byte_to_sector(size - 1), hdr.byte_to_sector(size - 1));
    }

    #[test]
    fn deallocate_returns_every_sector() {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, MAX_FILE_SIZE + 3 * SECTOR_SIZE).unwrap();
        assert!(free_map.count_clear() < NUM_SECTORS);
        hdr.deallocate(&mut free_map);
        assert_eq!(free_map.count_clear(), NUM_SECTORS);
    }
}
