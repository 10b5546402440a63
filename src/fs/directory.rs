use crate::define::fs::{DIR_ENTRY_SIZE, FILE_NAME_MAX_LEN};
use crate::fs::open_file::OpenFile;
use crate::fs::sector::ByteRw;

/// One slot of a directory table.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    pub in_use: bool,
    pub is_dir: bool,
    pub sector: u32,
    pub name: String,
}

impl DirectoryEntry {
    fn empty() -> Self {
        Self {
            in_use: false,
            is_dir: false,
            sector: 0,
            name: String::new(),
        }
    }

    fn parse(bytes: &mut [u8]) -> Self {
        let rw = ByteRw::new(bytes);
        let in_use = rw.read_u8(0) != 0;
        let is_dir = rw.read_u8(1) != 0;
        let sector = rw.read_u32(2);
        let raw_name = rw.bytes(6, FILE_NAME_MAX_LEN + 1);
        let len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..len]).into_owned();
        Self {
            in_use,
            is_dir,
            sector,
            name,
        }
    }

    fn serialize(&self, bytes: &mut [u8]) {
        let mut rw = ByteRw::new(bytes);
        rw.write_u8(0, self.in_use as u8);
        rw.write_u8(1, self.is_dir as u8);
        rw.write_u32(2, self.sector);
        let name = self.name.as_bytes();
        assert!(name.len() <= FILE_NAME_MAX_LEN, "directory entry name too long");
        rw.write_bytes(6, name);
        // Remaining name bytes stay zero: NUL padding.
    }
}

/// A directory: a table of entries persisted contiguously in its backing
/// file. Capacity is whatever the file holds; growing the file by one
/// entry grows the table.
pub struct Directory {
    table: Vec<DirectoryEntry>,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: (0..capacity).map(|_| DirectoryEntry::empty()).collect(),
        }
    }

    /// Load the whole entry table from the directory's backing file.
    pub fn fetch_from(&mut self, file: &OpenFile) {
        let size = file.length();
        let count = size / DIR_ENTRY_SIZE;
        let mut bytes = vec![0u8; count * DIR_ENTRY_SIZE];
        file.read_at(&mut bytes, 0);
        self.table = bytes
            .chunks_mut(DIR_ENTRY_SIZE)
            .map(DirectoryEntry::parse)
            .collect();
    }

    /// Store the whole entry table. The backing file must already be
    /// large enough; `add` tells the caller when it has to extend first.
    pub fn write_back(&self, file: &OpenFile) -> Result<(), &'static str> {
        let bytes = self.to_bytes();
        if file.write_at(&bytes, 0) != bytes.len() {
            return Err("directory: backing file too small for table");
        }
        Ok(())
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.table.len() * DIR_ENTRY_SIZE];
        for (i, entry) in self.table.iter().enumerate() {
            entry.serialize(&mut bytes[i * DIR_ENTRY_SIZE..(i + 1) * DIR_ENTRY_SIZE]);
        }
        bytes
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|e| e.in_use && e.name == name)
    }

    pub fn get(&self, index: usize) -> &DirectoryEntry {
        &self.table[index]
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.table
    }

    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Place `name` in the first free slot. When the table is full the
    /// entry is appended anyway and `true` comes back: the caller must
    /// extend the backing file by one entry's worth before writing back.
    pub fn add(&mut self, name: &str, sector: u32, is_dir: bool) -> bool {
        assert!(
            name.len() <= FILE_NAME_MAX_LEN,
            "directory: name longer than FILE_NAME_MAX_LEN"
        );
        let entry = DirectoryEntry {
            in_use: true,
            is_dir,
            sector,
            name: String::from(name),
        };
        match self.table.iter_mut().find(|e| !e.in_use) {
            Some(slot) => {
                *slot = entry;
                false
            }
            None => {
                self.table.push(entry);
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.find(name) {
            Some(i) => {
                self.table[i].in_use = false;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.iter().all(|e| !e.in_use)
    }

    /// Names currently in use, directories marked with a trailing slash.
    pub fn list(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|e| e.in_use)
            .map(|e| {
                if e.is_dir {
                    format!("{}/", e.name)
                } else {
                    e.name.clone()
                }
            })
            .collect()
    }

    /// Log the table contents, in-use or not.
    pub fn print(&self) {
        for (i, e) in self.table.iter().enumerate() {
            log::debug!(
                target: "fs",
                "dir entry {}: in_use={} is_dir={} sector={} name={:?}",
                i,
                e.in_use,
                e.is_dir,
                e.sector,
                e.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_fills_lowest_free_slot() {
        let mut dir = Directory::new(3);
        assert!(!dir.add("a", 10, false));
        assert!(!dir.add("b", 11, true));
        assert!(dir.remove("a"));
        assert!(!dir.add("c", 12, false));
        assert_eq!(dir.find("c"), Some(0));
        assert_eq!(dir.find("b"), Some(1));
    }

    #[test]
    fn add_signals_extension_when_full() {
        let mut dir = Directory::new(2);
        assert!(!dir.add("a", 10, false));
        assert!(!dir.add("b", 11, false));
        assert!(dir.add("c", 12, false));
        assert_eq!(dir.capacity(), 3);
        assert_eq!(dir.find("c"), Some(2));
    }

    #[test]
    fn entry_serialization_round_trips() {
        let entry = DirectoryEntry {
            in_use: true,
            is_dir: true,
            sector: 77,
            name: String::from("subdir"),
        };
        let mut bytes = vec![0u8; DIR_ENTRY_SIZE];
        entry.serialize(&mut bytes);
        let parsed = DirectoryEntry::parse(&mut bytes);
        assert!(parsed.in_use);
        assert!(parsed.is_dir);
        assert_eq!(parsed.sector, 77);
        assert_eq!(parsed.name, "subdir");
    }
}
