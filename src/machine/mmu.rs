use array_macro::array;
use bitflags::bitflags;

use crate::define::vm::{MEMORY_SIZE, PAGE_SIZE, TLB_SIZE};

bitflags! {
    /// Status bits of a translation entry.
    pub struct EntryFlags: u32 {
        const VALID     = 1 << 0;
        const USE       = 1 << 1;
        const DIRTY     = 1 << 2;
        const READ_ONLY = 1 << 3;
    }
}

/// One virtual-to-physical translation, as stored in the page table and
/// in the TLB.
#[derive(Clone, Copy, Debug)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub flags: EntryFlags,
}

impl TranslationEntry {
    pub fn invalid() -> Self {
        Self {
            virtual_page: 0,
            physical_page: 0,
            flags: EntryFlags::empty(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }
}

/// Faults a memory access can raise. The syscall transfer path services
/// page faults and retries; everything else aborts the access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionType {
    /// No valid translation for the page; carries the faulting address.
    PageFault(usize),
    /// Write through a read-only translation.
    ReadOnly(usize),
    /// Address outside physical memory after translation.
    BusError(usize),
    /// Misaligned or otherwise malformed access.
    AddressError(usize),
}

/// Simulated physical memory plus the fully-associative TLB.
///
/// Translation consults only the TLB; a miss is a page fault even when
/// the page table has a valid entry. The VM layer refills slots through
/// [`crate::vm::addr_space::AddressSpace::set_tlb_page`].
pub struct Mmu {
    pub memory: Box<[u8]>,
    pub tlb: [TranslationEntry; TLB_SIZE],
}

impl Mmu {
    pub fn new() -> Self {
        Self {
            memory: vec![0u8; MEMORY_SIZE].into_boxed_slice(),
            tlb: array![_ => TranslationEntry::invalid(); TLB_SIZE],
        }
    }

    /// Translate `vaddr`, maintaining the USE and DIRTY bits of the hit
    /// entry.
    fn translate(&mut self, vaddr: usize, writing: bool) -> Result<usize, ExceptionType> {
        let vpn = vaddr / PAGE_SIZE;
        let offset = vaddr % PAGE_SIZE;
        let entry = self
            .tlb
            .iter_mut()
            .find(|e| e.is_valid() && e.virtual_page == vpn)
            .ok_or(ExceptionType::PageFault(vaddr))?;
        if writing && entry.flags.contains(EntryFlags::READ_ONLY) {
            return Err(ExceptionType::ReadOnly(vaddr));
        }
        entry.flags.insert(EntryFlags::USE);
        if writing {
            entry.flags.insert(EntryFlags::DIRTY);
        }
        let paddr = entry.physical_page * PAGE_SIZE + offset;
        if paddr >= self.memory.len() {
            return Err(ExceptionType::BusError(vaddr));
        }
        Ok(paddr)
    }

    pub fn read_mem(&mut self, vaddr: usize, size: usize) -> Result<i32, ExceptionType> {
        if !matches!(size, 1 | 2 | 4) || vaddr % size != 0 {
            return Err(ExceptionType::AddressError(vaddr));
        }
        let paddr = self.translate(vaddr, false)?;
        let mut value: u32 = 0;
        for i in 0..size {
            value |= (self.memory[paddr + i] as u32) << (8 * i);
        }
        Ok(value as i32)
    }

    pub fn write_mem(&mut self, vaddr: usize, size: usize, value: i32) -> Result<(), ExceptionType> {
        if !matches!(size, 1 | 2 | 4) || vaddr % size != 0 {
            return Err(ExceptionType::AddressError(vaddr));
        }
        let paddr = self.translate(vaddr, true)?;
        for i in 0..size {
            self.memory[paddr + i] = ((value as u32) >> (8 * i)) as u8;
        }
        Ok(())
    }

    /// One whole frame as a slice.
    pub fn frame(&self, frame: usize) -> &[u8] {
        &self.memory[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE]
    }

    pub fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        &mut self.memory[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE]
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}
