use std::sync::Arc;

use crate::define::fs::SECTOR_SIZE;
use crate::define::param::SWAP_PREFIX;
use crate::define::vm::{NEXT_PC_REG, NUM_TOTAL_REGS, PAGE_SIZE, PC_REG, STACK_REG, TLB_SIZE, USER_STACK_SIZE};
use crate::fs::bitmap::Bitmap;
use crate::fs::file_system::FileSystem;
use crate::fs::open_file::OpenFile;
use crate::machine::mmu::{EntryFlags, TranslationEntry};
use crate::machine::Machine;
use crate::sync::spinlock::SpinLock;
use crate::system::Kernel;
use crate::vm::core_map::CoreMap;
use crate::vm::executable::{Executable, Segment};

/// How an address space populates physical memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Claim every frame up front and copy the whole image in.
    Eager,
    /// Leave pages invalid and load each one on its first fault.
    Demand,
    /// Demand loading plus a per-process swap file backing evictions.
    DemandSwap,
}

struct SwapState {
    file: Arc<OpenFile>,
    name: String,
    in_swap: SpinLock<Bitmap>,
}

/// The memory of one user process: its page table, its segments, the
/// executable kept open for demand loading, and under [`LoadPolicy::DemandSwap`]
/// the swap file named after the pid.
///
/// An address space owns its page table and swap file; the core map only
/// holds weak references back, to call [`AddressSpace::write_to_swap`] on
/// eviction.
pub struct AddressSpace {
    pid: usize,
    policy: LoadPolicy,
    num_pages: usize,
    code: Segment,
    init_data: Segment,
    exec: Executable,
    machine: Arc<Machine>,
    file_system: Arc<FileSystem>,
    used_pages: Arc<SpinLock<Bitmap>>,
    core_map: Arc<CoreMap>,
    page_table: SpinLock<Vec<TranslationEntry>>,
    tlb_index: SpinLock<usize>,
    swap: Option<SwapState>,
}

impl AddressSpace {
    /// Build the address space of `exec_file` for process `pid`.
    ///
    /// `num_pages` covers the image plus [`USER_STACK_SIZE`]. Under
    /// [`LoadPolicy::Eager`] the frames are claimed, zeroed and filled
    /// here; the other policies start with every translation invalid.
    pub fn new(
        kernel: &Arc<Kernel>,
        exec_file: Arc<OpenFile>,
        pid: usize,
        policy: LoadPolicy,
    ) -> Result<Arc<AddressSpace>, &'static str> {
        let exec = Executable::new(exec_file)?;
        let size = exec.size() + USER_STACK_SIZE;
        let num_pages = size.div_ceil(PAGE_SIZE);
        log::debug!(
            target: "vm",
            "initializing address space for pid {}: {} pages, {} bytes",
            pid,
            num_pages,
            num_pages * PAGE_SIZE
        );

        let swap = if policy == LoadPolicy::DemandSwap {
            let name = format!("{}{}", SWAP_PREFIX, pid);
            kernel
                .file_system
                .create(&name, num_pages * PAGE_SIZE, false)
                .map_err(|_| "address space: cannot create swap file")?;
            let file = kernel
                .file_system
                .open(&name)
                .ok_or("address space: cannot open swap file")?;
            Some(SwapState {
                file,
                name,
                in_swap: SpinLock::new(Bitmap::new(num_pages), "in-swap bitmap"),
            })
        } else {
            None
        };

        let mut page_table = Vec::with_capacity(num_pages);
        for vpn in 0..num_pages {
            page_table.push(TranslationEntry {
                virtual_page: vpn,
                physical_page: 0,
                flags: EntryFlags::empty(),
            });
        }

        let space = Self {
            pid,
            policy,
            num_pages,
            code: exec.code(),
            init_data: exec.init_data(),
            exec,
            machine: kernel.machine.clone(),
            file_system: kernel.file_system.clone(),
            used_pages: kernel.used_pages.clone(),
            core_map: kernel.core_map.clone(),
            page_table: SpinLock::new(page_table, "page table"),
            tlb_index: SpinLock::new(0, "tlb index"),
            swap,
        };

        if policy == LoadPolicy::Eager {
            space.load_eagerly()?;
        }
        Ok(Arc::new(space))
    }

    fn load_eagerly(&self) -> Result<(), &'static str> {
        {
            let mut used = self.used_pages.acquire();
            if used.count_clear() < self.num_pages {
                return Err("address space: does not fit in physical memory");
            }
            let mut page_table = self.page_table.acquire();
            for entry in page_table.iter_mut() {
                entry.physical_page = used.find().expect("free count checked above");
                entry.flags = EntryFlags::VALID;
            }
        }

        // Disk I/O can suspend, so do it before taking the table lock.
        let mut code = vec![0u8; self.code.size];
        self.exec.read_code_block(&mut code, 0);
        let mut data = vec![0u8; self.init_data.size];
        self.exec.read_data_block(&mut data, 0);

        let page_table = self.page_table.acquire();
        self.machine.with_mmu(|mmu| {
            for entry in page_table.iter() {
                mmu.frame_mut(entry.physical_page).fill(0);
            }
        });
        self.copy_in(&page_table, self.code.virtual_addr, &code);
        self.copy_in(&page_table, self.init_data.virtual_addr, &data);
        Ok(())
    }

    fn copy_in(&self, page_table: &[TranslationEntry], vaddr: usize, bytes: &[u8]) {
        self.machine.with_mmu(|mmu| {
            for (i, &b) in bytes.iter().enumerate() {
                let at = vaddr + i;
                let frame = page_table[at / PAGE_SIZE].physical_page;
                mmu.memory[frame * PAGE_SIZE + at % PAGE_SIZE] = b;
            }
        });
    }

    pub fn pid(&self) -> usize {
        self.pid
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub(crate) fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// The page-fault entry point: make sure `vpn` is resident and return
    /// its translation.
    pub fn translation_entry(self: &Arc<Self>, vpn: usize) -> Result<TranslationEntry, &'static str> {
        if vpn >= self.num_pages {
            return Err("translation: virtual page out of range");
        }
        let valid = self.page_table.acquire()[vpn].is_valid();
        if !valid {
            let swapped = self
                .swap
                .as_ref()
                .map(|s| s.in_swap.acquire().test(vpn))
                .unwrap_or(false);
            if swapped {
                self.read_from_swap(vpn)?;
            } else {
                self.load_page(vpn)?;
            }
        }
        Ok(self.page_table.acquire()[vpn])
    }

    /// Populate `vpn` from the executable image: code bytes, initialized
    /// data, and zero fill for everything past them. A page lying wholly
    /// inside the code segment is mapped read-only.
    pub fn load_page(self: &Arc<Self>, vpn: usize) -> Result<(), &'static str> {
        log::debug!(target: "vm", "pid {}: loading page {}", self.pid, vpn);
        let frame = self.claim_frame(vpn)?;

        let vaddr = vpn * PAGE_SIZE;
        let code_end = self.code.size;
        let data_end = self.code.size + self.init_data.size;
        let mut buf = [0u8; PAGE_SIZE];
        let mut read_only = false;

        if vaddr >= data_end {
            // Uninitialized data or stack: stays zero.
        } else if vaddr >= code_end {
            let n = PAGE_SIZE.min(data_end - vaddr);
            self.exec.read_data_block(&mut buf[..n], vaddr - code_end);
        } else {
            let n = PAGE_SIZE.min(code_end - vaddr);
            self.exec.read_code_block(&mut buf[..n], vaddr);
            read_only = n == PAGE_SIZE;
            if n < PAGE_SIZE && vaddr + n < data_end {
                let m = (PAGE_SIZE - n).min(data_end - (vaddr + n));
                self.exec.read_data_block(&mut buf[n..n + m], 0);
            }
        }

        self.machine
            .with_mmu(|mmu| mmu.frame_mut(frame).copy_from_slice(&buf));

        let mut page_table = self.page_table.acquire();
        let entry = &mut page_table[vpn];
        entry.virtual_page = vpn;
        entry.physical_page = frame;
        entry.flags = if read_only {
            EntryFlags::VALID | EntryFlags::READ_ONLY
        } else {
            EntryFlags::VALID
        };
        Ok(())
    }

    fn claim_frame(self: &Arc<Self>, vpn: usize) -> Result<usize, &'static str> {
        match self.policy {
            LoadPolicy::DemandSwap => Ok(self.core_map.find(vpn, self)),
            _ => self
                .used_pages
                .acquire()
                .find()
                .ok_or("address space: out of physical frames"),
        }
    }

    /// Bring `vpn` back from the swap file.
    pub fn read_from_swap(self: &Arc<Self>, vpn: usize) -> Result<(), &'static str> {
        let swap = self.swap.as_ref().ok_or("address space: no swap file")?;
        let frame = self.core_map.find(vpn, self);
        log::debug!(
            target: "vm",
            "pid {}: swapping vpn {} back into frame {}",
            self.pid,
            vpn,
            frame
        );

        let mut buf = [0u8; PAGE_SIZE];
        swap.file.read_at(&mut buf, vpn * PAGE_SIZE);
        self.machine
            .with_mmu(|mmu| mmu.frame_mut(frame).copy_from_slice(&buf));
        swap.in_swap.acquire().clear(vpn);

        let mut page_table = self.page_table.acquire();
        let entry = &mut page_table[vpn];
        entry.virtual_page = vpn;
        entry.physical_page = frame;
        // Protection survives the round trip through swap.
        entry.flags = (entry.flags & EntryFlags::READ_ONLY) | EntryFlags::VALID;
        Ok(())
    }

    /// Evict `vpn`: called by the core map when this space loses a frame.
    ///
    /// The page goes to the swap file when it is dirty or was never
    /// written there; a clean page whose swap copy is current is skipped.
    /// Any TLB slot for the page is folded back and invalidated, and the
    /// translation goes invalid.
    pub(crate) fn write_to_swap(&self, vpn: usize) {
        let swap = match &self.swap {
            Some(s) => s,
            None => panic!("write_to_swap without a swap file"),
        };
        let (frame, table_dirty) = {
            let mut page_table = self.page_table.acquire();
            let entry = &mut page_table[vpn];
            if !entry.is_valid() {
                return;
            }
            let frame = entry.physical_page;
            let dirty = entry.flags.contains(EntryFlags::DIRTY);
            entry.flags &= EntryFlags::READ_ONLY;
            (frame, dirty)
        };
        let tlb_flags = self.machine.with_mmu(|mmu| {
            let mut flags = None;
            for slot in mmu.tlb.iter_mut() {
                if slot.is_valid() && slot.virtual_page == vpn {
                    flags = Some(slot.flags);
                    slot.flags = EntryFlags::empty();
                }
            }
            flags
        });
        let dirty = table_dirty || tlb_flags.is_some_and(|f| f.contains(EntryFlags::DIRTY));

        let never_swapped = !swap.in_swap.acquire().test(vpn);
        if dirty || never_swapped {
            log::debug!(
                target: "vm",
                "pid {}: evicting vpn {} from frame {} ({})",
                self.pid,
                vpn,
                frame,
                if dirty { "dirty" } else { "first eviction" }
            );
            let mut buf = [0u8; PAGE_SIZE];
            self.machine
                .with_mmu(|mmu| buf.copy_from_slice(mmu.frame(frame)));
            swap.file.write_at(&buf, vpn * PAGE_SIZE);
            swap.in_swap.acquire().mark(vpn);
        } else {
            log::debug!(
                target: "vm",
                "pid {}: evicting clean vpn {} from frame {}",
                self.pid,
                vpn,
                frame
            );
        }
    }

    /// Insert the translation for `vpn` at the rotating TLB index,
    /// folding the evicted slot's bits back into the page table first.
    pub fn set_tlb_page(self: &Arc<Self>, vpn: usize) -> Result<(), &'static str> {
        let entry = {
            let page_table = self.page_table.acquire();
            let entry = page_table
                .get(vpn)
                .copied()
                .ok_or("set_tlb_page: virtual page out of range")?;
            if !entry.is_valid() {
                return Err("set_tlb_page: translation not resident");
            }
            entry
        };
        let evicted = self.machine.with_mmu(|mmu| {
            let index = {
                let mut i = self.tlb_index.acquire();
                let index = *i;
                *i = (index + 1) % TLB_SIZE;
                index
            };
            let evicted = mmu.tlb[index];
            mmu.tlb[index] = entry;
            evicted
        });
        if evicted.is_valid() {
            self.fold_tlb_entry(&evicted);
        }
        if self.policy == LoadPolicy::DemandSwap {
            self.core_map.page_used(entry.physical_page);
        }
        Ok(())
    }

    fn fold_tlb_entry(&self, slot: &TranslationEntry) {
        let mut page_table = self.page_table.acquire();
        if let Some(entry) = page_table.get_mut(slot.virtual_page) {
            if entry.is_valid() && entry.physical_page == slot.physical_page {
                entry.flags |= slot.flags & (EntryFlags::USE | EntryFlags::DIRTY);
            }
        }
    }

    /// Context-switch out: fold every valid TLB slot's bits back into the
    /// page table and invalidate the slot.
    pub fn save_state(&self) {
        let flushed = self.machine.with_mmu(|mmu| {
            let mut flushed = Vec::new();
            for slot in mmu.tlb.iter_mut() {
                if slot.is_valid() {
                    flushed.push(*slot);
                    slot.flags = EntryFlags::empty();
                }
            }
            flushed
        });
        for slot in &flushed {
            self.fold_tlb_entry(slot);
        }
    }

    /// Context-switch in: the TLB holds nothing of ours, flush it all.
    pub fn restore_state(&self) {
        self.machine.with_mmu(|mmu| {
            for slot in mmu.tlb.iter_mut() {
                slot.flags = EntryFlags::empty();
            }
        });
    }

    /// Initial register state: execution starts at virtual address zero,
    /// stack at the top of the space with a small safety margin.
    pub fn init_registers(&self) {
        for reg in 0..NUM_TOTAL_REGS {
            self.machine.write_register(reg, 0);
        }
        self.machine.write_register(PC_REG, 0);
        self.machine.write_register(NEXT_PC_REG, 4);
        self.machine
            .write_register(STACK_REG, (self.num_pages * PAGE_SIZE - 16) as i32);
    }

    /// Copy of the current page table, for inspection.
    pub fn page_table_snapshot(&self) -> Vec<TranslationEntry> {
        self.page_table.acquire().clone()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        {
            let page_table = self.page_table.acquire();
            for entry in page_table.iter() {
                if entry.is_valid() {
                    match self.policy {
                        LoadPolicy::DemandSwap => self.core_map.clear(entry.physical_page),
                        _ => self.used_pages.acquire().clear(entry.physical_page),
                    }
                }
            }
        }
        if let Some(swap) = &self.swap {
            // The swap file is still open here; removal is deferred to
            // the handle drop right after this.
            if self.file_system.remove(&swap.name).is_err() {
                log::debug!(target: "vm", "pid {}: swap file already gone", self.pid);
            }
        }
    }
}

// SECTOR_SIZE == PAGE_SIZE keeps swap transfers sector aligned; the
// assumption is relied on above.
const _: [(); SECTOR_SIZE] = [(); PAGE_SIZE];
