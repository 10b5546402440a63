//! The simulated hardware.
//!
//! Only machine *state* lives here: a sector disk over a host file,
//! physical memory plus the MMU's TLB, the register file, and a byte
//! console. The instruction interpreter that would drive this state is
//! not part of the crate; the kernel's fault and syscall entry points are
//! called directly by the embedder.

pub mod console;
pub mod disk;
pub mod mmu;

use crate::define::vm::NUM_TOTAL_REGS;
use crate::sync::spinlock::SpinLock;
use console::Console;
use mmu::{ExceptionType, Mmu, TranslationEntry};

/// The machine a kernel instance runs on.
pub struct Machine {
    mmu: SpinLock<Mmu>,
    regs: SpinLock<[i32; NUM_TOTAL_REGS]>,
    pub console: Console,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            mmu: SpinLock::new(Mmu::new(), "mmu"),
            regs: SpinLock::new([0; NUM_TOTAL_REGS], "machine registers"),
            console: Console::new(),
        }
    }

    pub fn read_register(&self, reg: usize) -> i32 {
        self.regs.acquire()[reg]
    }

    pub fn write_register(&self, reg: usize, value: i32) {
        self.regs.acquire()[reg] = value;
    }

    pub(crate) fn save_registers(&self, out: &mut [i32; NUM_TOTAL_REGS]) {
        out.copy_from_slice(&*self.regs.acquire());
    }

    pub(crate) fn restore_registers(&self, from: &[i32; NUM_TOTAL_REGS]) {
        self.regs.acquire().copy_from_slice(from);
    }

    /// Read `size` (1, 2 or 4) bytes of user memory at `vaddr` through the
    /// TLB.
    pub fn read_mem(&self, vaddr: usize, size: usize) -> Result<i32, ExceptionType> {
        self.mmu.acquire().read_mem(vaddr, size)
    }

    /// Write `size` (1, 2 or 4) bytes of user memory at `vaddr` through
    /// the TLB.
    pub fn write_mem(&self, vaddr: usize, size: usize, value: i32) -> Result<(), ExceptionType> {
        self.mmu.acquire().write_mem(vaddr, size, value)
    }

    /// Run `f` with the MMU held. The VM layer uses this for frame copies
    /// and TLB maintenance.
    pub(crate) fn with_mmu<R>(&self, f: impl FnOnce(&mut Mmu) -> R) -> R {
        f(&mut self.mmu.acquire())
    }

    /// Copy of the TLB, for inspection.
    pub fn tlb_snapshot(&self) -> Vec<TranslationEntry> {
        self.mmu.acquire().tlb.to_vec()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
