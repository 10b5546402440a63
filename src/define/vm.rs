use super::fs::SECTOR_SIZE;

/// Size of a virtual/physical page. Matching the sector size keeps swap
/// transfers a whole number of sectors.
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// Number of physical frames in the simulated machine.
pub const NUM_PHYS_PAGES: usize = 32;

/// Bytes of simulated physical memory.
pub const MEMORY_SIZE: usize = NUM_PHYS_PAGES * PAGE_SIZE;

/// Number of TLB slots in the simulated MMU.
pub const TLB_SIZE: usize = 4;

/// Stack space reserved at the top of every user address space.
pub const USER_STACK_SIZE: usize = 1024;

/// How many times a user-memory access is attempted before the syscall is
/// aborted; retries give the fault handler a chance to load the page.
pub const MAX_MEM_TRIES: usize = 3;

// Register file layout of the simulated CPU. r0..r31 are the MIPS
// general-purpose registers; the rest is bookkeeping the interpreter
// would maintain.
pub const NUM_GP_REGS: usize = 32;
pub const STACK_REG: usize = 29;
pub const RET_ADDR_REG: usize = 31;
pub const HI_REG: usize = 32;
pub const LO_REG: usize = 33;
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;
pub const PREV_PC_REG: usize = 36;
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;
