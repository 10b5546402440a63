/// Open files per process, console fids included.
pub const MAX_OPEN_FILES: usize = 16;

/// File id of console input.
pub const CONSOLE_INPUT: usize = 0;
/// File id of console output.
pub const CONSOLE_OUTPUT: usize = 1;
/// First file id handed out for regular files.
pub const FIRST_FILE_FID: usize = 2;

/// Name prefix of per-process swap files, completed with the pid.
pub const SWAP_PREFIX: &str = "/SWAP.";
