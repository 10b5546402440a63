use std::io::{Read, Write};

use crate::sync::spinlock::SpinLock;

/// Byte-at-a-time console over host stdio. Each direction is serialized
/// independently; only the syscall layer talks to it.
pub struct Console {
    input: SpinLock<()>,
    output: SpinLock<()>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            input: SpinLock::new((), "console input"),
            output: SpinLock::new((), "console output"),
        }
    }

    /// Read one byte from console input; `None` on end of input.
    pub fn get_char(&self) -> Option<u8> {
        let _guard = self.input.acquire();
        let mut byte = [0u8; 1];
        match std::io::stdin().read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    pub fn put_char(&self, byte: u8) {
        let _guard = self.output.acquire();
        let mut out = std::io::stdout();
        let _ = out.write_all(&[byte]);
        let _ = out.flush();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
