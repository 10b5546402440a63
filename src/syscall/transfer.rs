use std::sync::Arc;

use crate::define::vm::{MAX_MEM_TRIES, PAGE_SIZE};
use crate::machine::mmu::ExceptionType;
use crate::machine::Machine;
use crate::vm::addr_space::AddressSpace;

/// Resolve a fault at `vaddr`: make the page resident (executable or
/// swap) and push its translation into the TLB.
pub fn service_fault(space: &Arc<AddressSpace>, vaddr: usize) -> Result<(), &'static str> {
    let vpn = vaddr / PAGE_SIZE;
    space.translation_entry(vpn)?;
    space.set_tlb_page(vpn)
}

// A user access is retried a bounded number of times, servicing the page
// fault between tries; anything else aborts the transfer.
fn with_retries<T>(
    space: &Arc<AddressSpace>,
    mut access: impl FnMut() -> Result<T, ExceptionType>,
) -> Result<T, &'static str> {
    for _ in 0..MAX_MEM_TRIES {
        match access() {
            Ok(value) => return Ok(value),
            Err(ExceptionType::PageFault(vaddr)) => service_fault(space, vaddr)?,
            Err(e) => {
                log::debug!(target: "syscall", "user access fault: {:?}", e);
                return Err("transfer: user memory access fault");
            }
        }
    }
    Err("transfer: user memory access kept faulting")
}

/// Read a NUL-terminated user string of at most `max_len` bytes.
pub fn read_string_from_user(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    addr: usize,
    max_len: usize,
) -> Result<String, &'static str> {
    if addr == 0 {
        return Err("transfer: null user pointer");
    }
    let mut bytes = Vec::new();
    let mut at = addr;
    loop {
        let byte = with_retries(space, || machine.read_mem(at, 1))? as u8;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        if bytes.len() > max_len {
            return Err("transfer: user string too long");
        }
        at += 1;
    }
    String::from_utf8(bytes).map_err(|_| "transfer: user string is not valid utf-8")
}

pub fn read_buffer_from_user(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    addr: usize,
    len: usize,
) -> Result<Vec<u8>, &'static str> {
    if addr == 0 {
        return Err("transfer: null user pointer");
    }
    let mut bytes = Vec::with_capacity(len);
    for i in 0..len {
        let byte = with_retries(space, || machine.read_mem(addr + i, 1))? as u8;
        bytes.push(byte);
    }
    Ok(bytes)
}

pub fn write_buffer_to_user(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    addr: usize,
    bytes: &[u8],
) -> Result<(), &'static str> {
    if addr == 0 {
        return Err("transfer: null user pointer");
    }
    for (i, &byte) in bytes.iter().enumerate() {
        with_retries(space, || machine.write_mem(addr + i, 1, byte as i32))?;
    }
    Ok(())
}

/// Read a 32-bit little-endian user word.
pub fn read_word_from_user(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    addr: usize,
) -> Result<i32, &'static str> {
    with_retries(space, || machine.read_mem(addr, 4))
}

pub fn write_word_to_user(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    addr: usize,
    value: i32,
) -> Result<(), &'static str> {
    with_retries(space, || machine.write_mem(addr, 4, value))
}
