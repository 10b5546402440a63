//! System-call decode and dispatch.
//!
//! Calling convention: syscall id in r2, arguments in r4..r7, result back
//! in r2. Detailed failure kinds are logged; the caller only ever sees
//! `-1`. After every call that returns, the PC triplet advances so the
//! interpreter would not re-trap on the same instruction.

pub mod transfer;

use std::sync::Arc;

use crate::define::fs::FILE_NAME_MAX_LEN;
use crate::define::param::{CONSOLE_INPUT, CONSOLE_OUTPUT, FIRST_FILE_FID};
use crate::define::vm::{NEXT_PC_REG, PC_REG, PREV_PC_REG, STACK_REG};
use crate::machine::Machine;
use crate::system::Kernel;
use crate::thread;
use crate::vm::addr_space::AddressSpace;
use transfer::{
    read_buffer_from_user, read_string_from_user, read_word_from_user, write_buffer_to_user,
    write_word_to_user,
};

/// Longest path name accepted from user memory.
const MAX_PATH_LEN: usize = 64;
/// Bounds on `Exec` argument vectors.
const MAX_ARGS: usize = 16;
const MAX_ARG_LEN: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallCode {
    Halt = 0,
    Create = 1,
    Remove = 2,
    Exit = 3,
    Open = 4,
    Close = 5,
    Read = 6,
    Write = 7,
    Join = 8,
    Exec = 9,
}

impl SyscallCode {
    fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Halt),
            1 => Some(Self::Create),
            2 => Some(Self::Remove),
            3 => Some(Self::Exit),
            4 => Some(Self::Open),
            5 => Some(Self::Close),
            6 => Some(Self::Read),
            7 => Some(Self::Write),
            8 => Some(Self::Join),
            9 => Some(Self::Exec),
            _ => None,
        }
    }
}

/// What the trap shell should do after a syscall was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume the user program.
    Continue,
    /// Stop the whole machine.
    Halt,
    /// The calling process is done; tear down its thread.
    Exit(i32),
}

fn current_space() -> Result<Arc<AddressSpace>, &'static str> {
    thread::current()
        .space()
        .ok_or("syscall: calling thread has no address space")
}

fn increment_pc(machine: &Machine) {
    let pc = machine.read_register(PC_REG);
    machine.write_register(PREV_PC_REG, pc);
    let next = machine.read_register(NEXT_PC_REG);
    machine.write_register(PC_REG, next);
    machine.write_register(NEXT_PC_REG, next + 4);
}

/// Handle the system call currently encoded in the register file.
pub fn handle_syscall(kernel: &Arc<Kernel>) -> SyscallOutcome {
    let machine = &kernel.machine;
    let id = machine.read_register(2);
    let code = match SyscallCode::from_id(id) {
        Some(code) => code,
        None => {
            log::debug!(target: "syscall", "unknown syscall id {}", id);
            machine.write_register(2, -1);
            increment_pc(machine);
            return SyscallOutcome::Continue;
        }
    };
    log::trace!(target: "syscall", "handling {:?}", code);

    match code {
        SyscallCode::Halt => return SyscallOutcome::Halt,
        SyscallCode::Exit => {
            let status = machine.read_register(4);
            // Dropping the space frees its frames and swap file.
            thread::current().set_space(None);
            return SyscallOutcome::Exit(status);
        }
        _ => {}
    }

    let result = match code {
        SyscallCode::Create => sys_create(kernel),
        SyscallCode::Remove => sys_remove(kernel),
        SyscallCode::Open => sys_open(kernel),
        SyscallCode::Close => sys_close(kernel),
        SyscallCode::Read => sys_read(kernel),
        SyscallCode::Write => sys_write(kernel),
        SyscallCode::Join => sys_join(kernel),
        SyscallCode::Exec => sys_exec(kernel),
        SyscallCode::Halt | SyscallCode::Exit => unreachable!(),
    };
    match result {
        Ok(value) => machine.write_register(2, value),
        Err(kind) => {
            log::debug!(target: "syscall", "{:?} failed: {}", code, kind);
            machine.write_register(2, -1);
        }
    }
    increment_pc(machine);
    SyscallOutcome::Continue
}

fn sys_create(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let space = current_space()?;
    let addr = kernel.machine.read_register(4) as usize;
    let name = read_string_from_user(&kernel.machine, &space, addr, MAX_PATH_LEN)?;
    kernel.file_system.create(&name, 0, false)?;
    Ok(0)
}

fn sys_remove(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let space = current_space()?;
    let addr = kernel.machine.read_register(4) as usize;
    let name = read_string_from_user(&kernel.machine, &space, addr, MAX_PATH_LEN)?;
    kernel.file_system.remove(&name)?;
    Ok(0)
}

fn sys_open(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let space = current_space()?;
    let addr = kernel.machine.read_register(4) as usize;
    let name = read_string_from_user(&kernel.machine, &space, addr, MAX_PATH_LEN)?;
    let file = kernel
        .file_system
        .open(&name)
        .ok_or("open: no such file")?;
    let fid = thread::current()
        .add_file(file)
        .ok_or("open: too many open files")?;
    Ok(fid as i32)
}

fn sys_close(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let fid = kernel.machine.read_register(4);
    if fid < FIRST_FILE_FID as i32 {
        return Err("close: not a closable file id");
    }
    thread::current()
        .remove_file(fid as usize)
        .ok_or("close: file id not open")?;
    Ok(1)
}

fn sys_read(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let machine = &kernel.machine;
    let space = current_space()?;
    let addr = machine.read_register(4) as usize;
    let size = machine.read_register(5);
    let fid = machine.read_register(6);
    if size < 0 || fid < 0 {
        return Err("read: negative size or file id");
    }
    let size = size as usize;
    match fid as usize {
        CONSOLE_OUTPUT => Err("read: console output is write-only"),
        CONSOLE_INPUT => {
            let mut data = Vec::with_capacity(size);
            while data.len() < size {
                match machine.console.get_char() {
                    Some(byte) => data.push(byte),
                    None => break,
                }
            }
            write_buffer_to_user(machine, &space, addr, &data)?;
            Ok(data.len() as i32)
        }
        fid => {
            let file = thread::current()
                .get_file(fid)
                .ok_or("read: file id not open")?;
            let mut data = vec![0u8; size];
            let n = file.read(&mut data)?;
            write_buffer_to_user(machine, &space, addr, &data[..n])?;
            Ok(n as i32)
        }
    }
}

fn sys_write(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let machine = &kernel.machine;
    let space = current_space()?;
    let addr = machine.read_register(4) as usize;
    let size = machine.read_register(5);
    let fid = machine.read_register(6);
    if size < 0 || fid < 0 {
        return Err("write: negative size or file id");
    }
    let data = read_buffer_from_user(machine, &space, addr, size as usize)?;
    match fid as usize {
        CONSOLE_INPUT => Err("write: console input is read-only"),
        CONSOLE_OUTPUT => {
            for &byte in &data {
                machine.console.put_char(byte);
            }
            Ok(data.len() as i32)
        }
        fid => {
            let file = thread::current()
                .get_file(fid)
                .ok_or("write: file id not open")?;
            let n = file.write(&data)?;
            Ok(n as i32)
        }
    }
}

fn sys_join(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let pid = kernel.machine.read_register(4);
    if pid < 0 {
        return Err("join: negative space id");
    }
    let child = kernel
        .process(pid as usize)
        .ok_or("join: no such process")?;
    if !child.joinable() {
        return Err("join: process is not joinable");
    }
    let status = child.join();
    kernel.take_process(pid as usize);
    Ok(status)
}

fn sys_exec(kernel: &Arc<Kernel>) -> Result<i32, &'static str> {
    let machine = &kernel.machine;
    let space = current_space()?;
    let name_addr = machine.read_register(4) as usize;
    let joinable = machine.read_register(5) != 0;
    let argv_addr = machine.read_register(6) as usize;

    let name = read_string_from_user(machine, &space, name_addr, MAX_PATH_LEN)?;
    let args = if argv_addr != 0 {
        read_argv(machine, &space, argv_addr)?
    } else {
        Vec::new()
    };

    let executable = kernel
        .file_system
        .open(&name)
        .ok_or("exec: cannot open executable")?;
    let pid = kernel.alloc_pid();
    let new_space = AddressSpace::new(kernel, executable, pid, kernel.load_policy())?;

    let kernel_for_child = kernel.clone();
    let child = thread::fork(&name, joinable, 0, move || {
        start_process(&kernel_for_child, new_space, &args);
        // The MIPS interpreter would take over the register state set up
        // above; without one the process body ends here.
        0
    });
    kernel.register_process(pid, child);
    Ok(pid as i32)
}

/// First code run by an `Exec`'d process thread: install the space, set
/// up registers and the argument vector.
pub fn start_process(kernel: &Arc<Kernel>, space: Arc<AddressSpace>, args: &[String]) {
    let current = thread::current();
    current.set_space(Some(space.clone()));
    space.init_registers();
    space.restore_state();
    if !args.is_empty() {
        if let Err(kind) = write_args(&kernel.machine, &space, args) {
            log::debug!(target: "syscall", "writing exec args failed: {}", kind);
        }
    }
}

fn read_argv(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    argv_addr: usize,
) -> Result<Vec<String>, &'static str> {
    let mut args = Vec::new();
    let mut at = argv_addr;
    loop {
        let ptr = read_word_from_user(machine, space, at)? as u32 as usize;
        if ptr == 0 {
            break;
        }
        args.push(read_string_from_user(machine, space, ptr, MAX_ARG_LEN)?);
        if args.len() > MAX_ARGS {
            return Err("exec: too many arguments");
        }
        at += 4;
    }
    Ok(args)
}

/// Copy `args` onto the new process's stack: string bytes first, then
/// the aligned pointer array; argc and argv land in r4/r5.
fn write_args(
    machine: &Machine,
    space: &Arc<AddressSpace>,
    args: &[String],
) -> Result<(), &'static str> {
    let mut sp = machine.read_register(STACK_REG) as usize;
    let mut addrs = Vec::with_capacity(args.len());
    for arg in args {
        sp -= arg.len() + 1;
        write_buffer_to_user(machine, space, sp, arg.as_bytes())?;
        write_buffer_to_user(machine, space, sp + arg.len(), &[0])?;
        addrs.push(sp);
    }
    sp &= !3;
    sp -= 4 * (addrs.len() + 1);
    for (i, &addr) in addrs.iter().enumerate() {
        write_word_to_user(machine, space, sp + 4 * i, addr as i32)?;
    }
    write_word_to_user(machine, space, sp + 4 * addrs.len(), 0)?;

    machine.write_register(4, addrs.len() as i32);
    machine.write_register(5, sp as i32);
    // MIPS calling convention: leave room for the callee's save area.
    machine.write_register(STACK_REG, (sp - 24) as i32);
    Ok(())
}

// Name-length sanity shared with the file system: syscall strings are
// bounded well above the directory's per-name bound, so the file system
// itself rejects long names.
const _: () = assert!(MAX_PATH_LEN > FILE_NAME_MAX_LEN);
