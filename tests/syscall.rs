mod common;

use std::sync::{Arc, Mutex, MutexGuard};

use ferrokern::define::vm::{NEXT_PC_REG, PC_REG};
use ferrokern::syscall::transfer::{read_buffer_from_user, write_buffer_to_user};
use ferrokern::syscall::{handle_syscall, SyscallOutcome};
use ferrokern::thread;
use ferrokern::vm::{AddressSpace, Executable, LoadPolicy, ReplacementPolicy};
use ferrokern::Kernel;

use common::{put_file, scratch_kernel};

// Syscall tests adopt the test thread as a process and may fork others;
// within this process they share the one virtual CPU.
static SERIAL: Mutex<()> = Mutex::new(());

fn serialize() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Boot a kernel and install an address space on the calling thread, as
/// the trap shell would for a running user program.
fn boot_process(load: LoadPolicy) -> (Arc<Kernel>, Arc<AddressSpace>) {
    let kernel = scratch_kernel(load, ReplacementPolicy::Fifo);
    let image = Executable::build_image(&[], &[], 4096);
    let file = put_file(&kernel.file_system, "shell", &image);
    let space = AddressSpace::new(&kernel, file, 1, load).expect("address space");
    thread::current().set_space(Some(space.clone()));
    space.init_registers();
    space.restore_state();
    (kernel, space)
}

fn syscall(kernel: &Arc<Kernel>, id: i32, args: [i32; 3]) -> SyscallOutcome {
    kernel.machine.write_register(2, id);
    kernel.machine.write_register(4, args[0]);
    kernel.machine.write_register(5, args[1]);
    kernel.machine.write_register(6, args[2]);
    handle_syscall(kernel)
}

fn result(kernel: &Arc<Kernel>) -> i32 {
    kernel.machine.read_register(2)
}

#[test]
fn create_open_write_read_close_via_syscalls() {
    let _serial = serialize();
    let (kernel, space) = boot_process(LoadPolicy::Demand);

    // Stage the strings and buffers in user memory.
    write_buffer_to_user(&kernel.machine, &space, 16, b"foo\0").unwrap();
    write_buffer_to_user(&kernel.machine, &space, 64, b"ABCDEFGH").unwrap();

    assert_eq!(syscall(&kernel, 1, [16, 0, 0]), SyscallOutcome::Continue);
    assert_eq!(result(&kernel), 0, "Create");

    assert_eq!(syscall(&kernel, 4, [16, 0, 0]), SyscallOutcome::Continue);
    let fid = result(&kernel);
    assert!(fid >= 2, "user file ids start at 2, got {}", fid);

    assert_eq!(syscall(&kernel, 7, [64, 8, fid]), SyscallOutcome::Continue);
    assert_eq!(result(&kernel), 8, "Write");

    assert_eq!(syscall(&kernel, 5, [fid, 0, 0]), SyscallOutcome::Continue);
    assert_eq!(result(&kernel), 1, "Close");

    assert_eq!(syscall(&kernel, 4, [16, 0, 0]), SyscallOutcome::Continue);
    let fid = result(&kernel);
    assert!(fid >= 2);

    assert_eq!(syscall(&kernel, 6, [128, 8, fid]), SyscallOutcome::Continue);
    assert_eq!(result(&kernel), 8, "Read");
    let back = read_buffer_from_user(&kernel.machine, &space, 128, 8).unwrap();
    assert_eq!(&back, b"ABCDEFGH");

    assert_eq!(syscall(&kernel, 5, [fid, 0, 0]), SyscallOutcome::Continue);
    assert!(kernel.file_system.check());
    thread::current().set_space(None);
}

#[test]
fn failing_calls_return_minus_one() {
    let _serial = serialize();
    let (kernel, space) = boot_process(LoadPolicy::Demand);
    write_buffer_to_user(&kernel.machine, &space, 16, b"nope\0").unwrap();

    // Unknown syscall id.
    syscall(&kernel, 99, [0, 0, 0]);
    assert_eq!(result(&kernel), -1);
    // Open of a missing file.
    syscall(&kernel, 4, [16, 0, 0]);
    assert_eq!(result(&kernel), -1);
    // Remove of a missing file.
    syscall(&kernel, 2, [16, 0, 0]);
    assert_eq!(result(&kernel), -1);
    // Null name pointer.
    syscall(&kernel, 1, [0, 0, 0]);
    assert_eq!(result(&kernel), -1);
    // Close of a console fid.
    syscall(&kernel, 5, [1, 0, 0]);
    assert_eq!(result(&kernel), -1);
    // Read with a negative size.
    syscall(&kernel, 6, [128, -4, 0]);
    assert_eq!(result(&kernel), -1);
    thread::current().set_space(None);
}

#[test]
fn pc_advances_once_per_syscall() {
    let _serial = serialize();
    let (kernel, space) = boot_process(LoadPolicy::Demand);
    write_buffer_to_user(&kernel.machine, &space, 16, b"f\0").unwrap();
    assert_eq!(kernel.machine.read_register(PC_REG), 0);

    syscall(&kernel, 1, [16, 0, 0]); // Create
    assert_eq!(kernel.machine.read_register(PC_REG), 4);
    assert_eq!(kernel.machine.read_register(NEXT_PC_REG), 8);

    syscall(&kernel, 99, [0, 0, 0]); // even unknown ids move on
    assert_eq!(kernel.machine.read_register(PC_REG), 8);
    thread::current().set_space(None);
}

#[test]
fn halt_and_exit_reach_the_shell() {
    let _serial = serialize();
    let (kernel, _space) = boot_process(LoadPolicy::Demand);
    assert_eq!(syscall(&kernel, 0, [0, 0, 0]), SyscallOutcome::Halt);
    assert_eq!(syscall(&kernel, 3, [5, 0, 0]), SyscallOutcome::Exit(5));
    // Exit dropped the space.
    assert!(thread::current().space().is_none());
}

#[test]
fn exec_and_join_propagate_the_status() {
    let _serial = serialize();
    let (kernel, space) = boot_process(LoadPolicy::Demand);

    // An executable for the child process.
    let image = Executable::build_image(&[], &[], 2048);
    drop(put_file(&kernel.file_system, "prog", &image));

    write_buffer_to_user(&kernel.machine, &space, 16, b"prog\0").unwrap();
    assert_eq!(syscall(&kernel, 9, [16, 1, 0]), SyscallOutcome::Continue);
    let pid = result(&kernel);
    assert!(pid >= 1, "Exec should return a space id, got {}", pid);
    assert!(kernel.process(pid as usize).is_some());

    assert_eq!(syscall(&kernel, 8, [pid, 0, 0]), SyscallOutcome::Continue);
    assert_eq!(result(&kernel), 0, "child exit status");
    assert!(kernel.process(pid as usize).is_none());

    // Joining again fails: the process is gone.
    syscall(&kernel, 8, [pid, 0, 0]);
    assert_eq!(result(&kernel), -1);
    thread::current().set_space(None);
    assert!(kernel.file_system.check());
}
