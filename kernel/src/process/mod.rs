//! Process model: PCB, lifecycle (fork/exec/exit/wait), the process table,
//! ELF loading, kernel stack pool, and signal delivery.
//!
//! Threads are not a separate concept here: a thread is a `Pcb` with
//! `is_thread = true` and a `gid` shared with its thread-group leader,
//! scheduled exactly like any other process (see `pcb::Pcb`).

pub mod destroyer;
pub mod elf;
pub mod kstack;
pub mod lifecycle;
pub mod pcb;
pub mod signal;
pub mod table;

pub use lifecycle::{exec_process, exit_process, fork_process, spawn_init_process, wait_process};
pub use pcb::{Pcb, Pid, Priority, Signal};

use crate::error::KernelResult;

/// The currently running task's pid, or `None` before the first
/// `sched::start` (i.e. only while still running on the boot stack).
pub fn current_pid() -> Option<Pid> {
    crate::sched::current_pid()
}

/// The lowest mapped address of `pid`'s user stack, used by the page-fault
/// handler to recognize a one-page stack-growth fault versus a real
/// segfault.
pub fn user_stack_bottom(pid: Pid) -> Option<u32> {
    table::get(pid).map(|pcb| pcb.mem.lock().stack_bottom)
}

/// Grows `pid`'s user stack down by one page to `new_bottom`, mapping the
/// page and updating its recorded layout. Called by the page-fault handler
/// when a fault lands exactly one page below the current bottom.
pub fn grow_user_stack(pid: Pid, new_bottom: u32) -> KernelResult<()> {
    use crate::mm::paging::{self, PageFlags};
    use crate::mm::pmm;
    use crate::mm::VirtAddr;

    let pcb = table::get(pid).ok_or(crate::error::KernelError::NoSuchProcess)?;
    let frame = pmm::alloc(1).ok_or(crate::error::KernelError::NoMemory)?;
    if let Err(e) = paging::map(VirtAddr::new(new_bottom), frame, PageFlags::WRITABLE | PageFlags::USER) {
        pmm::free(frame, 1);
        return Err(e);
    }
    pcb.mem.lock().stack_bottom = new_bottom;
    Ok(())
}
