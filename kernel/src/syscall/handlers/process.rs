//! Process lifecycle syscalls: `exit`, `fork`, `execve`, `msleep`,
//! `getpid`, `wait`, `thread`, `thread_register`, `yield`, `priority`,
//! `systime`.

use crate::arch::x86::idt::TrapFrame;
use crate::error::KernelResult;
use crate::process::pcb::{Pid, Priority};
use crate::process::{self, table};
use crate::sched;
use crate::syscall::uaccess;

pub fn exit(_frame: &TrapFrame, current: Pid, status: u32) -> ! {
    process::exit_process(current, status as i32);
    sched::yield_cpu();
    unreachable!("exit_process never reschedules the exiting task")
}

pub fn fork(current: Pid) -> KernelResult<i32> {
    let child = process::fork_process(current)?;
    sched::ready(child);
    Ok(child.0 as i32)
}

pub fn execve(current: Pid, path_ptr: u32, argv_ptr: u32, envp_ptr: u32) -> KernelResult<i32> {
    // SAFETY: pointers are user-space addresses in the currently-loaded
    // address space, which is `current`'s own -- no CR3 switch needed.
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let argv = unsafe { uaccess::read_strvec(argv_ptr) }?;
    let envp = unsafe { uaccess::read_strvec(envp_ptr) }?;
    process::exec_process(current, &path, &argv, &envp)?;
    Ok(0)
}

pub fn msleep(current: Pid, duration_ms: u32) -> KernelResult<i32> {
    let wake_tick = sched::ticks() + duration_ms as u64;
    sched::sleep_until(wake_tick);
    sched::yield_cpu();
    let _ = current;
    Ok(0)
}

pub fn getpid(current: Pid) -> i32 {
    current.0 as i32
}

pub fn wait(current: Pid, target_pid: u32) -> KernelResult<i32> {
    let target = if target_pid == 0 {
        None
    } else {
        Some(Pid(target_pid))
    };
    let (_child, status) = process::wait_process(current, target)?;
    Ok(status)
}

pub fn thread(current: Pid, entry: u32, data: u32) -> KernelResult<i32> {
    let child = process::lifecycle::spawn_thread(current, entry, data)?;
    sched::ready(child);
    Ok(child.0 as i32)
}

pub fn thread_register(current: Pid, trampoline_eip: u32) -> KernelResult<i32> {
    let pcb = table::get(current).ok_or(crate::error::KernelError::NoSuchProcess)?;
    pcb.mem.lock(); // lock taken/released only to assert the pcb is alive
    process::lifecycle::set_thread_trampoline(current, trampoline_eip);
    Ok(0)
}

pub fn yield_cpu() -> i32 {
    sched::block_current();
    sched::ready(
        sched::current_pid().expect("yield called with no current process to re-enqueue"),
    );
    sched::yield_cpu();
    0
}

pub fn priority(current: Pid, new_priority: i32) -> KernelResult<i32> {
    if !(0..=crate::config::MAX_PROCESS_PRIORITY as i32).contains(&new_priority) {
        return Err(crate::error::KernelError::InvalidArgument);
    }
    let pcb = table::get(current).ok_or(crate::error::KernelError::NoSuchProcess)?;
    sched::set_priority(current, Priority(new_priority as u8));
    let _ = pcb;
    Ok(0)
}

pub fn systime() -> i32 {
    sched::ticks() as i32
}
