//! `int 0x80` syscall ABI: `eax` carries the syscall number, `edi`/`ecx`/
//! `edx`/`esi` carry up to four arguments, and the return value (or a
//! negative errno) comes back in `eax`.

pub mod handlers;
pub mod table;
pub mod uaccess;

use crate::arch::x86::idt::TrapFrame;
use crate::process::{self, signal};
use table::SyscallNumber;

/// Entry point `irq::forward_interrupt` calls for vector 0x80. Decodes the
/// syscall number and arguments out of `frame`, dispatches to the matching
/// handler, and writes the result (or negated errno) back into `frame.eax`.
/// `Exit` diverges and never reaches the tail end of this function.
pub fn dispatch(frame: &mut TrapFrame) {
    let Some(current) = process::current_pid() else {
        frame.eax = crate::error::KernelError::NoSuchProcess.to_errno() as u32;
        return;
    };

    let a1 = frame.edi;
    let a2 = frame.ecx;
    let a3 = frame.edx;
    let a4 = frame.esi;

    let Some(number) = SyscallNumber::from_raw(frame.eax) else {
        frame.eax = crate::error::KernelError::InvalidArgument.to_errno() as u32;
        return;
    };

    if number == SyscallNumber::Exit {
        handlers::process::exit(frame, current, a1);
    }

    let result = run(number, current, a1, a2, a3, a4);
    frame.eax = match result {
        Ok(v) => v as u32,
        Err(e) => e.to_errno() as u32,
    };

    signal::deliver_pending(current);
}

fn run(
    number: SyscallNumber,
    current: crate::process::Pid,
    a1: u32,
    a2: u32,
    a3: u32,
    a4: u32,
) -> crate::error::KernelResult<i32> {
    use handlers::{fs, mm, process as proc_handlers, signal as sig_handlers, ui};
    use SyscallNumber::*;

    match number {
        Exit => unreachable!("handled before dispatch reaches run()"),
        Fork => proc_handlers::fork(current),
        Execve => proc_handlers::execve(current, a1, a2, a3),
        Msleep => proc_handlers::msleep(current, a1),
        PageAlloc => mm::pagealloc(current, a1),
        PageFree => mm::pagefree(a1, a2),
        SignalRegister => sig_handlers::signal_register(current, a1),
        SignalResume => sig_handlers::signal_resume(current),
        SignalSend => sig_handlers::signal_send(a1, a2),
        GetPid => Ok(proc_handlers::getpid(current)),
        Open => fs::open(current, a1, a2),
        Close => fs::close(current, a1),
        Read => fs::read(current, a1, a2, a3),
        Write => fs::write(current, a1, a2, a3),
        ReadDir => fs::readdir(current, a1, a2, a3),
        Chmod => fs::chmod(current, a1, a2),
        ReadLink => fs::readlink(current, a1, a2, a3),
        Unlink => fs::unlink(current, a1),
        Symlink => fs::symlink(current, a1, a2),
        Mkdir => fs::mkdir(current, a1),
        Pipe => fs::pipe(current, a1),
        MoveFd => fs::movefd(current, a1, a2),
        Chdir => fs::chdir(current, a1),
        GetCwd => fs::getcwd(current, a1, a2),
        Wait => proc_handlers::wait(current, a1),
        Fstat => fs::fstat(current, a1, a2),
        Lstat => fs::lstat(current, a1, a2),
        Lseek => fs::lseek(current, a1, a2 as i32, a3),
        Thread => proc_handlers::thread(current, a1, a2),
        Dup => fs::dup(current, a1),
        ThreadRegister => proc_handlers::thread_register(current, a1),
        Yield => Ok(proc_handlers::yield_cpu()),
        UiRegister => ui::ui_register(current),
        UiMakeResponder => ui::ui_make_responder(current, a1, a2),
        UiSplit => ui::ui_split(current, a1, a2),
        UiResume => ui::ui_resume(current, a1),
        UiSwapBuffers => ui::ui_swap_buffers(current, a1, a2),
        UiWait => ui::ui_wait(current, a1, a2),
        UiYield => ui::ui_yield(current, a1),
        Rename => fs::rename(current, a1, a2),
        Resolve => fs::resolve(current, a1, a2, a3),
        Systime => Ok(proc_handlers::systime()),
        Priority => proc_handlers::priority(current, a1 as i32),
    }
}
