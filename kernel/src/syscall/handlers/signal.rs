//! Signal syscalls: `signal_register`, `signal_resume`, `signal_send`.

use crate::error::{KernelError, KernelResult};
use crate::process::pcb::{Pid, Signal};
use crate::process::{signal, table};

fn signal_from_raw(n: u32) -> Signal {
    match n {
        4 => Signal::Ill,
        11 => Signal::Segv,
        13 => Signal::Pipe,
        9 => Signal::Kill,
        19 => Signal::Stop,
        other => Signal::User(other as u8),
    }
}

/// Registers the user-mode entry point the kernel diverts execution to on
/// the next pending signal; `None` (the default before this is ever
/// called) means fatal signals kill outright and everything else is
/// dropped.
pub fn signal_register(current: Pid, eip: u32) -> KernelResult<i32> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    pcb.signal.lock().handler_eip = Some(eip);
    Ok(0)
}

pub fn signal_resume(current: Pid) -> KernelResult<i32> {
    signal::resume(current).ok_or(KernelError::InvalidArgument)?;
    Ok(0)
}

pub fn signal_send(target_pid: u32, sig: u32) -> KernelResult<i32> {
    let target = Pid(target_pid);
    table::get(target).ok_or(KernelError::NoSuchProcess)?;
    signal::send(target, signal_from_raw(sig));
    Ok(0)
}
