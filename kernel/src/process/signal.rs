//! Signal delivery: one pending slot per PCB, checked at every return to
//! user mode (preemption tick or syscall trampoline exit).

pub use super::pcb::Signal;

use super::pcb::Pid;
use super::table;

/// Raises `sig` against `pid`. `Kill` and `Stop` are never deliverable to a
/// user handler -- they take the process down immediately; everything else
/// is queued in `next_signal` for the next user-mode return to pick up.
pub fn fault(pid: Pid, sig: Signal) {
    match sig {
        Signal::Kill | Signal::Stop => kill(pid),
        _ => {
            let Some(pcb) = table::get(pid) else { return };
            pcb.signal.lock().next_signal = Some(sig);
        }
    }
}

fn kill(pid: Pid) {
    super::lifecycle::exit_process(pid, -(signal_number(Signal::Kill) as i32));
}

/// Kills `pid` immediately rather than queuing `sig` for the next user-mode
/// return. A CPU exception (page fault, GP fault) re-faults at the same
/// `eip` the instant the trampoline's `iretd` resumes it, so there is no
/// later, safer point at which `deliver_pending` could still intervene --
/// the exception handlers that raise these faults call this instead of
/// `fault`.
pub fn fault_now(pid: Pid, sig: Signal) {
    super::lifecycle::exit_process(pid, -(signal_number(sig) as i32));
}

/// Queues `sig` without the fatal fast-path -- used by the `signal_send`
/// syscall, which never targets `Kill`/`Stop` through this path since those
/// go through `process_kill` directly.
pub fn send(pid: Pid, sig: Signal) {
    let Some(pcb) = table::get(pid) else { return };
    pcb.signal.lock().next_signal = Some(sig);
}

pub fn signal_number(sig: Signal) -> u8 {
    match sig {
        Signal::Ill => 4,
        Signal::Segv => 11,
        Signal::Pipe => 13,
        Signal::Kill => 9,
        Signal::Stop => 19,
        Signal::User(n) => n,
    }
}

/// Called at every user-mode return point (preemption, syscall exit). If a
/// signal is pending and none is currently being handled, diverts `uregs`
/// into the registered handler, stashing the interrupted context so
/// `signal_resume` can restore it.
pub fn deliver_pending(pid: Pid) {
    let Some(pcb) = table::get(pid) else { return };
    let mut state = pcb.signal.lock();
    if state.current_signal.is_some() {
        return;
    }
    let Some(sig) = state.next_signal.take() else {
        return;
    };
    let Some(handler_eip) = state.handler_eip else {
        // No handler registered: default action is to drop the signal,
        // except the fatal set, which kills even without a handler.
        drop(state);
        if matches!(sig, Signal::Ill | Signal::Segv) {
            kill(pid);
        }
        return;
    };
    state.saved_signal_regs = Some(pcb.uregs());
    state.current_signal = Some(sig);
    drop(state);

    // SAFETY: called for the currently-running task with interrupts
    // disabled (preemption tick / syscall exit path).
    let uregs = unsafe { pcb.uregs_mut() };
    uregs.eip = handler_eip;
    uregs.eax = signal_number(sig) as u32;
}

/// `signal_resume` syscall body: restores the context saved by
/// `deliver_pending`, clearing `current_signal` so a later signal can be
/// delivered.
pub fn resume(pid: Pid) -> Option<()> {
    let pcb = table::get(pid)?;
    let mut state = pcb.signal.lock();
    let saved = state.saved_signal_regs.take()?;
    state.current_signal = None;
    drop(state);
    pcb.set_uregs(saved);
    Some(())
}
