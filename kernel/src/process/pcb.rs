//! Process Control Block: everything the scheduler,
//! exception dispatcher, and syscall layer need to run, suspend, and signal
//! one task.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::AtomicBool;

use spin::Mutex;

use crate::config::{FPU_STATE_SIZE, MAX_PROCESS_FDS};
use crate::fs::node::FdSlot;
use crate::mm::{PhysAddr, VirtAddr};
use crate::sched::wait::WaitQueue;

/// Stable per-task identifier, unique for the lifetime of the table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Saved general-purpose register set, laid out exactly as the interrupt
/// trampoline pushes it so `uregs`/`kregs` can be restored with one `iret`.
pub type Registers32 = crate::arch::x86::idt::TrapFrame;

/// FXSAVE/FXRSTOR scratch area, must be 16-byte aligned.
#[repr(align(16))]
#[derive(Clone)]
pub struct FpRegs(pub [u8; FPU_STATE_SIZE]);

impl FpRegs {
    pub const fn new() -> Self {
        Self([0; FPU_STATE_SIZE])
    }
}

impl Default for FpRegs {
    fn default() -> Self {
        Self::new()
    }
}

/// Priority class; lower numbers are scanned first by the round-robin run
/// list walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGH: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(1);
    pub const LOW: Priority = Priority(2);
}

/// User/kernel address-space layout for a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryLayout {
    pub text_start: u32,
    pub data_end: u32,
    pub heap_end: u32,
    pub stack_top: u32,
    pub stack_bottom: u32,
    pub kernel_stack_top: u32,
    pub kernel_stack_bottom: u32,
}

/// One outstanding or active signal. Simpler than the design
/// note's tagged `{Running, InSignalHandler, Dying}` PCB-state variant: the
/// same invariant (never stack a second handler) holds by construction
/// because `current_signal` is `Some` only while a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Ill,
    Segv,
    Pipe,
    Kill,
    Stop,
    User(u8),
}

#[derive(Default)]
pub struct SignalState {
    pub next_signal: Option<Signal>,
    pub current_signal: Option<Signal>,
    pub signal_eip: u32,
    pub saved_signal_regs: Option<Registers32>,
    /// User-mode entry point registered via `signal_register`; `None` means
    /// the default action (fatal signals kill the process, others are
    /// discarded) applies.
    pub handler_eip: Option<u32>,
}

#[derive(Default)]
pub struct ExitState {
    pub exited: bool,
    pub exit_status: i32,
}

/// UI client registration. `ui_register` must be called once before
/// `ui_make_responder`/`ui_split` will create a window for this thread
/// group; actual event delivery runs over each window's own pipe, not
/// through this struct.
#[derive(Default)]
pub struct UiState {
    pub has_ui: bool,
}

/// One task, thread or process; nothing here distinguishes the two at
/// the PCB level (`is_thread` only means the slot shares its parent's
/// `cr3` rather than owning a fresh one).
pub struct Pcb {
    pub pid: Pid,
    pub gid: Pid,
    /// Set once, before the slot is first enqueued on the scheduler;
    /// never flips back, so a relaxed atomic is enough.
    pub is_thread: AtomicBool,
    /// Trampoline registered by the `thread_register` syscall; `thread`
    /// starts the new task here with the caller's entry/data in edi/ecx.
    pub thread_trampoline: Mutex<u32>,
    /// Mutex-guarded rather than a plain field since the `priority` syscall
    /// lets a task rewrite its own level mid-flight, and `sched::ready`
    /// reads it from whichever task is currently enqueuing.
    pub priority: Mutex<Priority>,
    pub in_kernel: bool,

    /// Only ever touched for the currently-running task with interrupts
    /// disabled (single-CPU kernel), same discipline as `table`'s
    /// `kernel_esp` cell -- a `Mutex` here would have to stay locked across
    /// the `iret`/trampoline boundary, which never drops it.
    uregs: UnsafeCell<Registers32>,
    kregs: UnsafeCell<Registers32>,
    pub fpregs: FpRegs,
    pub cr3: PhysAddr,
    /// Set once by whichever of `fork`/`exec`/init-spawn created this task,
    /// before it is enqueued on the scheduler; `Mutex`-guarded only so
    /// `exec` can rewrite it in place for the already-existing PCB it
    /// replaces in-process.
    pub mem: Mutex<MemoryLayout>,
    pub wd: Mutex<String>,

    pub fds: Mutex<[Option<Arc<Mutex<FdSlot>>>; MAX_PROCESS_FDS]>,

    pub signal: Mutex<SignalState>,
    pub exit: Mutex<ExitState>,
    pub ui: Mutex<UiState>,

    /// Rewritten by `reparent_children_to_init` when this task's original
    /// parent exits first; read by the destroyer once this task itself is
    /// torn down, to know whose `children_exit` queue to wake.
    pub parent: Mutex<Option<Pid>>,
    pub children: Mutex<Vec<Pid>>,

    /// Parked by any task blocked in `wait()` on one of this PCB's children;
    /// every child's `exit_process` wakes its parent's queue so a waiter
    /// re-checks the children list for a newly exited entry.
    pub children_exit: WaitQueue,

    /// Absolute tick at which a sleeping task should wake, consulted by the
    /// scheduler's sleep list.
    pub sleep_until: Mutex<Option<u64>>,
}

// SAFETY: `uregs`/`kregs` are read and written only for the task that is
// currently scheduled, with interrupts disabled around every access,
// exactly the discipline `process::table`'s `kernel_esp` cell documents.
unsafe impl Sync for Pcb {}

impl Pcb {
    pub fn new(pid: Pid, gid: Pid, parent: Option<Pid>, priority: Priority, cr3: PhysAddr) -> Self {
        const NO_FD: Option<Arc<Mutex<FdSlot>>> = None;
        Self {
            pid,
            gid,
            is_thread: AtomicBool::new(false),
            thread_trampoline: Mutex::new(0),
            priority: Mutex::new(priority),
            in_kernel: true,
            uregs: UnsafeCell::new(Registers32::default()),
            kregs: UnsafeCell::new(Registers32::default()),
            fpregs: FpRegs::new(),
            cr3,
            mem: Mutex::new(MemoryLayout::default()),
            wd: Mutex::new(String::from("/")),
            fds: Mutex::new([NO_FD; MAX_PROCESS_FDS]),
            signal: Mutex::new(SignalState::default()),
            exit: Mutex::new(ExitState::default()),
            ui: Mutex::new(UiState::default()),
            parent: Mutex::new(parent),
            children: Mutex::new(Vec::new()),
            children_exit: WaitQueue::new(),
            sleep_until: Mutex::new(None),
        }
    }

    pub fn user_stack_bottom(&self) -> VirtAddr {
        VirtAddr::new(self.mem.lock().stack_bottom)
    }

    /// Mutable access to the saved user-mode registers.
    ///
    /// # Safety
    /// Caller must be operating on behalf of the currently-scheduled task
    /// with interrupts disabled (or own the only reference to a PCB that
    /// has not yet been scheduled).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn uregs_mut(&self) -> &mut Registers32 {
        // SAFETY: forwarded to caller.
        unsafe { &mut *self.uregs.get() }
    }

    pub fn uregs(&self) -> Registers32 {
        // SAFETY: a plain read of a `Copy` snapshot; torn reads are
        // impossible to observe from outside since nothing here spans an
        // interrupt (the writer side disables interrupts for any multi-word
        // mutation sequence).
        unsafe { *self.uregs.get() }
    }

    pub fn set_uregs(&self, regs: Registers32) {
        // SAFETY: same discipline as `uregs_mut`.
        unsafe { *self.uregs.get() = regs };
    }

    /// # Safety
    /// Same discipline as [`Pcb::uregs_mut`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn kregs_mut(&self) -> &mut Registers32 {
        // SAFETY: forwarded to caller.
        unsafe { &mut *self.kregs.get() }
    }

    pub fn kregs(&self) -> Registers32 {
        // SAFETY: see `uregs`.
        unsafe { *self.kregs.get() }
    }

    pub fn set_kregs(&self, regs: Registers32) {
        // SAFETY: see `set_uregs`.
        unsafe { *self.kregs.get() = regs };
    }
}

impl Default for Registers32 {
    fn default() -> Self {
        // SAFETY: an all-zero TrapFrame is a valid, if meaningless, value --
        // every field is a plain integer with no invariant beyond its type.
        unsafe { core::mem::zeroed() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_runs_high_first() {
        assert!(Priority::HIGH < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::LOW);
    }

    #[test]
    fn new_pcb_starts_with_no_children_and_no_exit() {
        let pcb = Pcb::new(Pid(1), Pid(1), None, Priority::NORMAL, PhysAddr::new(0));
        assert!(pcb.children.lock().is_empty());
        assert!(!pcb.exit.lock().exited);
    }
}
