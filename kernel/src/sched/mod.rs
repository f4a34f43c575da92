//! Strict round-robin scheduler over three fixed priority levels, plus a
//! sleep list for timed waits.
//!
//! No dedicated idle task: when nothing is runnable, whichever task called
//! [`yield_cpu`] or was preempted into this module simply halts in place
//! (interrupts enabled) on its own kernel stack until something wakes,
//! then performs the switch itself. Every transition after the very first
//! ([`start`]) is therefore a direct task-to-task
//! [`switch_kernel_stack`](crate::arch::x86::context::switch_kernel_stack)
//! call: the previous task's callee-saved registers and return address are
//! pushed onto its own kernel stack and its `esp` is stashed in the process
//! table, to be resumed later exactly where it left off.

pub mod wait;

use spin::Mutex;

use crate::arch::x86::context::switch_kernel_stack;
use crate::arch::x86::gdt;
use crate::config::{MAX_PROCESS_COUNT, PRIORITY_LEVELS};
use crate::ds::list::IntrusiveList;
use crate::ds::minheap::MinHeap;
use crate::mm::paging;
use crate::process::{self, Pid, Priority};

/// Scheduling quantum, in timer ticks, before a running task is preempted
/// back to the tail of its own priority's run queue.
const QUANTUM_TICKS: u32 = 5;

static RUN_QUEUES: Mutex<[IntrusiveList<Pid>; PRIORITY_LEVELS]> =
    Mutex::new([IntrusiveList::new(), IntrusiveList::new(), IntrusiveList::new()]);

/// `true` once a pid is enqueued or running; cleared only when it blocks or
/// goes to sleep, so a `wake`/`ready` racing with an already-pending wakeup
/// does not enqueue it twice.
static RUNNABLE: Mutex<[bool; MAX_PROCESS_COUNT]> = Mutex::new([false; MAX_PROCESS_COUNT]);

static CURRENT: Mutex<Option<Pid>> = Mutex::new(None);

/// Set by [`block_current`]; consulted by the next [`yield_cpu`]/preemption
/// to decide whether the outgoing task gets re-enqueued or left off the run
/// queues entirely (it is the caller's job to arrange a later `wake`).
static BLOCK_NEXT: Mutex<bool> = Mutex::new(false);

/// Wake tick -> pid, for tasks parked in `msleep`.
static SLEEPING: Mutex<MinHeap<Pid>> = Mutex::new(MinHeap::new());

static TICKS: Mutex<u64> = Mutex::new(0);
static QUANTUM_REMAINING: Mutex<u32> = Mutex::new(QUANTUM_TICKS);

pub fn init() {
    log::info!(target: "sched", "{} priority levels, {}-tick quantum", PRIORITY_LEVELS, QUANTUM_TICKS);
}

pub fn current_pid() -> Option<Pid> {
    *CURRENT.lock()
}

fn mark_runnable(pid: Pid) -> bool {
    let mut runnable = RUNNABLE.lock();
    let slot = &mut runnable[pid.0 as usize];
    if *slot {
        return false;
    }
    *slot = true;
    true
}

fn clear_runnable(pid: Pid) {
    RUNNABLE.lock()[pid.0 as usize] = false;
}

/// Enqueues `pid` at the tail of its priority's run queue. Used both for a
/// brand-new task's first admission and to resume one blocked on a
/// condition (pipe, wait, signal).
pub fn ready(pid: Pid) {
    if !mark_runnable(pid) {
        return;
    }
    let priority = process::table::get(pid)
        .map(|pcb| *pcb.priority.lock())
        .unwrap_or(Priority::NORMAL);
    RUN_QUEUES.lock()[priority.0 as usize].push_back(pid);
}

/// `priority` syscall body: dequeues `pid` (if runnable), rewrites its
/// level, and re-enqueues under the new run list. A no-op for a task that
/// is not currently on a run queue (e.g. the caller, mid-syscall).
pub fn set_priority(pid: Pid, new_priority: Priority) {
    if let Some(pcb) = process::table::get(pid) {
        *pcb.priority.lock() = new_priority;
    }
}

/// Same as [`ready`]; kept as a distinct name for call sites waking a
/// specific blocked task (pipe/wait-queue callers) versus admitting a task
/// for the first time.
pub fn wake(pid: Pid) {
    ready(pid);
}

/// Marks the current task as not runnable; the next [`yield_cpu`] will not
/// re-enqueue it. The caller is responsible for arranging a later `wake`.
pub fn block_current() {
    *BLOCK_NEXT.lock() = true;
    if let Some(pid) = current_pid() {
        clear_runnable(pid);
    }
}

/// Parks the current task until `wake_tick` (absolute, [`ticks`]-scale),
/// then yields.
pub fn sleep_until(wake_tick: u64) {
    let Some(pid) = current_pid() else { return };
    if let Some(pcb) = process::table::get(pid) {
        *pcb.sleep_until.lock() = Some(wake_tick);
    }
    clear_runnable(pid);
    SLEEPING.lock().push(wake_tick, pid);
    yield_cpu();
}

pub fn ticks() -> u64 {
    *TICKS.lock()
}

fn pop_next_ready() -> Option<Pid> {
    let mut queues = RUN_QUEUES.lock();
    for level in 0..PRIORITY_LEVELS {
        if let Some(pid) = queues[level].pop_front() {
            return Some(pid);
        }
    }
    None
}

/// Called from the PIT IRQ handler. Wakes any sleepers whose time has come
/// and, once a full quantum has elapsed for the running task, triggers a
/// reschedule right there in interrupt context (see module docs).
pub fn on_timer_tick() {
    let now = {
        let mut ticks = TICKS.lock();
        *ticks += 1;
        *ticks
    };

    loop {
        let due = { SLEEPING.lock().peek_key().map(|k| k <= now).unwrap_or(false) };
        if !due {
            break;
        }
        let Some((_, pid)) = SLEEPING.lock().pop() else { break };
        if let Some(pcb) = process::table::get(pid) {
            *pcb.sleep_until.lock() = None;
        }
        ready(pid);
    }

    let expired = {
        let mut remaining = QUANTUM_REMAINING.lock();
        *remaining = remaining.saturating_sub(1);
        *remaining == 0
    };
    if expired {
        *QUANTUM_REMAINING.lock() = QUANTUM_TICKS;
        if current_pid().is_some() {
            yield_cpu();
        }
    }
}

/// Performs the direct stack switch from `prev` (always `Some` after
/// [`start`] has run once) to `next`.
fn switch_to(prev: Pid, next: Pid) {
    let next_pcb = process::table::get(next).expect("scheduled pid missing from table");
    paging::switch_to(next_pcb.cr3);
    gdt::set_kernel_stack(next_pcb.mem.lock().kernel_stack_top);
    *CURRENT.lock() = Some(next);

    // SAFETY: both pids are live table entries; interrupts are already
    // disabled by every caller of `switch_to`, so no concurrent scheduling
    // activity can race the pointer/esp reads below.
    unsafe {
        let old_ptr = process::table::kernel_esp_ptr(prev).expect("prev pid missing from table");
        let new_esp = process::table::kernel_esp(next).expect("next pid missing from table");
        switch_kernel_stack(old_ptr, new_esp);
    }
}

/// Voluntarily gives up the CPU. If the current task was not marked
/// blocked, it is re-enqueued for another turn. Spins (interrupts enabled)
/// if nothing else is runnable, since there is no dedicated idle task.
pub fn yield_cpu() {
    loop {
        let Some(prev) = current_pid() else {
            return;
        };
        let switched = crate::arch::x86::without_interrupts(|| {
            let blocked = {
                let mut b = BLOCK_NEXT.lock();
                let was = *b;
                *b = false;
                was
            };

            match pop_next_ready() {
                Some(next) if next == prev => {
                    // Only one runnable task and it's already current.
                    if !blocked {
                        ready(prev);
                        let _ = pop_next_ready();
                    }
                    true
                }
                Some(next) => {
                    if !blocked {
                        ready(prev);
                    }
                    switch_to(prev, next);
                    true
                }
                None => {
                    // Nobody else is runnable; stay current if we weren't
                    // the one blocking, otherwise keep spinning below.
                    !blocked
                }
            }
        });
        if switched {
            return;
        }
        // SAFETY: a plain `sti; hlt; cli` bracket -- the next interrupt
        // (timer, or whatever woke the condition we're blocked on) resumes
        // execution right after `hlt` with interrupts masked again, and the
        // loop re-checks the run queues.
        unsafe { core::arch::asm!("sti", "hlt", "cli", options(nomem, nostack)) };
    }
}

/// Performs the very first switch away from the boot stack into `pid`,
/// never returning. Called once from `bootstrap::kmain` after the init
/// process has been created.
pub fn start(pid: Pid) -> ! {
    let pcb = process::table::get(pid).expect("start: pid missing from table");
    paging::switch_to(pcb.cr3);
    gdt::set_kernel_stack(pcb.mem.lock().kernel_stack_top);
    *CURRENT.lock() = Some(pid);
    mark_runnable(pid);

    let mut boot_esp_scratch: u32 = 0;
    // SAFETY: `pid` was just installed as current and has a prepared
    // kernel stack (its creator called `prepare_kernel_stack`); the boot
    // stack this call abandons is never resumed into, matching `start`'s
    // `-> !` signature.
    unsafe {
        let new_esp = process::table::kernel_esp(pid).expect("start: pid has no kernel stack");
        switch_kernel_stack(&mut boot_esp_scratch, new_esp);
    }
    unreachable!("scheduler resumed the abandoned boot stack");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_runnable_is_idempotent() {
        let pid = Pid(MAX_PROCESS_COUNT as u32 - 1);
        clear_runnable(pid);
        assert!(mark_runnable(pid));
        assert!(!mark_runnable(pid));
        clear_runnable(pid);
    }
}
