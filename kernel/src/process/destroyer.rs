//! Asynchronous zombie reclamation: the destroyer task and its destroy queue.
//!
//! `exit_process` never frees a dying task's own address space or kernel
//! stack -- it cannot, since it is still running on both. Instead it hands
//! the pid to this module's destroy queue and returns (or, for the
//! currently-running task, parks forever); a dedicated kernel task drains
//! the queue from its own stack and address space, which is always safe to
//! do to someone else's resources.
//!
//! A destroyed PCB's exit status must still be readable by whatever later
//! calls `wait()` on it, even after its table slot is gone -- [`ZOMBIES`] is
//! a side table of `(parent, status)` pairs indexed by pid, written by the
//! destroyer and consumed by `wait_process`.

use alloc::collections::VecDeque;
use core::sync::atomic::Ordering;

use spin::Mutex;

use super::pcb::{MemoryLayout, Pid, Priority};
use super::table;
use crate::config::MAX_PROCESS_COUNT;
use crate::mm::paging;
use crate::mm::pmm;

#[derive(Clone, Copy)]
struct Zombie {
    parent: Option<Pid>,
    status: i32,
}

const NO_ZOMBIE: Mutex<Option<Zombie>> = Mutex::new(None);
static ZOMBIES: [Mutex<Option<Zombie>>; MAX_PROCESS_COUNT] = [NO_ZOMBIE; MAX_PROCESS_COUNT];

static QUEUE: Mutex<VecDeque<Pid>> = Mutex::new(VecDeque::new());
static QUEUE_WAIT: crate::sched::wait::WaitQueue = crate::sched::wait::WaitQueue::new();

/// Enqueues `pid` for destruction and wakes the destroyer task. Called by
/// `exit_process` once a victim has recorded its exit status and reparented
/// its children.
pub fn enqueue(pid: Pid) {
    QUEUE.lock().push_back(pid);
    QUEUE_WAIT.wake_one();
}

fn record(pid: Pid, parent: Option<Pid>, status: i32) {
    *ZOMBIES[pid.0 as usize].lock() = Some(Zombie { parent, status });
    if let Some(parent_pid) = parent {
        if let Some(parent) = table::get(parent_pid) {
            parent.children_exit.wake_all();
        }
    }
}

/// Takes `pid`'s recorded exit status if the destroyer has reclaimed it by
/// now, clearing the record so it is collected at most once.
pub fn take(pid: Pid) -> Option<i32> {
    ZOMBIES[pid.0 as usize].lock().take().map(|z| z.status)
}

/// Frees `pid`'s user address space (unless it's a thread sharing its
/// group leader's), kernel stack, and table slot, then records its status
/// for `wait_process` and wakes its parent.
fn destroy(pid: Pid) {
    let Some(pcb) = table::get(pid) else { return };
    let status = pcb.exit.lock().exit_status;
    let parent = *pcb.parent.lock();

    if !pcb.is_thread.load(Ordering::Relaxed) {
        paging::with_address_space(pcb.cr3, paging::clear_user_space);
        pmm::free(pcb.cr3, 1);
    }
    super::kstack::free(pcb.mem.lock().kernel_stack_bottom);
    table::remove(pid);

    record(pid, parent, status);
    log::info!(target: "process", "pid {} destroyed", pid);
}

extern "C" fn destroyer_main(_arg: usize) -> ! {
    loop {
        let next = QUEUE.lock().pop_front();
        match next {
            Some(pid) => destroy(pid),
            None => QUEUE_WAIT.park(),
        }
    }
}

/// Spawns the destroyer task. Called once from `bootstrap::kmain`, after
/// init has its own slot, so the destroyer never ends up mistaken for init
/// by `table::init_pid`.
pub fn spawn() -> Pid {
    let cr3 = paging::new_address_space().expect("destroyer: no memory for address space");
    let pcb =
        table::alloc_slot(None, Priority::HIGH, cr3, None).expect("destroyer: no process slot");

    let (stack_bottom, stack_top) = super::kstack::alloc().expect("destroyer: no kernel stack");
    *pcb.mem.lock() = MemoryLayout {
        kernel_stack_top: stack_top,
        kernel_stack_bottom: stack_bottom,
        ..Default::default()
    };

    // SAFETY: `stack_top` was just mapped by `kstack::alloc`, large enough
    // for the trampoline frame `prepare_kernel_stack` builds.
    let esp = unsafe { crate::arch::x86::context::prepare_kernel_stack(stack_top, destroyer_main, 0) };
    // SAFETY: `pcb.pid` has a live table slot and has not been made
    // runnable yet.
    unsafe { table::set_kernel_esp(pcb.pid, esp) };

    crate::sched::ready(pcb.pid);
    log::info!(target: "process", "pid {} spawned as destroyer", pcb.pid);
    pcb.pid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_is_none_before_any_record_and_clears_after_one_take() {
        let pid = Pid(5);
        assert!(take(pid).is_none());

        record(pid, None, 7);
        assert_eq!(take(pid), Some(7));
        assert!(take(pid).is_none());
    }

    #[test]
    fn enqueue_and_drain_preserve_order() {
        QUEUE.lock().clear();
        enqueue(Pid(10));
        enqueue(Pid(11));
        assert_eq!(QUEUE.lock().pop_front(), Some(Pid(10)));
        assert_eq!(QUEUE.lock().pop_front(), Some(Pid(11)));
        assert_eq!(QUEUE.lock().pop_front(), None);
    }
}
