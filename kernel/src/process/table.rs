//! Static PCB slab: a fixed `MAX_PROCESS_COUNT`-entry table indexed directly
//! by pid, matching the source's `pcb_t pcbs[MAX_PROCESS_COUNT]`.
//!
//! Each occupied slot also carries the one piece of scheduling state that
//! does not belong on [`Pcb`] itself: the saved kernel stack pointer a
//! suspended task's next [`switch_kernel_stack`](crate::arch::x86::context::switch_kernel_stack)
//! resumes from. It lives in an `UnsafeCell` rather than behind a `Mutex`
//! because the save/restore pair brackets the actual stack switch -- a
//! `MutexGuard` held across that call would never be dropped until the task
//! is scheduled again, deadlocking the next lookup.

use alloc::sync::Arc;
use core::cell::UnsafeCell;

use spin::{Mutex, Once};

use super::pcb::{Pcb, Pid, Priority};
use crate::config::MAX_PROCESS_COUNT;
use crate::error::{KernelError, KernelResult};
use crate::mm::PhysAddr;

struct Slot {
    pcb: Arc<Pcb>,
    kernel_esp: UnsafeCell<u32>,
}

// SAFETY: `kernel_esp` is only ever read/written by `sched` with interrupts
// disabled around the context switch that uses it, which on this single-CPU
// kernel rules out concurrent access.
unsafe impl Sync for Slot {}

const NO_SLOT: Option<Arc<Slot>> = None;
static TABLE: Mutex<[Option<Arc<Slot>>; MAX_PROCESS_COUNT]> = Mutex::new([NO_SLOT; MAX_PROCESS_COUNT]);

/// The init process's pid, recorded once by `spawn_init_process`. Orphans
/// are reparented here; its slot index is not assumed to be any particular
/// value since it is simply the first slot allocated at boot.
static INIT_PID: Once<Pid> = Once::new();

pub fn set_init_pid(pid: Pid) {
    INIT_PID.call_once(|| pid);
}

pub fn init_pid() -> Option<Pid> {
    INIT_PID.get().copied()
}

/// Finds a free slot, constructs a fresh [`Pcb`] in it via `make`, and
/// returns its pid. `make` receives the pid it was granted so it can stamp
/// it into the PCB it builds.
pub fn alloc_slot(
    parent: Option<Pid>,
    priority: Priority,
    cr3: PhysAddr,
    gid: Option<Pid>,
) -> KernelResult<Arc<Pcb>> {
    let mut table = TABLE.lock();
    let index = table
        .iter()
        .position(|slot| slot.is_none())
        .ok_or(KernelError::ProcessLimit)?;
    let pid = Pid(index as u32);
    let gid = gid.unwrap_or(pid);
    let pcb = Arc::new(Pcb::new(pid, gid, parent, priority, cr3));
    table[index] = Some(Arc::new(Slot {
        pcb: pcb.clone(),
        kernel_esp: UnsafeCell::new(0),
    }));
    Ok(pcb)
}

pub fn get(pid: Pid) -> Option<Arc<Pcb>> {
    TABLE
        .lock()
        .get(pid.0 as usize)
        .and_then(|s| s.as_ref())
        .map(|s| s.pcb.clone())
}

/// Removes `pid`'s slot entirely, freeing it for reuse. Callers must have
/// already torn down the process's address space and resources.
pub fn remove(pid: Pid) {
    if let Some(slot) = TABLE.lock().get_mut(pid.0 as usize) {
        *slot = None;
    }
}

pub fn all_pids() -> alloc::vec::Vec<Pid> {
    TABLE
        .lock()
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.as_ref().map(|_| Pid(i as u32)))
        .collect()
}

/// Reads the saved kernel stack pointer for `pid`'s next resume.
///
/// # Safety
/// Caller must hold off any concurrent scheduling activity (interrupts
/// disabled) for the duration of the read.
pub unsafe fn kernel_esp(pid: Pid) -> Option<u32> {
    let table = TABLE.lock();
    let slot = table.get(pid.0 as usize)?.as_ref()?;
    // SAFETY: see module docs; caller contract forwarded.
    Some(unsafe { *slot.kernel_esp.get() })
}

/// Overwrites the saved kernel stack pointer for `pid`.
///
/// # Safety
/// Same discipline as [`kernel_esp`].
pub unsafe fn set_kernel_esp(pid: Pid, esp: u32) {
    let table = TABLE.lock();
    if let Some(slot) = table.get(pid.0 as usize).and_then(|s| s.as_ref()) {
        // SAFETY: see module docs.
        unsafe { *slot.kernel_esp.get() = esp };
    }
}

/// Raw pointer to `pid`'s saved-esp cell, for the one instant
/// `switch_kernel_stack` needs to write through it directly rather than via
/// a read-modify-write pair.
///
/// # Safety
/// Same discipline as [`kernel_esp`]; the returned pointer must not outlive
/// the interrupts-disabled section it was obtained in.
pub unsafe fn kernel_esp_ptr(pid: Pid) -> Option<*mut u32> {
    let table = TABLE.lock();
    let slot = table.get(pid.0 as usize)?.as_ref()?;
    Some(slot.kernel_esp.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_remove_round_trips() {
        let pcb = alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
        let pid = pcb.pid;
        assert!(get(pid).is_some());
        remove(pid);
        assert!(get(pid).is_none());
    }

    #[test]
    fn exhaustion_reports_process_limit() {
        let mut pids = alloc::vec::Vec::new();
        for _ in 0..MAX_PROCESS_COUNT {
            pids.push(alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap().pid);
        }
        assert_eq!(
            alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap_err(),
            KernelError::ProcessLimit
        );
        for pid in pids {
            remove(pid);
        }
    }
}
