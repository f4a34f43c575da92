//! Generic blocking wait queue used by pipes, process exit-wait, and UI event
//! delivery.

use alloc::vec::Vec;

use spin::Mutex;

use crate::process::Pid;

/// A list of parked pids plus the wake mechanism to resume them. Contains no
/// data of its own; callers re-check their own condition after waking since
/// a wake is a hint, not a guaranteed state change (standard spurious-wakeup
/// discipline).
pub struct WaitQueue {
    parked: Mutex<Vec<Pid>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Parks the calling task until woken. Must be called with no locks the
    /// waker would need held.
    pub fn park(&self) {
        let pid = match crate::process::current_pid() {
            Some(pid) => pid,
            None => return,
        };
        self.parked.lock().push(pid);
        crate::sched::block_current();
        crate::sched::yield_cpu();
    }

    pub fn wake_all(&self) {
        let mut parked = self.parked.lock();
        for pid in parked.drain(..) {
            crate::sched::wake(pid);
        }
    }

    pub fn wake_one(&self) {
        let mut parked = self.parked.lock();
        if !parked.is_empty() {
            let pid = parked.remove(0);
            crate::sched::wake(pid);
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
