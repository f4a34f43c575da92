//! 8254 PIT, programmed for a periodic tick on IRQ0.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::TIMER_HZ;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_HZ: u32 = 1_193_182;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Programs channel 0 for a `TIMER_HZ` square-wave periodic tick.
pub fn init() {
    let divisor = (PIT_BASE_HZ / TIMER_HZ) as u16;
    // SAFETY: 0x43/0x40 are the PIT's fixed, kernel-owned I/O ports.
    unsafe {
        x86::io::outb(PIT_COMMAND, 0x36); // channel 0, lobyte/hibyte, mode 3 (square wave)
        x86::io::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        x86::io::outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}

/// Called from the IRQ0 handler. Returns the new tick count.
pub fn tick() -> u64 {
    TICKS.fetch_add(1, Ordering::SeqCst) + 1
}

/// Monotonic tick count since boot, at `TIMER_HZ` resolution.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Milliseconds since boot, derived from the tick counter.
pub fn uptime_ms() -> u64 {
    ticks() * 1000 / TIMER_HZ as u64
}
