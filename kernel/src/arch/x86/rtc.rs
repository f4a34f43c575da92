//! CMOS RTC, configured for a periodic secondary tick on IRQ8.
//!
//! Register C must be read after every RTC IRQ to re-arm the periodic
//! interrupt, approximated here as a 1 ms/unit bookkeeping tick.

use core::sync::atomic::{AtomicU64, Ordering};

const CMOS_ADDRESS: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;
const REG_A: u8 = 0x0A;
const REG_B: u8 = 0x0B;
const REG_C: u8 = 0x0C;

static TICKS: AtomicU64 = AtomicU64::new(0);

fn read(reg: u8) -> u8 {
    // SAFETY: 0x70/0x71 are the CMOS RTC's fixed, kernel-owned I/O ports.
    unsafe {
        x86::io::outb(CMOS_ADDRESS, reg);
        x86::io::inb(CMOS_DATA)
    }
}

fn write(reg: u8, value: u8) {
    // SAFETY: see `read`.
    unsafe {
        x86::io::outb(CMOS_ADDRESS, reg);
        x86::io::outb(CMOS_DATA, value);
    }
}

/// Enables the RTC periodic interrupt at its fastest safe rate.
pub fn init() {
    let prev_a = read(REG_A);
    write(REG_A, (prev_a & 0xF0) | 0x06); // rate selector -> ~1024 Hz source
    let prev_b = read(REG_B);
    write(REG_B, prev_b | 0x40); // enable periodic interrupt enable (PIE)
    let _ = read(REG_C); // clear any pending flag before unmasking IRQ8
}

/// Called from the IRQ8 handler. Re-arms the RTC and returns the new tick
/// count.
pub fn tick() -> u64 {
    let _ = read(REG_C);
    TICKS.fetch_add(1, Ordering::SeqCst) + 1
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}
