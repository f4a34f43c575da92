//! 8259 PIC pair, remapped so IRQ0..15 land on IDT vectors 32..47.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC1_OFFSET: u8 = 32;
pub const PIC2_OFFSET: u8 = PIC1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    // SAFETY: offsets land in the 32..47 window reserved for IRQs, clear of
    // the 0..31 CPU exception vectors and the 0x80 syscall gate.
    Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

pub fn init() {
    // SAFETY: called once during early boot before interrupts are enabled.
    unsafe { PICS.lock().initialize() };
}

/// Sends end-of-interrupt for `vector` (an IDT vector 32..47).
///
/// # Safety
/// Must be called exactly once per IRQ, after the handler has finished
/// reading whatever device state caused the interrupt.
pub unsafe fn notify_end_of_interrupt(vector: u8) {
    PICS.lock().notify_end_of_interrupt(vector);
}
