//! PS/2 keyboard driver (IRQ1, IDT vector 33).
//!
//! Raw scancodes are routed to the key window's event pipe rather than
//! decoding them in the kernel (§4.13, "Keyboard scancodes ... written to
//! the pipe as fixed-size ui_event records") -- key translation is a
//! userland concern here, not a kernel one.

const DATA_PORT: u16 = 0x60;
const STATUS_PORT: u16 = 0x64;
const STATUS_OUTPUT_FULL: u8 = 0x01;

fn status() -> u8 {
    // SAFETY: 0x64 is the PS/2 controller's fixed status port.
    unsafe { x86::io::inb(STATUS_PORT) }
}

fn read_data() -> u8 {
    // SAFETY: 0x60 is the PS/2 controller's fixed data port.
    unsafe { x86::io::inb(DATA_PORT) }
}

/// Called from the IRQ1 handler. Drains the controller's output buffer (one
/// byte is normally pending, but a slow handler can let a second queue up)
/// and forwards each scancode to the key window.
pub fn on_irq() {
    while status() & STATUS_OUTPUT_FULL != 0 {
        let scancode = read_data();
        crate::graphics::events::post_keyboard(scancode as u32);
    }
}
