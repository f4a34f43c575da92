//! PS/2 mouse driver (IRQ12, IDT vector 44).
//!
//! Standard 3-byte packet protocol: byte 0 carries button state and the
//! sign/overflow bits for the deltas in bytes 1 and 2. Packets accumulate
//! across interrupts since the controller delivers one byte at a time.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

const DATA_PORT: u16 = 0x60;
const COMMAND_PORT: u16 = 0x64;
const STATUS_OUTPUT_FULL: u8 = 0x01;
const STATUS_AUX_DATA: u8 = 0x20;

const BUTTON_LEFT: u8 = 0x01;
const BUTTON_RIGHT: u8 = 0x02;
const BUTTON_MIDDLE: u8 = 0x04;

static PACKET: [AtomicU8; 3] = [AtomicU8::new(0), AtomicU8::new(0), AtomicU8::new(0)];
static PACKET_IDX: AtomicUsize = AtomicUsize::new(0);
static LAST_BUTTONS: AtomicU8 = AtomicU8::new(0);

fn status() -> u8 {
    // SAFETY: 0x64 is the PS/2 controller's fixed status/command port.
    unsafe { x86::io::inb(COMMAND_PORT) }
}

fn wait_input_clear() {
    for _ in 0..10_000 {
        if status() & 0x02 == 0 {
            return;
        }
    }
}

fn wait_output_ready() -> bool {
    for _ in 0..10_000 {
        if status() & STATUS_OUTPUT_FULL != 0 {
            return true;
        }
    }
    false
}

fn write_command(byte: u8) {
    wait_input_clear();
    // SAFETY: 0x64 is the PS/2 controller's fixed command port.
    unsafe { x86::io::outb(COMMAND_PORT, byte) };
}

fn write_data(byte: u8) {
    wait_input_clear();
    // SAFETY: 0x60 is the PS/2 controller's fixed data port.
    unsafe { x86::io::outb(DATA_PORT, byte) };
}

fn read_data() -> Option<u8> {
    // SAFETY: 0x60 is the PS/2 controller's fixed data port.
    wait_output_ready().then(|| unsafe { x86::io::inb(DATA_PORT) })
}

fn aux_write(cmd: u8) {
    write_command(0xD4); // next data byte goes to the auxiliary device
    write_data(cmd);
}

/// Enables the auxiliary (mouse) port, unmasks IRQ12 in the controller's
/// configuration byte, and puts the mouse into streaming mode.
pub fn init() {
    write_command(0xA8); // enable auxiliary device

    write_command(0x20); // read controller configuration byte
    if let Some(mut config) = read_data() {
        config |= 0x02; // enable IRQ12
        config &= !0x20; // enable the auxiliary clock
        write_command(0x60);
        write_data(config);
    }

    aux_write(0xFF); // reset
    let _ = read_data(); // ack
    let _ = read_data(); // self-test result
    let _ = read_data(); // device id

    aux_write(0xF6); // defaults
    let _ = read_data();

    aux_write(0xF4); // enable data reporting
    let _ = read_data();
}

/// Called from the IRQ12 handler. Accumulates one byte of the current
/// packet and, once a full packet has arrived, posts the resulting UI
/// events (move, and any button transitions).
pub fn on_irq() {
    if status() & (STATUS_OUTPUT_FULL | STATUS_AUX_DATA) != (STATUS_OUTPUT_FULL | STATUS_AUX_DATA)
    {
        return;
    }
    let byte = read_data().unwrap_or(0);

    let idx = PACKET_IDX.load(Ordering::Relaxed);
    PACKET[idx].store(byte, Ordering::Relaxed);
    let next = idx + 1;

    if next < 3 {
        PACKET_IDX.store(next, Ordering::Relaxed);
        return;
    }
    PACKET_IDX.store(0, Ordering::Relaxed);

    let status_byte = PACKET[0].load(Ordering::Relaxed);
    if status_byte & 0x08 == 0 {
        return; // not aligned to a packet boundary; drop and resync
    }

    let raw_dx = PACKET[1].load(Ordering::Relaxed);
    let raw_dy = PACKET[2].load(Ordering::Relaxed);
    let dx = sign_extend(raw_dx, status_byte & 0x10 != 0);
    let dy = -sign_extend(raw_dy, status_byte & 0x20 != 0); // PS/2 y is inverted

    if dx != 0 || dy != 0 {
        crate::graphics::events::post_mouse_move(dx, dy);
    }

    let buttons = status_byte & (BUTTON_LEFT | BUTTON_RIGHT | BUTTON_MIDDLE);
    let previous = LAST_BUTTONS.swap(buttons, Ordering::Relaxed);
    for bit in [BUTTON_LEFT, BUTTON_RIGHT, BUTTON_MIDDLE] {
        let was_down = previous & bit != 0;
        let is_down = buttons & bit != 0;
        if is_down && !was_down {
            crate::graphics::events::post_mouse_click(bit as u32);
        } else if was_down && !is_down {
            crate::graphics::events::post_mouse_unclick(bit as u32);
        }
    }
}

fn sign_extend(byte: u8, negative: bool) -> i32 {
    if negative {
        byte as i32 - 256
    } else {
        byte as i32
    }
}
