//! UI event wire format and the driver-facing entry points
//! (`post_keyboard`, `post_mouse_move`, `post_mouse_click`,
//! `post_mouse_unclick`) that the PS/2 drivers call straight from IRQ
//! context. Everything here just decodes the raw device input and hands it
//! to the compositor; window management (focus rotation, drag, resize,
//! chrome hit-testing) lives there.

use crate::config::UI_EVENT_SIZE;

use super::compositor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UiEventKind {
    Keyboard = 0,
    MouseMove = 1,
    MouseClick = 2,
    MouseUnclick = 3,
    Scroll = 4,
    Sleep = 5,
    Wake = 6,
    ResizeRequest = 7,
}

/// Fixed 24-byte record delivered over a responder's event pipe, one per
/// `UI_EVENT_SIZE`-sized read. `x`/`y` double up as resize width/height for
/// `ResizeRequest`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UiEvent {
    pub kind: UiEventKind,
    pub code: u32,
    pub x: i32,
    pub y: i32,
    pub vscroll: i8,
    pub hscroll: i8,
}

impl UiEvent {
    pub fn to_bytes(self) -> [u8; UI_EVENT_SIZE] {
        let mut out = [0u8; UI_EVENT_SIZE];
        out[0..4].copy_from_slice(&(self.kind as u32).to_ne_bytes());
        out[4..8].copy_from_slice(&self.code.to_ne_bytes());
        out[8..12].copy_from_slice(&self.x.to_ne_bytes());
        out[12..16].copy_from_slice(&self.y.to_ne_bytes());
        out[16] = self.vscroll as u8;
        out[17] = self.hscroll as u8;
        out
    }
}

const _: () = assert!(core::mem::size_of::<[u8; UI_EVENT_SIZE]>() == UI_EVENT_SIZE);

/// Called from the keyboard IRQ handler with one raw scancode at a time.
pub fn post_keyboard(scancode: u32) {
    compositor::handle_keyboard_event(scancode as u8);
}

/// Called from the mouse IRQ handler with the packet's signed delta.
pub fn post_mouse_move(dx: i32, dy: i32) {
    compositor::handle_mouse_move(dx, dy);
}

/// `button` is the PS/2 status-byte bit (0x01 left, 0x02 right, 0x04 middle).
pub fn post_mouse_click(button: u32) {
    compositor::handle_mouse_click(button_index(button));
}

pub fn post_mouse_unclick(button: u32) {
    compositor::handle_mouse_unclick(button_index(button));
}

fn button_index(bit: u32) -> u8 {
    match bit {
        0x01 => 0,
        0x02 => 1,
        0x04 => 2,
        _ => 0xff,
    }
}
