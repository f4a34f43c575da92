//! Window compositor: responder list, key-window focus, and the
//! painter's-algorithm redraw (wallpaper, then every window tail-to-head,
//! then leaving the key window's chrome brightest on top) that
//! `framebuffer::present` writes out.
//!
//! Each window's pixel content is a kernel-owned snapshot (`Responder::content`)
//! populated only by the `ui_swap_buffers` syscall, which reads the calling
//! process's own buffer with its own CR3 still loaded -- the compositor
//! itself never reaches across address spaces. Event delivery uses
//! `Pipe::try_write`, which never blocks, since the keyboard/mouse drivers
//! call into this module straight from IRQ context.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{FB_HEIGHT, FB_WIDTH, UI_OPACITY_MAX, UI_OPACITY_MIN, UI_OPACITY_STEP};
use crate::error::{KernelError, KernelResult};
use crate::fs::node::FsNode;
use crate::fs::pipe::{self, Pipe};
use crate::process::pcb::Pid;
use crate::sync::once_lock::GlobalState;

use super::cursor;
use super::events::{UiEvent, UiEventKind};
use super::framebuffer;

pub const TITLE_BAR_HEIGHT: i32 = 20;
pub const TITLE_BAR_BUTTON_WIDTH: i32 = 20;
pub const RESIZE_CONTROL_SIZE: i32 = 8;
const MIN_WINDOW_WIDTH: u32 = TITLE_BAR_BUTTON_WIDTH as u32 * 3;
const MIN_WINDOW_HEIGHT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowId(pub u32);

struct Responder {
    gid: Pid,
    window_id: WindowId,
    pos: (i32, i32),
    dim: (u32, u32),
    resize_dim: (u32, u32),
    opacity: u8,
    moving: bool,
    resizing_w: bool,
    resizing_h: bool,
    mouse_move_events_enabled: bool,
    /// Kernel-owned snapshot of the window's client buffer, last refreshed
    /// by `ui_swap_buffers`.
    content: Vec<u32>,
    events: Arc<Pipe>,
    event_read: Arc<FsNode>,
}

impl Responder {
    fn mouse_in_content(&self, mx: i32, my: i32) -> bool {
        in_rect(mx, my, self.pos.0, self.pos.1, self.dim.0, self.dim.1)
    }

    fn mouse_in_close_button(&self, mx: i32, my: i32) -> bool {
        in_rect(mx, my, self.pos.0, self.pos.1 - TITLE_BAR_HEIGHT, TITLE_BAR_BUTTON_WIDTH as u32, TITLE_BAR_HEIGHT as u32)
    }

    fn mouse_in_opacity_button(&self, mx: i32, my: i32) -> bool {
        let x = self.pos.0 + self.dim.0 as i32 - TITLE_BAR_BUTTON_WIDTH;
        in_rect(mx, my, x, self.pos.1 - TITLE_BAR_HEIGHT, TITLE_BAR_BUTTON_WIDTH as u32, TITLE_BAR_HEIGHT as u32)
    }

    fn mouse_in_title_bar(&self, mx: i32, my: i32) -> bool {
        in_rect(mx, my, self.pos.0, self.pos.1 - TITLE_BAR_HEIGHT, self.dim.0, TITLE_BAR_HEIGHT as u32)
    }

    fn mouse_in_resize_corner(&self, mx: i32, my: i32) -> bool {
        in_rect(mx, my, self.pos.0 + self.dim.0 as i32, self.pos.1 + self.dim.1 as i32, RESIZE_CONTROL_SIZE as u32, RESIZE_CONTROL_SIZE as u32)
    }
}

fn in_rect(mx: i32, my: i32, x: i32, y: i32, w: u32, h: u32) -> bool {
    mx >= x && mx < x + w as i32 && my >= y && my < y + h as i32
}

pub struct Compositor {
    /// Head is the key (focused) window; tail is least-recently-focused.
    responders: VecDeque<Responder>,
    mouse_pos: (i32, i32),
    mouse_left_down: bool,
    shift_held: bool,
    meta_held: bool,
    next_window_id: u32,
    wallpaper: Vec<u32>,
}

impl Compositor {
    fn new() -> Self {
        Self {
            responders: VecDeque::new(),
            mouse_pos: (0, 0),
            mouse_left_down: false,
            shift_held: false,
            meta_held: false,
            next_window_id: 1,
            wallpaper: vec![0xFF20_2020; FB_WIDTH * FB_HEIGHT],
        }
    }

    fn has_window(&self, gid: Pid) -> bool {
        self.responders.iter().any(|r| r.gid == gid)
    }

    fn find_by_window(&self, window_id: WindowId) -> Option<usize> {
        self.responders.iter().position(|r| r.window_id == window_id)
    }

    fn alloc_window_id(&mut self) -> WindowId {
        let id = WindowId(self.next_window_id);
        self.next_window_id += 1;
        id
    }

    fn make_responder(&mut self, gid: Pid, w: u32, h: u32) -> KernelResult<WindowId> {
        if self.has_window(gid) {
            return Err(KernelError::Exists);
        }
        let dim = (w.clamp(MIN_WINDOW_WIDTH, FB_WIDTH as u32), h.clamp(MIN_WINDOW_HEIGHT, FB_HEIGHT as u32));
        let id = self.alloc_window_id();
        let (event_read, _write_end, events) = pipe::open_pair_raw();

        let responder = Responder {
            gid,
            window_id: id,
            pos: ((FB_WIDTH / 4) as i32, (FB_HEIGHT / 4) as i32),
            dim,
            resize_dim: dim,
            opacity: UI_OPACITY_MAX,
            moving: false,
            resizing_w: false,
            resizing_h: false,
            mouse_move_events_enabled: false,
            content: vec![0; (dim.0 * dim.1) as usize],
            events,
            event_read,
        };

        if let Some(old_head) = self.responders.front() {
            dispatch(old_head, UiEventKind::Sleep);
        }
        dispatch(&responder, UiEventKind::Wake);
        self.responders.push_front(responder);
        Ok(id)
    }

    /// `ui_split`: shrinks the caller's own window along `axis` (0 =
    /// horizontal, new window takes the right half; 1 = vertical, new
    /// window takes the bottom half) and hands the freed region to a
    /// brand-new sibling window for the same thread group.
    fn split(&mut self, gid: Pid, window_id: WindowId, axis: u32) -> KernelResult<WindowId> {
        let idx = self.find_by_window(window_id).ok_or(KernelError::NoSuchDevice)?;
        if self.responders[idx].gid != gid {
            return Err(KernelError::PermissionDenied);
        }
        let (orig_pos, orig_dim) = {
            let r = &self.responders[idx];
            (r.pos, r.dim)
        };

        let (new_pos, new_dim, shrunk_dim) = if axis == 0 {
            let half = orig_dim.0 / 2;
            ((orig_pos.0 + half as i32, orig_pos.1), (orig_dim.0 - half, orig_dim.1), (half, orig_dim.1))
        } else {
            let half = orig_dim.1 / 2;
            ((orig_pos.0, orig_pos.1 + half as i32), (orig_dim.0, orig_dim.1 - half), (orig_dim.0, half))
        };

        {
            let r = &mut self.responders[idx];
            r.dim = shrunk_dim;
            r.resize_dim = shrunk_dim;
            r.content = vec![0; (shrunk_dim.0 * shrunk_dim.1) as usize];
            dispatch(r, UiEventKind::ResizeRequest);
        }

        let id = self.alloc_window_id();
        let (event_read, _write_end, events) = pipe::open_pair_raw();
        let sibling = Responder {
            gid,
            window_id: id,
            pos: new_pos,
            dim: new_dim,
            resize_dim: new_dim,
            opacity: UI_OPACITY_MAX,
            moving: false,
            resizing_w: false,
            resizing_h: false,
            mouse_move_events_enabled: false,
            content: vec![0; (new_dim.0 * new_dim.1) as usize],
            events,
            event_read,
        };
        dispatch(&sibling, UiEventKind::Wake);
        self.responders.insert(idx + 1, sibling);
        Ok(id)
    }

    fn kill_window(&mut self, window_id: WindowId) {
        let Some(idx) = self.find_by_window(window_id) else { return };
        let was_key = idx == 0;
        self.responders.remove(idx);
        if was_key {
            if let Some(new_head) = self.responders.front() {
                dispatch(new_head, UiEventKind::Wake);
            }
        }
    }

    fn kill_gid(&mut self, gid: Pid) {
        let was_key = self.responders.front().map(|r| r.gid) == Some(gid);
        self.responders.retain(|r| r.gid != gid);
        if was_key {
            if let Some(new_head) = self.responders.front() {
                dispatch(new_head, UiEventKind::Wake);
            }
        }
    }

    fn rotate_key(&mut self) {
        if let Some(old) = self.responders.pop_front() {
            dispatch(&old, UiEventKind::Sleep);
            self.responders.push_back(old);
        }
        if let Some(new_head) = self.responders.front() {
            dispatch(new_head, UiEventKind::Wake);
        }
    }

    fn yield_key(&mut self, gid: Pid, window_id: WindowId) -> bool {
        if self.responders.len() <= 1 {
            return false;
        }
        let Some(idx) = self.find_by_window(window_id) else { return false };
        if idx != 0 || self.responders[idx].gid != gid {
            return false;
        }
        self.rotate_key();
        true
    }

    /// `ui_resume`: promotes `window_id` straight to key focus, the way a
    /// mouse click on a background window's title bar would, without
    /// needing the click itself.
    fn resume(&mut self, gid: Pid, window_id: WindowId) -> KernelResult<()> {
        let idx = self.find_by_window(window_id).ok_or(KernelError::NoSuchDevice)?;
        if self.responders[idx].gid != gid {
            return Err(KernelError::PermissionDenied);
        }
        if idx == 0 {
            return Ok(());
        }
        if let Some(old_head) = self.responders.front() {
            dispatch(old_head, UiEventKind::Sleep);
        }
        let responder = self.responders.remove(idx).expect("index just found");
        dispatch(&responder, UiEventKind::Wake);
        self.responders.push_front(responder);
        Ok(())
    }

    fn swap_buffers(&mut self, gid: Pid, window_id: WindowId, pixels: &[u32]) -> KernelResult<()> {
        let idx = self.find_by_window(window_id).ok_or(KernelError::NoSuchDevice)?;
        let r = &mut self.responders[idx];
        if r.gid != gid {
            return Err(KernelError::PermissionDenied);
        }
        let n = r.content.len().min(pixels.len());
        r.content[..n].copy_from_slice(&pixels[..n]);
        Ok(())
    }

    fn event_reader(&self, gid: Pid, window_id: WindowId) -> KernelResult<Arc<FsNode>> {
        let idx = self.find_by_window(window_id).ok_or(KernelError::NoSuchDevice)?;
        let r = &self.responders[idx];
        if r.gid != gid {
            return Err(KernelError::PermissionDenied);
        }
        Ok(r.event_read.clone())
    }

    fn set_wallpaper(&mut self, pixels: &[u32]) {
        let n = self.wallpaper.len().min(pixels.len());
        self.wallpaper[..n].copy_from_slice(&pixels[..n]);
    }

    fn enable_mouse_move_events(&mut self, window_id: WindowId, enabled: bool) {
        if let Some(idx) = self.find_by_window(window_id) {
            self.responders[idx].mouse_move_events_enabled = enabled;
        }
    }

    /// Re-paints the whole back buffer in z-order (wallpaper, then every
    /// window tail-to-head so the key window paints last/on top) and
    /// presents it to the framebuffer. A whole-frame redraw rather than the
    /// dirty-rect clipping the original does per gesture, but still a real
    /// multi-stage composite (wallpaper -> windows -> present).
    fn redraw_all(&self) {
        let mut back = self.wallpaper.clone();
        for (i, r) in self.responders.iter().rev().enumerate() {
            let is_key = i == self.responders.len() - 1;
            blit_window(&mut back, r, is_key);
        }
        cursor::blit(&mut back, FB_WIDTH, FB_HEIGHT, self.mouse_pos.0, self.mouse_pos.1);
        framebuffer::present(&back);
    }
}

fn blit_window(back: &mut [u32], r: &Responder, is_key: bool) {
    let alpha = r.opacity as u32;
    for y in 0..r.dim.1 {
        let fb_y = r.pos.1 + y as i32;
        if fb_y < 0 || fb_y as usize >= FB_HEIGHT {
            continue;
        }
        for x in 0..r.dim.0 {
            let fb_x = r.pos.0 + x as i32;
            if fb_x < 0 || fb_x as usize >= FB_WIDTH {
                continue;
            }
            let src = r.content[(y * r.dim.0 + x) as usize];
            let dst_idx = fb_y as usize * FB_WIDTH + fb_x as usize;
            back[dst_idx] = blend(src, back[dst_idx], alpha);
        }
    }

    let bar_color = if is_key { 0xFF50_5050 } else { 0xFF30_3030 };
    for y in 0..TITLE_BAR_HEIGHT {
        let fb_y = r.pos.1 - TITLE_BAR_HEIGHT + y;
        if fb_y < 0 || fb_y as usize >= FB_HEIGHT {
            continue;
        }
        for x in 0..r.dim.0 as i32 {
            let fb_x = r.pos.0 + x;
            if fb_x < 0 || fb_x as usize >= FB_WIDTH {
                continue;
            }
            let dst_idx = fb_y as usize * FB_WIDTH + fb_x as usize;
            back[dst_idx] = blend(bar_color, back[dst_idx], alpha);
        }
    }
}

fn blend(src: u32, dst: u32, alpha: u32) -> u32 {
    if alpha >= 0xff {
        return src;
    }
    let mut out = 0u32;
    for shift in [0, 8, 16, 24] {
        let s = (src >> shift) & 0xff;
        let d = (dst >> shift) & 0xff;
        let c = (s * alpha + d * (255 - alpha)) / 255;
        out |= c << shift;
    }
    out
}

fn dispatch(r: &Responder, kind: UiEventKind) {
    let (width, height) = if kind == UiEventKind::ResizeRequest { r.resize_dim } else { r.dim };
    let ev = UiEvent { kind, code: 0, x: width as i32, y: height as i32, vscroll: 0, hscroll: 0 };
    r.events.try_write(&ev.to_bytes());
}

fn dispatch_to(r: &Responder, ev: UiEvent) {
    r.events.try_write(&ev.to_bytes());
}

static COMPOSITOR: GlobalState<Mutex<Compositor>> = GlobalState::new();

pub fn init() {
    let _ = COMPOSITOR.init(Mutex::new(Compositor::new()));
}

fn with<R>(f: impl FnOnce(&mut Compositor) -> R) -> Option<R> {
    COMPOSITOR.with(|lock| f(&mut lock.lock()))
}

pub fn make_responder(gid: Pid, w: u32, h: u32) -> KernelResult<WindowId> {
    with(|c| c.make_responder(gid, w, h)).unwrap_or(Err(KernelError::NoSuchDevice))
}

pub fn split(gid: Pid, window_id: WindowId, axis: u32) -> KernelResult<WindowId> {
    with(|c| c.split(gid, window_id, axis)).unwrap_or(Err(KernelError::NoSuchDevice))
}

pub fn kill_gid(gid: Pid) {
    if with(|c| c.kill_gid(gid)).is_some() {
        with(|c| c.redraw_all());
    }
}

pub fn resume(gid: Pid, window_id: WindowId) -> KernelResult<()> {
    let r = with(|c| c.resume(gid, window_id)).unwrap_or(Err(KernelError::NoSuchDevice))?;
    with(|c| c.redraw_all());
    Ok(r)
}

pub fn yield_key(gid: Pid, window_id: WindowId) {
    let did = with(|c| c.yield_key(gid, window_id)).unwrap_or(false);
    if did {
        with(|c| c.redraw_all());
    }
}

pub fn swap_buffers(gid: Pid, window_id: WindowId, pixels: &[u32]) -> KernelResult<()> {
    let res = with(|c| c.swap_buffers(gid, window_id, pixels)).unwrap_or(Err(KernelError::NoSuchDevice));
    if res.is_ok() {
        with(|c| c.redraw_all());
    }
    res
}

pub fn event_reader(gid: Pid, window_id: WindowId) -> KernelResult<Arc<FsNode>> {
    with(|c| c.event_reader(gid, window_id)).unwrap_or(Err(KernelError::NoSuchDevice))
}

pub fn window_dim(gid: Pid, window_id: WindowId) -> KernelResult<(u32, u32)> {
    with(|c| {
        let idx = c.find_by_window(window_id).ok_or(KernelError::NoSuchDevice)?;
        if c.responders[idx].gid != gid {
            return Err(KernelError::PermissionDenied);
        }
        Ok(c.responders[idx].dim)
    })
    .unwrap_or(Err(KernelError::NoSuchDevice))
}

pub fn set_wallpaper(pixels: &[u32]) {
    with(|c| c.set_wallpaper(pixels));
    with(|c| c.redraw_all());
}

pub fn enable_mouse_move_events(window_id: WindowId, enabled: bool) {
    with(|c| c.enable_mouse_move_events(window_id, enabled));
}

const KB_SC_META: u8 = 0x5b;
const KB_SC_TAB: u8 = 0x0f;
const KB_SC_LSHIFT: u8 = 0x2a;
const KB_SC_RSHIFT: u8 = 0x36;
const KB_KEY_RELEASED_MASK: u8 = 0x80;

pub fn handle_keyboard_event(code: u8) {
    let pressed_code = code & !KB_KEY_RELEASED_MASK;
    let pressed = code & KB_KEY_RELEASED_MASK == 0;

    let rotated = with(|c| {
        match pressed_code {
            KB_SC_META => c.meta_held = pressed,
            KB_SC_LSHIFT => c.shift_held = pressed,
            KB_SC_RSHIFT => c.shift_held = c.shift_held || pressed,
            _ => {}
        }
        if c.meta_held && pressed_code == KB_SC_TAB && pressed {
            c.rotate_key();
            true
        } else {
            if let Some(head) = c.responders.front() {
                dispatch_to(head, UiEvent { kind: UiEventKind::Keyboard, code: code as u32, x: 0, y: 0, vscroll: 0, hscroll: 0 });
            }
            false
        }
    })
    .unwrap_or(false);

    if rotated {
        with(|c| c.redraw_all());
    }
}

pub fn handle_mouse_move(dx: i32, dy: i32) {
    let redraw = with(|c| {
        let old = c.mouse_pos;
        c.mouse_pos.0 = (c.mouse_pos.0 + dx).clamp(0, FB_WIDTH as i32 - 1);
        c.mouse_pos.1 = (c.mouse_pos.1 - dy).clamp(0, FB_HEIGHT as i32 - 1);

        if c.responders.is_empty() {
            return false;
        }
        let delta = (c.mouse_pos.0 - old.0, c.mouse_pos.1 - old.1);
        let moving = c.responders[0].moving;
        let resizing = c.responders[0].resizing_w || c.responders[0].resizing_h;

        if moving {
            c.responders[0].pos.0 += delta.0;
            c.responders[0].pos.1 += delta.1;
            true
        } else if resizing {
            let r = &mut c.responders[0];
            if r.resizing_w {
                r.resize_dim.0 = (r.resize_dim.0 as i32 + delta.0).max(MIN_WINDOW_WIDTH as i32) as u32;
            }
            if r.resizing_h {
                r.resize_dim.1 = (r.resize_dim.1 as i32 + delta.1).max(MIN_WINDOW_HEIGHT as i32) as u32;
            }
            true
        } else {
            if c.responders[0].mouse_move_events_enabled {
                let pos = c.responders[0].pos;
                dispatch_to(
                    &c.responders[0],
                    UiEvent {
                        kind: UiEventKind::MouseMove,
                        code: 0,
                        x: c.mouse_pos.0 - pos.0,
                        y: c.mouse_pos.1 - pos.1,
                        vscroll: 0,
                        hscroll: 0,
                    },
                );
            }
            false
        }
    })
    .unwrap_or(false);

    if redraw {
        with(|c| c.redraw_all());
    }
}

pub fn handle_mouse_click(button: u8) {
    if button != 0 {
        return; // only the left button drives window management
    }
    let redraw = with(|c| {
        let mouse = c.mouse_pos;
        c.mouse_left_down = true;
        let hit = c.responders.iter().position(|r| {
            r.mouse_in_close_button(mouse.0, mouse.1)
                || r.mouse_in_opacity_button(mouse.0, mouse.1)
                || r.mouse_in_title_bar(mouse.0, mouse.1)
                || r.mouse_in_content(mouse.0, mouse.1)
                || r.mouse_in_resize_corner(mouse.0, mouse.1)
        });
        let Some(idx) = hit else { return false };

        if c.responders[idx].mouse_in_close_button(mouse.0, mouse.1) {
            let id = c.responders[idx].window_id;
            c.kill_window(id);
            return true;
        }
        if c.responders[idx].mouse_in_opacity_button(mouse.0, mouse.1) {
            let r = &mut c.responders[idx];
            r.opacity = if r.opacity <= UI_OPACITY_MIN { UI_OPACITY_MAX } else { r.opacity - UI_OPACITY_STEP };
            return true;
        }

        let was_key = idx == 0;
        if !was_key {
            if let Some(responder) = c.responders.remove(idx) {
                if let Some(old_head) = c.responders.front() {
                    dispatch(old_head, UiEventKind::Sleep);
                }
                dispatch(&responder, UiEventKind::Wake);
                c.responders.push_front(responder);
            }
            return true;
        }

        if c.responders[idx].mouse_in_title_bar(mouse.0, mouse.1) {
            c.responders[idx].moving = true;
        } else if c.responders[idx].mouse_in_resize_corner(mouse.0, mouse.1) {
            c.responders[idx].resizing_w = true;
            c.responders[idx].resizing_h = true;
        } else {
            let pos = c.responders[idx].pos;
            dispatch_to(
                &c.responders[idx],
                UiEvent { kind: UiEventKind::MouseClick, code: 0, x: mouse.0 - pos.0, y: mouse.1 - pos.1, vscroll: 0, hscroll: 0 },
            );
        }
        false
    })
    .unwrap_or(false);

    if redraw {
        with(|c| c.redraw_all());
    }
}

pub fn handle_mouse_unclick(button: u8) {
    if button != 0 {
        return;
    }
    let redraw = with(|c| {
        c.mouse_left_down = false;
        if c.responders.is_empty() {
            return false;
        }
        let mouse = c.mouse_pos;
        let r = &mut c.responders[0];
        if r.resizing_w || r.resizing_h {
            r.resizing_w = false;
            r.resizing_h = false;
            r.dim = r.resize_dim;
            r.content = vec![0; (r.dim.0 * r.dim.1) as usize];
            dispatch(r, UiEventKind::ResizeRequest);
            true
        } else if r.moving {
            r.moving = false;
            false
        } else {
            let pos = r.pos;
            dispatch_to(r, UiEvent { kind: UiEventKind::MouseUnclick, code: 0, x: mouse.0 - pos.0, y: mouse.1 - pos.1, vscroll: 0, hscroll: 0 });
            false
        }
    })
    .unwrap_or(false);

    if redraw {
        with(|c| c.redraw_all());
    }
}

pub fn handle_scroll(vscroll: i8, hscroll: i8) {
    with(|c| {
        let mouse = c.mouse_pos;
        let shift = c.shift_held;
        if let Some(r) = c.responders.iter().find(|r| r.mouse_in_content(mouse.0, mouse.1)) {
            let (v, h) = if shift { (hscroll, vscroll) } else { (vscroll, hscroll) };
            dispatch_to(r, UiEvent { kind: UiEventKind::Scroll, code: 0, x: 0, y: 0, vscroll: v, hscroll: h });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_responder_rejects_second_window_for_same_gid() {
        let mut comp = Compositor::new();
        comp.make_responder(Pid(1), 200, 150).unwrap();
        assert_eq!(comp.make_responder(Pid(1), 200, 150).unwrap_err(), KernelError::Exists);
    }

    #[test]
    fn split_creates_sibling_window_for_same_gid() {
        let mut comp = Compositor::new();
        let first = comp.make_responder(Pid(1), 200, 150).unwrap();
        let second = comp.split(Pid(1), first, 0).unwrap();
        assert_ne!(first, second);
        assert_eq!(comp.responders.len(), 2);
    }

    #[test]
    fn kill_window_promotes_next_to_key() {
        let mut comp = Compositor::new();
        let first = comp.make_responder(Pid(1), 100, 100).unwrap();
        comp.make_responder(Pid(2), 100, 100).unwrap();
        comp.kill_window(first);
        assert_eq!(comp.responders.len(), 1);
        assert_eq!(comp.responders[0].gid, Pid(2));
    }
}
