//! UI server syscalls: `ui_register`, `ui_make_responder`, `ui_split`,
//! `ui_resume`, `ui_swap_buffers`, `ui_wait`, `ui_yield`.
//!
//! One responder window per `(gid, window_id)`; `ui_split` is the only way
//! a single thread group ends up owning more than one.

use crate::error::{KernelError, KernelResult};
use crate::graphics::compositor::{self, WindowId};
use crate::process::pcb::Pid;
use crate::process::table;
use crate::syscall::uaccess;

pub fn ui_register(current: Pid) -> KernelResult<i32> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    pcb.ui.lock().has_ui = true;
    Ok(0)
}

fn require_registered(current: Pid) -> KernelResult<()> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    if pcb.ui.lock().has_ui {
        Ok(())
    } else {
        Err(KernelError::PermissionDenied)
    }
}

fn gid_of(current: Pid) -> KernelResult<Pid> {
    Ok(table::get(current).ok_or(KernelError::NoSuchProcess)?.gid)
}

pub fn ui_make_responder(current: Pid, width: u32, height: u32) -> KernelResult<i32> {
    require_registered(current)?;
    let gid = gid_of(current)?;
    let id = compositor::make_responder(gid, width, height)?;
    Ok(id.0 as i32)
}

pub fn ui_split(current: Pid, window_id: u32, axis: u32) -> KernelResult<i32> {
    require_registered(current)?;
    let gid = gid_of(current)?;
    let id = compositor::split(gid, WindowId(window_id), axis)?;
    Ok(id.0 as i32)
}

pub fn ui_resume(current: Pid, window_id: u32) -> KernelResult<i32> {
    let gid = gid_of(current)?;
    compositor::resume(gid, WindowId(window_id))?;
    Ok(0)
}

/// Reads the caller's `width * height` pixel buffer (already sized to the
/// window's current dimensions) and hands it to the compositor as the
/// window's new content, triggering a redraw.
pub fn ui_swap_buffers(current: Pid, window_id: u32, buf_ptr: u32) -> KernelResult<i32> {
    let gid = gid_of(current)?;
    let id = WindowId(window_id);
    let (w, h) = compositor::window_dim(gid, id)?;
    let npixels = (w as usize) * (h as usize);
    if buf_ptr == 0 {
        return Err(KernelError::InvalidArgument);
    }
    // SAFETY: syscalls run with the caller's own CR3 loaded; `buf_ptr` is a
    // plain user pointer exactly as `uaccess::user_slice` documents.
    let pixels: &[u32] = unsafe { core::slice::from_raw_parts(buf_ptr as *const u32, npixels) };
    compositor::swap_buffers(gid, id, pixels)?;
    Ok(0)
}

pub fn ui_wait(current: Pid, window_id: u32, buf_ptr: u32) -> KernelResult<i32> {
    let gid = gid_of(current)?;
    let node = compositor::event_reader(gid, WindowId(window_id))?;
    let buf = unsafe { uaccess::user_slice_mut(buf_ptr, crate::config::UI_EVENT_SIZE as u32) }?;
    let mut total = 0;
    while total < buf.len() {
        let n = node.ops.read(0, &mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total as i32)
}

pub fn ui_yield(current: Pid, window_id: u32) -> KernelResult<i32> {
    let gid = gid_of(current)?;
    compositor::yield_key(gid, WindowId(window_id));
    Ok(0)
}
