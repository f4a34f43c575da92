//! Backing framebuffer: a heap-allocated `FB_WIDTH * FB_HEIGHT` pixel
//! buffer standing in for bootloader-provided VRAM (there is no VBE/GOP
//! mode-setting in this kernel). The compositor's `present` call is the
//! only writer; everything else here is a generic `GraphicsContext` useful
//! for early boot diagnostics before the compositor takes over.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::{Color, GraphicsContext, Rect};
use crate::config::{FB_HEIGHT, FB_WIDTH};
use crate::error::KernelError;

pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self {
            width: FB_WIDTH as u32,
            height: FB_HEIGHT as u32,
            pixels: vec![0; FB_WIDTH * FB_HEIGHT],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn replace(&mut self, pixels: &[u32]) {
        let n = self.pixels.len().min(pixels.len());
        self.pixels[..n].copy_from_slice(&pixels[..n]);
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsContext for Framebuffer {
    fn draw_pixel(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        self.pixels[y as usize * self.width as usize + x as usize] = color.to_u32();
    }

    fn draw_rect(&mut self, rect: Rect, color: Color) {
        for x in rect.x..(rect.x + rect.width as i32) {
            self.draw_pixel(x, rect.y, color);
            self.draw_pixel(x, rect.y + rect.height as i32 - 1, color);
        }
        for y in rect.y..(rect.y + rect.height as i32) {
            self.draw_pixel(rect.x, y, color);
            self.draw_pixel(rect.x + rect.width as i32 - 1, y, color);
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        for y in rect.y..(rect.y + rect.height as i32) {
            for x in rect.x..(rect.x + rect.width as i32) {
                self.draw_pixel(x, y, color);
            }
        }
    }

    fn clear(&mut self, color: Color) {
        self.fill_rect(
            Rect { x: 0, y: 0, width: self.width, height: self.height },
            color,
        );
    }
}

static FRAMEBUFFER: Mutex<Option<Framebuffer>> = Mutex::new(None);

/// Execute a closure with the framebuffer (mutable access); a no-op before
/// `init` has run.
pub fn with_framebuffer<R>(f: impl FnOnce(&mut Framebuffer) -> R) -> Option<R> {
    FRAMEBUFFER.lock().as_mut().map(f)
}

/// Copies a full `FB_WIDTH * FB_HEIGHT` composited frame straight into the
/// backing buffer, bypassing `GraphicsContext` -- the compositor already
/// did its own blending.
pub fn present(pixels: &[u32]) {
    if let Some(fb) = FRAMEBUFFER.lock().as_mut() {
        fb.replace(pixels);
    }
}

pub fn init() -> Result<(), KernelError> {
    log::info!(target: "graphics", "initializing framebuffer");
    *FRAMEBUFFER.lock() = Some(Framebuffer::new());
    log::info!(target: "graphics", "framebuffer ready ({}x{})", FB_WIDTH, FB_HEIGHT);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_framebuffer_matches_configured_geometry() {
        let fb = Framebuffer::new();
        assert_eq!(fb.width(), FB_WIDTH as u32);
        assert_eq!(fb.height(), FB_HEIGHT as u32);
    }

    #[test]
    fn present_overwrites_backing_buffer() {
        *FRAMEBUFFER.lock() = Some(Framebuffer::new());
        let frame = vec![0xFFFF_FFFF; FB_WIDTH * FB_HEIGHT];
        present(&frame);
        with_framebuffer(|fb| assert_eq!(fb.pixels[0], 0xFFFF_FFFF));
    }
}
