//! ELF32 loader for `exec`: `ET_EXEC` only, at most two `PT_LOAD` segments
//! (text, data+bss), no dynamic linking, no relocation.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::mm::paging::{self, PageFlags};
use crate::mm::{PhysAddr, VirtAddr};
use crate::mm::pmm;

const EI_MAG0: usize = 0;
const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
const MAX_LOAD_SEGMENTS: usize = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Phdr {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// The result of a successful load: where execution should start, and the
/// highest mapped address (the initial heap break).
pub struct Loaded {
    pub entry: u32,
    pub image_end: u32,
}

fn read_ehdr(image: &[u8]) -> KernelResult<Ehdr> {
    if image.len() < core::mem::size_of::<Ehdr>() || image[EI_MAG0..EI_MAG0 + 4] != ELFMAG {
        return Err(KernelError::ExecFormat);
    }
    // SAFETY: length checked above; `Ehdr` has no padding-sensitive
    // invariants beyond what a zero-or-any byte pattern already satisfies.
    let ehdr = unsafe { core::ptr::read_unaligned(image.as_ptr() as *const Ehdr) };
    if ehdr.e_type != ET_EXEC {
        return Err(KernelError::ExecFormat);
    }
    Ok(ehdr)
}

fn program_headers(image: &[u8], ehdr: &Ehdr) -> KernelResult<Vec<Phdr>> {
    let phentsize = ehdr.e_phentsize as usize;
    let phnum = ehdr.e_phnum as usize;
    if phentsize < core::mem::size_of::<Phdr>() {
        return Err(KernelError::ExecFormat);
    }
    let mut headers = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let off = ehdr.e_phoff as usize + i * phentsize;
        if off + core::mem::size_of::<Phdr>() > image.len() {
            return Err(KernelError::ExecFormat);
        }
        // SAFETY: bounds checked above.
        let phdr = unsafe { core::ptr::read_unaligned(image[off..].as_ptr() as *const Phdr) };
        headers.push(phdr);
    }
    Ok(headers)
}

/// Maps and populates every `PT_LOAD` segment of `image` into the
/// *currently loaded* address space (the caller has already switched CR3 to
/// the target process). Rejects images with more than
/// [`MAX_LOAD_SEGMENTS`] loadable segments.
pub fn load(image: &[u8]) -> KernelResult<Loaded> {
    let ehdr = read_ehdr(image)?;
    let headers = program_headers(image, &ehdr)?;
    let loads: Vec<&Phdr> = headers.iter().filter(|p| p.p_type == PT_LOAD).collect();
    if loads.is_empty() || loads.len() > MAX_LOAD_SEGMENTS {
        return Err(KernelError::ExecFormat);
    }

    let mut image_end = 0u32;
    for phdr in &loads {
        if phdr.p_memsz == 0 {
            continue;
        }
        let start = VirtAddr::new(phdr.p_vaddr).align_down();
        let end = phdr.p_vaddr + phdr.p_memsz;
        let page_count = (end - start.as_u32()).div_ceil(PAGE_SIZE as u32);
        let flags = if phdr.p_flags & 0x2 != 0 {
            PageFlags::WRITABLE | PageFlags::USER
        } else {
            PageFlags::USER
        };

        for i in 0..page_count {
            let vaddr = start + i * PAGE_SIZE as u32;
            let frame = alloc_zeroed_frame()?;
            paging::map(vaddr, frame, flags)?;
        }

        if phdr.p_filesz > 0 {
            let file_start = phdr.p_offset as usize;
            let file_end = file_start + phdr.p_filesz as usize;
            if file_end > image.len() {
                return Err(KernelError::ExecFormat);
            }
            // SAFETY: the destination range was just mapped writable above.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    image[file_start..file_end].as_ptr(),
                    phdr.p_vaddr as *mut u8,
                    phdr.p_filesz as usize,
                );
            }
        }

        image_end = image_end.max(start.as_u32() + page_count * PAGE_SIZE as u32);
    }

    Ok(Loaded {
        entry: ehdr.e_entry,
        image_end,
    })
}

fn alloc_zeroed_frame() -> KernelResult<PhysAddr> {
    let frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
    // SAFETY: the frame was just allocated and is not yet mapped anywhere,
    // so the kernel-half identity window is the only path to it.
    unsafe { core::ptr::write_bytes(paging::phys_to_kernel_virt(frame), 0, PAGE_SIZE) };
    Ok(frame)
}

/// Checks for a `#!` shebang line and returns the interpreter path plus at
/// most one inline argument, if present.
pub fn shebang(image: &[u8]) -> Option<(alloc::string::String, Option<alloc::string::String>)> {
    if !image.starts_with(b"#!") {
        return None;
    }
    let line_end = image.iter().position(|&b| b == b'\n').unwrap_or(image.len());
    let line = core::str::from_utf8(&image[2..line_end]).ok()?.trim();
    let mut parts = line.splitn(2, ' ');
    let interp = parts.next()?.to_string();
    let arg = parts.next().map(|s| s.trim().to_string());
    Some((interp, arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_magic() {
        let bytes = [0u8; 64];
        assert_eq!(read_ehdr(&bytes).unwrap_err(), KernelError::ExecFormat);
    }

    #[test]
    fn shebang_splits_interpreter_and_one_arg() {
        let image = b"#!/bin/sh -x\necho hi\n";
        let (interp, arg) = shebang(image).unwrap();
        assert_eq!(interp, "/bin/sh");
        assert_eq!(arg.as_deref(), Some("-x"));
    }

    #[test]
    fn no_shebang_returns_none() {
        assert!(shebang(&[0x7f, b'E', b'L', b'F']).is_none());
    }
}
