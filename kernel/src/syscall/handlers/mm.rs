//! Address-space syscalls: `pagealloc`, `pagefree`.
//!
//! Mirrors the reference userland's "bump allocator with no bookkeeping"
//! design: `pagealloc` always scans for the lowest free run at or above the
//! caller's heap break rather than tracking a watermark, so a freed range
//! can be reused by the very next call.

use crate::error::{KernelError, KernelResult};
use crate::mm::paging::{self, PageFlags};
use crate::mm::pmm;
use crate::mm::VirtAddr;
use crate::process::pcb::Pid;
use crate::process::table;

pub fn pagealloc(current: Pid, npages: u32) -> KernelResult<i32> {
    if npages == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    let heap_end = pcb.mem.lock().heap_end;
    let base = paging::next_vaddr(npages as usize, VirtAddr::new(heap_end)).ok_or(KernelError::NoMemory)?;

    let mut mapped = 0usize;
    for i in 0..npages as usize {
        let vaddr = VirtAddr::new(base.as_u32() + (i * crate::config::PAGE_SIZE) as u32);
        let frame = match pmm::alloc(1) {
            Some(f) => f,
            None => break,
        };
        if paging::map(vaddr, frame, PageFlags::WRITABLE | PageFlags::USER).is_err() {
            pmm::free(frame, 1);
            break;
        }
        mapped += 1;
    }

    if mapped < npages as usize {
        for i in 0..mapped {
            let vaddr = VirtAddr::new(base.as_u32() + (i * crate::config::PAGE_SIZE) as u32);
            if let Some(frame) = paging::get_paddr(vaddr) {
                pmm::free(frame, 1);
            }
            let _ = paging::unmap(vaddr);
        }
        return Err(KernelError::NoMemory);
    }

    Ok(base.as_u32() as i32)
}

pub fn pagefree(vaddr: u32, npages: u32) -> KernelResult<i32> {
    for i in 0..npages as usize {
        let va = VirtAddr::new(vaddr + (i * crate::config::PAGE_SIZE) as u32);
        if let Some(frame) = paging::get_paddr(va) {
            pmm::free(frame, 1);
        }
        paging::unmap(va)?;
    }
    Ok(0)
}
