//! Fixed-slot kernel stack pool.
//!
//! Stacks live in a dedicated region of the kernel half, reserved up front
//! (before any process address space is cloned from canonical) via
//! [`paging::reserve_kernel_region`] so every process PD shares the same
//! backing page tables for it: once a slot's page table frame exists in the
//! canonical PD, installing or removing a PTE within it from whichever PD
//! happens to be loaded is visible from every PD that copied that PDE,
//! without any further propagation step.
//!
//! Each slot reserves [`KERNEL_STACK_GUARD_PAGES`] below the stack as an
//! intentionally unmapped guard; a kernel stack overflow page-faults instead
//! of silently corrupting the neighboring slot.

use spin::Mutex;

use crate::config::{
    KERNEL_STACK_GUARD_PAGES, KERNEL_STACK_PAGES, KSTACK_REGION_BASE, MAX_PROCESS_COUNT, PAGE_SIZE,
};
use crate::error::{KernelError, KernelResult};
use crate::mm::paging::{self, PageFlags};
use crate::mm::pmm;
use crate::mm::VirtAddr;

const SLOT_PAGES: usize = KERNEL_STACK_PAGES + KERNEL_STACK_GUARD_PAGES;
const SLOT_BYTES: u32 = (SLOT_PAGES * PAGE_SIZE) as u32;

static FREE_SLOTS: Mutex<[bool; MAX_PROCESS_COUNT]> = Mutex::new([true; MAX_PROCESS_COUNT]);

/// Reserves the whole kernel-stack pool's PDEs in the canonical kernel PD.
/// Must run before the first process address space is created.
pub fn init() -> KernelResult<()> {
    let total_pages = MAX_PROCESS_COUNT * SLOT_PAGES;
    paging::reserve_kernel_region(VirtAddr::new(KSTACK_REGION_BASE), total_pages)?;
    log::info!(
        target: "process",
        "kernel stack pool: {} slots x {} pages at {:#x}",
        MAX_PROCESS_COUNT, KERNEL_STACK_PAGES, KSTACK_REGION_BASE
    );
    Ok(())
}

fn slot_base(index: usize) -> u32 {
    KSTACK_REGION_BASE + (index as u32) * SLOT_BYTES
}

/// Allocates a free slot, maps its `KERNEL_STACK_PAGES` pages (leaving the
/// guard page below unmapped), and returns `(stack bottom, stack top)`.
/// `stack top` is the initial `esp` a fresh task's context should use;
/// `stack bottom` is what the PCB should remember so [`index_of`] can
/// recover the slot to free later.
pub fn alloc() -> KernelResult<(u32, u32)> {
    let index = {
        let mut slots = FREE_SLOTS.lock();
        let index = slots.iter().position(|free| *free).ok_or(KernelError::ProcessLimit)?;
        slots[index] = false;
        index
    };

    let base = slot_base(index) + (KERNEL_STACK_GUARD_PAGES * PAGE_SIZE) as u32;
    let result = (|| -> KernelResult<()> {
        for i in 0..KERNEL_STACK_PAGES {
            let vaddr = VirtAddr::new(base + (i as u32) * PAGE_SIZE as u32);
            let frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
            if let Err(e) = paging::map(vaddr, frame, PageFlags::WRITABLE) {
                pmm::free(frame, 1);
                return Err(e);
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        free_index(index);
        return Err(e);
    }

    Ok((base, base + (KERNEL_STACK_PAGES * PAGE_SIZE) as u32))
}

/// Recovers a slot index from its mapped stack bottom (the first value
/// [`alloc`] returns), so a PCB needs to remember only the address, not a
/// separate index.
fn index_of(mapped_base: u32) -> usize {
    let guard_bytes = (KERNEL_STACK_GUARD_PAGES * PAGE_SIZE) as u32;
    ((mapped_base - guard_bytes - KSTACK_REGION_BASE) / SLOT_BYTES) as usize
}

fn free_index(index: usize) {
    let base = slot_base(index) + (KERNEL_STACK_GUARD_PAGES * PAGE_SIZE) as u32;
    for i in 0..KERNEL_STACK_PAGES {
        let vaddr = VirtAddr::new(base + (i as u32) * PAGE_SIZE as u32);
        if let Some(frame) = paging::get_paddr(vaddr) {
            let _ = paging::unmap(vaddr);
            pmm::free(frame, 1);
        }
    }
    FREE_SLOTS.lock()[index] = true;
}

/// Unmaps and frees the stack whose bottom is `mapped_base` (as returned by
/// [`alloc`]), returning its slot to the free list.
pub fn free(mapped_base: u32) {
    free_index(index_of(mapped_base));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_base_is_stride_aligned() {
        assert_eq!(slot_base(0), KSTACK_REGION_BASE);
        assert_eq!(slot_base(1), KSTACK_REGION_BASE + SLOT_BYTES);
    }
}
