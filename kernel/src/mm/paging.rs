//! Paging: map/unmap, recursive page-directory mapping, address-space
//! clone/teardown.
//!
//! Every page directory's last entry (index [`RECURSIVE_PD_INDEX`]) points
//! at itself, so the *currently loaded* PD and its page tables are always
//! reachable at the fixed virtual addresses [`pd_ptr`]/[`pt_ptr`] compute.
//! Operating on a PD that is not currently loaded goes through
//! [`with_address_space`], which loads its CR3 for the duration of a
//! closure and restores the previous one on the way out -- the `defer`-
//! style composite guard the design notes (§9) call for.

use core::arch::asm;

use spin::Once;

use super::{pmm, PhysAddr, VirtAddr};
use crate::arch::x86::without_interrupts;
use crate::config::{KERNEL_VIRT_BASE, PAGE_SIZE, RECURSIVE_BASE, RECURSIVE_PD_INDEX};
use crate::error::{KernelError, KernelResult};

bitflags::bitflags! {
    /// Page table entry permission bits. `PRESENT` is implied by every
    /// `map` call and need not be passed explicitly.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
    }
}

const PTE_PRESENT: u32 = 1 << 0;
const PTE_WRITABLE: u32 = 1 << 1;
const PTE_USER: u32 = 1 << 2;
const PTE_ADDR_MASK: u32 = !0xFFF;

#[derive(Clone, Copy)]
#[repr(transparent)]
struct Pte(u32);

impl Pte {
    const fn empty() -> Self {
        Self(0)
    }
    fn present(self) -> bool {
        self.0 & PTE_PRESENT != 0
    }
    fn addr(self) -> u32 {
        self.0 & PTE_ADDR_MASK
    }
    fn new(addr: u32, flags: PageFlags) -> Self {
        Self((addr & PTE_ADDR_MASK) | PTE_PRESENT | flags.bits())
    }
}

type Table = [Pte; 1024];

/// Index of the PD entry at which the kernel half begins
/// (`KERNEL_VIRT_BASE >> 22`).
const KERNEL_PD_START: usize = (KERNEL_VIRT_BASE >> 22) as usize;

static CANONICAL_KERNEL_PD: Once<PhysAddr> = Once::new();

fn pd_ptr() -> *mut Table {
    (RECURSIVE_BASE + (RECURSIVE_PD_INDEX as u32) * PAGE_SIZE as u32) as *mut Table
}

fn pt_ptr(pd_index: usize) -> *mut Table {
    (RECURSIVE_BASE + (pd_index as u32) * PAGE_SIZE as u32) as *mut Table
}

/// Physical memory is identity-offset mapped across the kernel/user split
///, so any physical frame's contents are reachable this way
/// regardless of which address space is currently loaded -- used for
/// zeroing freshly allocated page-table frames and copying frame contents
/// during `clone_process_directory`, neither of which needs the recursive
/// trick since they don't walk PDE/PTE structures of a foreign PD.
pub unsafe fn phys_to_kernel_virt(phys: PhysAddr) -> *mut u8 {
    (phys.as_u32().wrapping_add(KERNEL_VIRT_BASE)) as *mut u8
}

fn current_cr3() -> PhysAddr {
    let value: u32;
    // SAFETY: reading CR3 has no side effects.
    unsafe { asm!("mov {0}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) };
    PhysAddr::new(value)
}

/// # Safety
/// `cr3` must be the physical address of a fully-formed page directory
/// (kernel half aliased, recursive entry installed) -- loading a partial or
/// garbage PD will fault on the very next memory access.
unsafe fn load_cr3(cr3: PhysAddr) {
    asm!("mov cr3, {0}", in(reg) cr3.as_u32(), options(nostack, preserves_flags));
}

fn invlpg(vaddr: u32) {
    // SAFETY: `invlpg` only affects the TLB entry for `vaddr`; always safe.
    unsafe { asm!("invlpg [{0}]", in(reg) vaddr, options(nostack, preserves_flags)) };
}

/// RAII guard that loads `cr3` on construction and restores the previous
/// CR3 on drop -- the `with_address_space` helper the design notes (§9)
/// call for. Foreign-PD pointers obtained while a guard of a *different*
/// address space is live must be treated as opaque (design note: "pointer
/// provenance across the switch").
pub struct AddressSpaceGuard {
    previous: PhysAddr,
}

impl Drop for AddressSpaceGuard {
    fn drop(&mut self) {
        // SAFETY: `previous` was a live, fully-formed PD (it was the loaded
        // CR3 before this guard's construction).
        unsafe { load_cr3(self.previous) };
    }
}

/// Runs `f` with `cr3` loaded as the current address space, restoring the
/// caller's previous CR3 afterwards. Interrupts are masked for the duration
/// since a preemption mid-switch would run scheduler code against the
/// wrong address space.
pub fn with_address_space<R>(cr3: PhysAddr, f: impl FnOnce() -> R) -> R {
    without_interrupts(|| {
        let previous = current_cr3();
        if previous != cr3 {
            // SAFETY: `cr3` is expected to already be a fully-formed PD
            // (every live process's cr3 satisfies this invariant).
            unsafe { load_cr3(cr3) };
        }
        let _guard = AddressSpaceGuard { previous };
        f()
    })
}

/// Installs a present PTE for `vaddr` -> `paddr` in the *currently loaded*
/// address space, allocating a page table on demand.
pub fn map(vaddr: VirtAddr, paddr: PhysAddr, flags: PageFlags) -> KernelResult<()> {
    without_interrupts(|| {
        let pdi = vaddr.pd_index();
        let pti = vaddr.pt_index();

        // SAFETY: `pd_ptr()` is always mapped (recursive entry).
        let pd = unsafe { &mut *pd_ptr() };
        if !pd[pdi].present() {
            let frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
            pd[pdi] = Pte::new(frame.as_u32(), PageFlags::WRITABLE | PageFlags::USER);
            invlpg(pt_ptr(pdi) as u32);
            // SAFETY: the PDE above was just installed, so `pt_ptr(pdi)`
            // now resolves (via the recursive entry) to the fresh frame.
            let pt = unsafe { &mut *pt_ptr(pdi) };
            for entry in pt.iter_mut() {
                *entry = Pte::empty();
            }
        }

        // SAFETY: the PDE for `pdi` is present (installed above or
        // pre-existing), so `pt_ptr(pdi)` resolves to a live page table.
        let pt = unsafe { &mut *pt_ptr(pdi) };
        if pt[pti].present() {
            return Err(KernelError::Exists);
        }
        pt[pti] = Pte::new(paddr.as_u32(), flags);
        invlpg(vaddr.as_u32());
        Ok(())
    })
}

/// Clears the PTE for `vaddr` in the current address space. Does not free
/// the underlying physical frame -- callers that own it call `pmm::free`
/// themselves, since not every unmap implies ownership of the frame (shared
/// kernel-half mappings, for instance).
pub fn unmap(vaddr: VirtAddr) -> KernelResult<()> {
    without_interrupts(|| {
        let pdi = vaddr.pd_index();
        let pti = vaddr.pt_index();
        // SAFETY: recursive entry guarantees `pd_ptr()` is mapped.
        let pd = unsafe { &*pd_ptr() };
        if !pd[pdi].present() {
            return Err(KernelError::InvalidArgument);
        }
        // SAFETY: PDE checked present above.
        let pt = unsafe { &mut *pt_ptr(pdi) };
        if !pt[pti].present() {
            return Err(KernelError::InvalidArgument);
        }
        pt[pti] = Pte::empty();
        invlpg(vaddr.as_u32());
        Ok(())
    })
}

/// Looks up the physical address `vaddr` currently maps to, if any.
pub fn get_paddr(vaddr: VirtAddr) -> Option<PhysAddr> {
    without_interrupts(|| {
        let pdi = vaddr.pd_index();
        let pti = vaddr.pt_index();
        // SAFETY: recursive entry guarantees `pd_ptr()` is mapped.
        let pd = unsafe { &*pd_ptr() };
        if !pd[pdi].present() {
            return None;
        }
        // SAFETY: PDE checked present above.
        let pt = unsafe { &*pt_ptr(pdi) };
        if !pt[pti].present() {
            return None;
        }
        Some(PhysAddr::new(pt[pti].addr() | vaddr.as_u32() & 0xFFF))
    })
}

fn is_mapped(vaddr: VirtAddr) -> bool {
    get_paddr(vaddr).is_some()
}

/// Lowest virtual run of `n` contiguous unmapped pages at or above `base`.
pub fn next_vaddr(n: usize, base: VirtAddr) -> Option<VirtAddr> {
    if n == 0 {
        return None;
    }
    let mut candidate = base.align_down();
    let limit = VirtAddr::new(u32::MAX - (n as u32) * PAGE_SIZE as u32);
    while candidate <= limit {
        let mut run_ok = true;
        for i in 0..n {
            if is_mapped(candidate + (i as u32 * PAGE_SIZE as u32)) {
                run_ok = false;
                candidate = candidate + (i as u32 + 1) * PAGE_SIZE as u32;
                break;
            }
        }
        if run_ok {
            return Some(candidate);
        }
    }
    None
}

/// Highest virtual run of `n` contiguous unmapped pages at or below `top`.
pub fn prev_vaddr(n: usize, top: VirtAddr) -> Option<VirtAddr> {
    if n == 0 {
        return None;
    }
    let mut candidate = top.align_down() - (n as u32 - 1) * PAGE_SIZE as u32;
    loop {
        if candidate.as_u32() < PAGE_SIZE as u32 {
            return None;
        }
        let mut run_ok = true;
        for i in 0..n {
            if is_mapped(candidate + (i as u32 * PAGE_SIZE as u32)) {
                run_ok = false;
                break;
            }
        }
        if run_ok {
            return Some(candidate);
        }
        candidate = candidate - PAGE_SIZE as u32;
    }
}

/// Ensures a present PDE (and its backing, zeroed page table) exists for
/// `pdi` in the *canonical* kernel PD. Used to carve out fixed kernel-half
/// regions (the kernel stack pool) whose page table frame, once created, is
/// shared by every process PD that clones its kernel half afterward --
/// individual PTE installs into it later need not be re-propagated.
fn ensure_canonical_pde(pdi: usize) -> KernelResult<()> {
    without_interrupts(|| {
        let canonical = *CANONICAL_KERNEL_PD.get().expect("paging not initialized");
        with_address_space(canonical, || {
            // SAFETY: recursive entry guarantees `pd_ptr()` resolves to `canonical`.
            let pd = unsafe { &mut *pd_ptr() };
            if pd[pdi].present() {
                return Ok(());
            }
            let frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
            pd[pdi] = Pte::new(frame.as_u32(), PageFlags::WRITABLE);
            invlpg(pt_ptr(pdi) as u32);
            // SAFETY: PDE just installed above.
            let pt = unsafe { &mut *pt_ptr(pdi) };
            for entry in pt.iter_mut() {
                *entry = Pte::empty();
            }
            Ok(())
        })
    })
}

/// Reserves `n_pages` worth of PDEs starting at `base` in the canonical
/// kernel PD, without mapping any PTEs. Call before any process address
/// space is cloned from canonical so the reservation is visible everywhere.
pub fn reserve_kernel_region(base: VirtAddr, n_pages: usize) -> KernelResult<()> {
    if n_pages == 0 {
        return Ok(());
    }
    let first_pdi = base.pd_index();
    let last_pdi = (base + ((n_pages - 1) as u32) * PAGE_SIZE as u32).pd_index();
    for pdi in first_pdi..=last_pdi {
        ensure_canonical_pde(pdi)?;
    }
    Ok(())
}

/// Refreshes `dst_cr3`'s kernel-half PDEs (indices [`KERNEL_PD_START`]..
/// [`RECURSIVE_PD_INDEX`]) from the canonical kernel PD, and re-points its
/// own recursive entry at itself. Called whenever the canonical kernel PD
/// changes (it never does post-boot, but the hook exists so a future
/// kernel-half mapping change has somewhere to propagate to, per invariant
/// P2) and once right after a PD is freshly allocated.
pub fn copy_kernel_space(dst_cr3: PhysAddr) {
    let canonical = *CANONICAL_KERNEL_PD.get().expect("paging not initialized");
    with_address_space(dst_cr3, || {
        // SAFETY: canonical's contents are reachable via the kernel-half
        // identity offset regardless of the currently loaded PD.
        let canonical_pd = unsafe { &*(phys_to_kernel_virt(canonical) as *const Table) };
        // SAFETY: recursive entry guarantees `pd_ptr()` resolves to `dst_cr3`.
        let dst_pd = unsafe { &mut *pd_ptr() };
        for i in KERNEL_PD_START..RECURSIVE_PD_INDEX {
            dst_pd[i] = canonical_pd[i];
        }
        dst_pd[RECURSIVE_PD_INDEX] = Pte::new(dst_cr3.as_u32(), PageFlags::WRITABLE);
    });
}

/// Produces a fresh PD whose kernel half aliases the canonical kernel PD and
/// whose user half is entirely empty. Used for the very first process,
/// which has no parent address space to clone from.
pub fn new_address_space() -> KernelResult<PhysAddr> {
    let new_pd_frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
    // SAFETY: freshly allocated, not yet referenced by any live PDE.
    unsafe { core::ptr::write_bytes(phys_to_kernel_virt(new_pd_frame), 0, PAGE_SIZE) };
    copy_kernel_space(new_pd_frame);
    Ok(new_pd_frame)
}

/// Produces a fresh PD whose kernel half aliases the canonical kernel PD
/// and whose user half is a page-for-page copy of `src_cr3`'s user half
/// (copy-of-mapping semantics, not copy-on-write).
pub fn clone_process_directory(src_cr3: PhysAddr) -> KernelResult<PhysAddr> {
    let new_pd_frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
    // SAFETY: `new_pd_frame` was just allocated and is not yet referenced
    // by any live PDE, so zeroing it through the kernel-half identity
    // window cannot race with anything.
    unsafe { core::ptr::write_bytes(phys_to_kernel_virt(new_pd_frame), 0, PAGE_SIZE) };
    copy_kernel_space(new_pd_frame);

    let result = (|| -> KernelResult<()> {
        for pdi in 0..KERNEL_PD_START {
            let src_pte = with_address_space(src_cr3, || {
                // SAFETY: recursive entry guarantees `pd_ptr()` resolves to `src_cr3`.
                unsafe { (*pd_ptr())[pdi] }
            });
            if !src_pte.present() {
                continue;
            }
            for pti in 0..1024 {
                let src_pte_leaf = with_address_space(src_cr3, || {
                    // SAFETY: the PDE was checked present above, under the
                    // same address space.
                    unsafe { (*pt_ptr(pdi))[pti] }
                });
                if !src_pte_leaf.present() {
                    continue;
                }
                let vaddr = VirtAddr::new((pdi as u32) * 0x0040_0000 + (pti as u32) * PAGE_SIZE as u32);
                let dst_frame = pmm::alloc(1).ok_or(KernelError::NoMemory)?;
                // SAFETY: both frames are reachable via the kernel-half
                // identity window irrespective of the loaded PD; `dst_frame`
                // is freshly allocated and not yet visible to anyone else.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        phys_to_kernel_virt(PhysAddr::new(src_pte_leaf.addr())),
                        phys_to_kernel_virt(dst_frame),
                        PAGE_SIZE,
                    );
                }
                let flags = PageFlags::from_bits_truncate(src_pte_leaf.0 & (PTE_WRITABLE | PTE_USER));
                with_address_space(new_pd_frame, || map(vaddr, dst_frame, flags))?;
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        clear_user_space_of(new_pd_frame);
        pmm::free(new_pd_frame, 1);
        return Err(e);
    }

    Ok(new_pd_frame)
}

/// Unmaps and frees every user-half page of the current address space.
pub fn clear_user_space() {
    clear_user_space_of(current_cr3());
}

fn clear_user_space_of(cr3: PhysAddr) {
    with_address_space(cr3, || {
        for pdi in 0..KERNEL_PD_START {
            // SAFETY: recursive entry guarantees `pd_ptr()` resolves to `cr3`.
            let pd_entry = unsafe { (*pd_ptr())[pdi] };
            if !pd_entry.present() {
                continue;
            }
            for pti in 0..1024 {
                // SAFETY: PDE checked present above, same address space.
                let leaf = unsafe { (*pt_ptr(pdi))[pti] };
                if leaf.present() {
                    pmm::free(PhysAddr::new(leaf.addr()), 1);
                }
            }
            pmm::free(PhysAddr::new(pd_entry.addr()), 1);
            // SAFETY: recursive entry guarantees `pd_ptr()` resolves to `cr3`.
            unsafe { (*pd_ptr())[pdi] = Pte::empty() };
            invlpg(pt_ptr(pdi) as u32);
        }
    });
}

/// Builds the canonical kernel PD: identity-offset maps the first
/// `identity_pages` physical pages into the kernel half starting at
/// `KERNEL_VIRT_BASE`, installs the recursive entry, loads it as CR3, and
/// enables paging. Called once from `mm::init`, before any process exists.
pub fn init() {
    let pd_frame = pmm::alloc(1).expect("paging::init: no memory for canonical kernel PD");
    // SAFETY: paging is not yet enabled, so `pd_frame`'s physical address
    // is directly addressable (identity mapping is implicit with CR0.PG=0).
    unsafe { core::ptr::write_bytes(pd_frame.as_u32() as *mut u8, 0, PAGE_SIZE) };

    let identity_pages = (super::pmm::total_pages() as u32).min(1 << 18); // cap at 1 GiB worth
    let mut mapped = 0u32;
    while mapped < identity_pages {
        let pdi = KERNEL_PD_START + (mapped as usize / 1024);
        if pdi >= RECURSIVE_PD_INDEX {
            break;
        }
        let pt_frame = pmm::alloc(1).expect("paging::init: no memory for identity page table");
        // SAFETY: paging disabled, direct physical access.
        unsafe { core::ptr::write_bytes(pt_frame.as_u32() as *mut u8, 0, PAGE_SIZE) };
        // SAFETY: paging disabled, direct physical access to both tables.
        unsafe {
            let pd = &mut *(pd_frame.as_u32() as *mut Table);
            pd[pdi] = Pte::new(pt_frame.as_u32(), PageFlags::WRITABLE);
            let pt = &mut *(pt_frame.as_u32() as *mut Table);
            for i in 0..1024 {
                if mapped >= identity_pages {
                    break;
                }
                pt[i] = Pte::new(mapped * PAGE_SIZE as u32, PageFlags::WRITABLE);
                mapped += 1;
            }
        }
    }

    // SAFETY: paging disabled, direct physical access.
    unsafe {
        let pd = &mut *(pd_frame.as_u32() as *mut Table);
        pd[RECURSIVE_PD_INDEX] = Pte::new(pd_frame.as_u32(), PageFlags::WRITABLE);
    }

    CANONICAL_KERNEL_PD.call_once(|| pd_frame);

    // SAFETY: `pd_frame` is a fully-formed PD (kernel half identity-mapped,
    // recursive entry installed).
    unsafe {
        load_cr3(pd_frame);
        enable_paging();
    }

    log::info!(target: "paging", "canonical kernel PD at {:#x}, {} identity pages", pd_frame.as_u32(), mapped);
}

/// # Safety
/// CR3 must already hold a fully-formed page directory.
unsafe fn enable_paging() {
    // SAFETY: sets CR0.PG; CR3 was loaded by the caller just before this.
    asm!(
        "mov {tmp}, cr0",
        "or {tmp}, 0x80000000",
        "mov cr0, {tmp}",
        tmp = out(reg) _,
        options(nostack, preserves_flags),
    );
}

/// Physical address of the canonical kernel PD, used when constructing a
/// brand-new process before it has a PD of its own (process 0 bootstrap).
pub fn canonical_kernel_pd() -> PhysAddr {
    *CANONICAL_KERNEL_PD.get().expect("paging not initialized")
}

/// Unconditionally loads `cr3`, with no restore-on-drop. Used by the
/// scheduler when switching to a task for longer than the scope of one
/// closure -- `with_address_space` would restore the wrong address space
/// the moment its guard dropped.
pub fn switch_to(cr3: PhysAddr) {
    without_interrupts(|| {
        if current_cr3() != cr3 {
            // SAFETY: `cr3` is the address space of a live task in the
            // table, always a fully-formed PD.
            unsafe { load_cr3(cr3) };
        }
    });
}
