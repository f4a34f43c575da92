//! 6-entry flat GDT: null, kernel CS, kernel DS, user CS, user DS, TSS.
//!
//! Hand-rolled rather than built from the `x86` crate's generic descriptor
//! helpers, since the exact entry count and ordering are fixed.
//! Port I/O-adjacent primitives (`lgdt`, segment register reloads) come from
//! the `x86` crate.

use core::mem::size_of;

use spin::Mutex;

use super::tss::Tss;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3; // RPL 3
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3; // RPL 3
pub const TSS_SELECTOR: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8, granularity: u8) -> Self {
        // Flat 4 GiB segment: base 0, limit 0xFFFFF with 4 KiB granularity.
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: 0xC0 | granularity,
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, ring0, 32-bit TSS (available)
            granularity: ((limit >> 16) & 0x0F) as u8,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

struct GdtTable {
    entries: [GdtEntry; GDT_ENTRIES],
}

static GDT: Mutex<GdtTable> = Mutex::new(GdtTable {
    entries: [GdtEntry::null(); GDT_ENTRIES],
});

static TSS: Mutex<Tss> = Mutex::new(Tss::new());

/// Builds the GDT and TSS, loads `GDTR`, reloads segment registers, and
/// loads the task register. Called once during early boot.
pub fn init() {
    {
        let mut tss = TSS.lock();
        tss.ss0 = KERNEL_DATA_SELECTOR as u32;
        // esp0 is set per-task on every context switch (see `set_kernel_stack`).
    }

    let tss_addr = {
        let tss = TSS.lock();
        &*tss as *const Tss as u32
    };

    {
        let mut gdt = GDT.lock();
        gdt.entries[0] = GdtEntry::null();
        gdt.entries[1] = GdtEntry::flat(0x9A, 0x0F); // kernel code: present, ring0, exec/read
        gdt.entries[2] = GdtEntry::flat(0x92, 0x0F); // kernel data: present, ring0, read/write
        gdt.entries[3] = GdtEntry::flat(0xFA, 0x0F); // user code: present, ring3, exec/read
        gdt.entries[4] = GdtEntry::flat(0xF2, 0x0F); // user data: present, ring3, read/write
        gdt.entries[5] = GdtEntry::tss(tss_addr, size_of::<Tss>() as u32 - 1);

        let ptr = GdtPointer {
            limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: gdt.entries.as_ptr() as u32,
        };

        // SAFETY: `ptr` points at `gdt.entries`, which outlives this call
        // (it is a `'static` inside a `Mutex`); `lgdt` only reads it.
        unsafe {
            core::arch::asm!("lgdt [{0}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
            reload_segments();
        }
    }

    // SAFETY: the TSS descriptor at `TSS_SELECTOR` was just installed above.
    unsafe {
        core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
    }
}

/// Updates the ring-0 stack pointer used on the next privilege-level
/// transition (interrupt/syscall from user mode). Called by the scheduler
/// on every context switch.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

/// Reloads CS via a far jump and DS/ES/FS/GS/SS to the kernel flat segments.
///
/// # Safety
/// Must only be called once the GDT above has been loaded; clobbers all
/// data segment registers and performs a far jump, so it must not be called
/// from a context expecting fall-through without the jump target existing.
unsafe fn reload_segments() {
    core::arch::asm!(
        "push {cs}",
        "lea {tmp}, [1f]",
        "push {tmp}",
        "retf",
        "1:",
        "mov ax, {ds}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        cs = const KERNEL_CODE_SELECTOR as u32,
        ds = const KERNEL_DATA_SELECTOR,
        tmp = out(reg) _,
        options(nostack),
    );
}
