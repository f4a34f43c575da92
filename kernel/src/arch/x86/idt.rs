//! 256-entry IDT and the single assembly trampoline that saves CPU state
//! and re-enters Rust.
//!
//! Vectors 0..31 are CPU exceptions, 32..47 are the PIC-remapped IRQs, and
//! 0x80 is the syscall gate; those 49 vectors get real gates built from
//! generated per-vector stubs below. Every other vector stays a not-present
//! gate -- nothing in this kernel ever raises them, so a stray interrupt
//! there is a bug worth a double fault, not worth 200-odd dead stub
//! functions. `crate::irq` owns the "one handler per vector" registry the
//! trampoline calls into.

use core::mem::size_of;

use spin::Mutex;

use super::gdt::KERNEL_CODE_SELECTOR;

const IDT_ENTRIES: usize = 256;
pub const SYSCALL_VECTOR: u8 = 0x80;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }
}

fn install(idt: &mut [IdtEntry; IDT_ENTRIES], vector: usize, handler: u32, dpl: u8) {
    idt[vector] = IdtEntry {
        offset_low: (handler & 0xFFFF) as u16,
        selector: KERNEL_CODE_SELECTOR,
        zero: 0,
        // present | dpl<<5 | 32-bit interrupt gate (0xE)
        type_attr: 0x80 | (dpl << 5) | 0x0E,
        offset_high: ((handler >> 16) & 0xFFFF) as u16,
    };
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static IDT: Mutex<[IdtEntry; IDT_ENTRIES]> = Mutex::new([IdtEntry::missing(); IDT_ENTRIES]);

/// The full saved CPU state handed to `forward_interrupt`: general-purpose
/// registers from `pusha`, then the vector/error-code pair the stub pushes,
/// then the CPU's own `iret` frame (which gains `user_esp`/`user_ss` only on
/// a privilege-level change, from ring 3).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32, // pusha's esp snapshot; restored implicitly by popa
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

impl TrapFrame {
    pub fn from_user(&self) -> bool {
        (self.cs & 0x3) == 3
    }

    /// Converts to the register snapshot [`enter_usermode`](super::context::enter_usermode)
    /// expects. Used whenever a task's saved `uregs` needs to be handed back
    /// to user mode through something other than this file's own `iretd`
    /// trampoline -- a freshly prepared kernel stack (fork, exec) or a
    /// signal handler dispatch.
    pub fn to_context_regs(&self) -> super::context::Registers32 {
        super::context::Registers32 {
            eax: self.eax,
            ebx: self.ebx,
            ecx: self.ecx,
            edx: self.edx,
            ebp: self.ebp,
            esi: self.esi,
            edi: self.edi,
            ss: self.user_ss,
            esp: self.user_esp,
            eflags: self.eflags,
            cs: self.cs,
            eip: self.eip,
        }
    }
}

macro_rules! isr_stub {
    ($name:ident, $vector:literal, false) => {
        #[naked]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {trampoline}",
                vector = const $vector,
                trampoline = sym common_trampoline,
            );
        }
    };
    ($name:ident, $vector:literal, true) => {
        #[naked]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "push {vector}",
                "jmp {trampoline}",
                vector = const $vector,
                trampoline = sym common_trampoline,
            );
        }
    };
}

/// Common trampoline every stub jumps to: saves GP registers with `pusha`,
/// calls `forward_interrupt` with a pointer to the resulting `TrapFrame`,
/// then restores and `iret`s. IRQ end-of-interrupt is sent from inside
/// `forward_interrupt` itself, since only it knows the vector.
#[naked]
unsafe extern "C" fn common_trampoline() {
    core::arch::naked_asm!(
        "pusha",
        "push esp",
        "call {forward}",
        "add esp, 4",
        "popa",
        "add esp, 8", // pop vector + error_code
        "iretd",
        forward = sym forward_interrupt_trampoline,
    );
}

extern "C" fn forward_interrupt_trampoline(frame: *mut TrapFrame) {
    // SAFETY: `frame` points at the stub's pushed state on the still-live
    // interrupt stack, valid for the duration of this call.
    let frame = unsafe { &mut *frame };
    crate::irq::forward_interrupt(frame);
}

isr_stub!(isr_0, 0, false);
isr_stub!(isr_1, 1, false);
isr_stub!(isr_2, 2, false);
isr_stub!(isr_3, 3, false);
isr_stub!(isr_4, 4, false);
isr_stub!(isr_5, 5, false);
isr_stub!(isr_6, 6, false);
isr_stub!(isr_7, 7, false);
isr_stub!(isr_8, 8, true);
isr_stub!(isr_9, 9, false);
isr_stub!(isr_10, 10, true);
isr_stub!(isr_11, 11, true);
isr_stub!(isr_12, 12, true);
isr_stub!(isr_13, 13, true);
isr_stub!(isr_14, 14, true);
isr_stub!(isr_15, 15, false);
isr_stub!(isr_16, 16, false);
isr_stub!(isr_17, 17, true);
isr_stub!(isr_18, 18, false);
isr_stub!(isr_19, 19, false);
isr_stub!(isr_20, 20, false);
isr_stub!(isr_21, 21, true);
isr_stub!(isr_22, 22, false);
isr_stub!(isr_23, 23, false);
isr_stub!(isr_24, 24, false);
isr_stub!(isr_25, 25, false);
isr_stub!(isr_26, 26, false);
isr_stub!(isr_27, 27, false);
isr_stub!(isr_28, 28, false);
isr_stub!(isr_29, 29, true);
isr_stub!(isr_30, 30, true);
isr_stub!(isr_31, 31, false);
isr_stub!(isr_32, 32, false);
isr_stub!(isr_33, 33, false);
isr_stub!(isr_34, 34, false);
isr_stub!(isr_35, 35, false);
isr_stub!(isr_36, 36, false);
isr_stub!(isr_37, 37, false);
isr_stub!(isr_38, 38, false);
isr_stub!(isr_39, 39, false);
isr_stub!(isr_40, 40, false);
isr_stub!(isr_41, 41, false);
isr_stub!(isr_42, 42, false);
isr_stub!(isr_43, 43, false);
isr_stub!(isr_44, 44, false);
isr_stub!(isr_45, 45, false);
isr_stub!(isr_46, 46, false);
isr_stub!(isr_47, 47, false);
isr_stub!(isr_128, 128, false);

/// Builds the IDT from the generated stubs and loads `IDTR`.
pub fn init() {
    let mut idt = IDT.lock();
    install(&mut idt, 0, isr_0 as u32, 0);
    install(&mut idt, 1, isr_1 as u32, 0);
    install(&mut idt, 2, isr_2 as u32, 0);
    install(&mut idt, 3, isr_3 as u32, 0);
    install(&mut idt, 4, isr_4 as u32, 0);
    install(&mut idt, 5, isr_5 as u32, 0);
    install(&mut idt, 6, isr_6 as u32, 0);
    install(&mut idt, 7, isr_7 as u32, 0);
    install(&mut idt, 8, isr_8 as u32, 0);
    install(&mut idt, 9, isr_9 as u32, 0);
    install(&mut idt, 10, isr_10 as u32, 0);
    install(&mut idt, 11, isr_11 as u32, 0);
    install(&mut idt, 12, isr_12 as u32, 0);
    install(&mut idt, 13, isr_13 as u32, 0);
    install(&mut idt, 14, isr_14 as u32, 0);
    install(&mut idt, 15, isr_15 as u32, 0);
    install(&mut idt, 16, isr_16 as u32, 0);
    install(&mut idt, 17, isr_17 as u32, 0);
    install(&mut idt, 18, isr_18 as u32, 0);
    install(&mut idt, 19, isr_19 as u32, 0);
    install(&mut idt, 20, isr_20 as u32, 0);
    install(&mut idt, 21, isr_21 as u32, 0);
    install(&mut idt, 22, isr_22 as u32, 0);
    install(&mut idt, 23, isr_23 as u32, 0);
    install(&mut idt, 24, isr_24 as u32, 0);
    install(&mut idt, 25, isr_25 as u32, 0);
    install(&mut idt, 26, isr_26 as u32, 0);
    install(&mut idt, 27, isr_27 as u32, 0);
    install(&mut idt, 28, isr_28 as u32, 0);
    install(&mut idt, 29, isr_29 as u32, 0);
    install(&mut idt, 30, isr_30 as u32, 0);
    install(&mut idt, 31, isr_31 as u32, 0);
    install(&mut idt, 32, isr_32 as u32, 0);
    install(&mut idt, 33, isr_33 as u32, 0);
    install(&mut idt, 34, isr_34 as u32, 0);
    install(&mut idt, 35, isr_35 as u32, 0);
    install(&mut idt, 36, isr_36 as u32, 0);
    install(&mut idt, 37, isr_37 as u32, 0);
    install(&mut idt, 38, isr_38 as u32, 0);
    install(&mut idt, 39, isr_39 as u32, 0);
    install(&mut idt, 40, isr_40 as u32, 0);
    install(&mut idt, 41, isr_41 as u32, 0);
    install(&mut idt, 42, isr_42 as u32, 0);
    install(&mut idt, 43, isr_43 as u32, 0);
    install(&mut idt, 44, isr_44 as u32, 0);
    install(&mut idt, 45, isr_45 as u32, 0);
    install(&mut idt, 46, isr_46 as u32, 0);
    install(&mut idt, 47, isr_47 as u32, 0);
    install(&mut idt, 128, isr_128 as u32, 3);

    let ptr = IdtPointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };

    // SAFETY: `ptr` references `idt`, a `'static` table behind this
    // function's held lock guard, which outlives the `lidt` call.
    unsafe {
        core::arch::asm!("lidt [{0}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
    }
}
