//! 32-bit x86 architecture glue: GDT, IDT, TSS, PIC, PIT, RTC, register context.
//!
//! Everything here targets protected mode on a single CPU. SMP/APIC/x86-64
//! are explicit non-goals; there is exactly one GDT, one IDT, one
//! TSS, one 8259 PIC pair.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod rtc;
pub mod tss;

/// Runs `f` with interrupts disabled, restoring the prior flag on return.
///
/// Used by the heap,
/// PMM, paging, and scheduler critical sections.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = x86::bits32::eflags::read().contains(x86::bits32::eflags::EFlags::FLAGS_IF);
    // SAFETY: `cli`/`sti` bracket a short critical section; nesting is
    // avoided by checking the saved flag rather than unconditionally
    // re-enabling interrupts on exit.
    unsafe { x86::irq::disable() };
    let ret = f();
    if was_enabled {
        // SAFETY: we observed interrupts were enabled on entry; restoring
        // that state here cannot widen a caller's own masked region because
        // we never re-enable beyond what was already true before `f` ran.
        unsafe { x86::irq::enable() };
    }
    ret
}

/// Full kernel-half init order for arch glue, called once from `bootstrap::kmain`.
pub fn init() {
    gdt::init();
    idt::init();
    pic::init();
    pit::init();
    rtc::init();
}
