//! Vector-based interrupt registry and the dispatch `idt`'s trampoline calls
//! into.
//!
//! Exactly one handler may be registered per vector; a second
//! `register_handler` call for an already-occupied vector is rejected rather
//! than silently replacing the first.
//! Vectors 13 and 14 never go through the registry -- the CPU exceptions
//! that can be resolved into a process signal are special-cased directly in
//! [`forward_interrupt`], matching the source's page/GP fault handling.

use spin::Mutex;

use crate::arch::x86::idt::TrapFrame;
use crate::arch::x86::pic;
use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};

/// A registered handler receives the trap frame for IRQs it's responsible
/// for. It must return quickly -- defer work, don't do it inline.
pub type IrqHandler = fn(&TrapFrame);

const PIT_VECTOR: u8 = 32;
const KEYBOARD_VECTOR: u8 = 33;
const RTC_VECTOR: u8 = 40;
const MOUSE_VECTOR: u8 = 44;
const GP_FAULT_VECTOR: u32 = 13;
const PAGE_FAULT_VECTOR: u32 = 14;
const SYSCALL_VECTOR: u32 = crate::arch::x86::idt::SYSCALL_VECTOR as u32;

struct IrqRegistry {
    handlers: [Option<IrqHandler>; 256],
}

impl IrqRegistry {
    const fn new() -> Self {
        Self {
            handlers: [None; 256],
        }
    }
}

static REGISTRY: Mutex<IrqRegistry> = Mutex::new(IrqRegistry::new());

/// Registers `handler` for `vector`. Fails with [`KernelError::Exists`] if
/// the vector already has a handler.
pub fn register_handler(vector: u8, handler: IrqHandler) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    if registry.handlers[vector as usize].is_some() {
        return Err(KernelError::Exists);
    }
    registry.handlers[vector as usize] = Some(handler);
    Ok(())
}

/// Entry point the common assembly trampoline calls with the freshly built
/// `TrapFrame`. Runs with interrupts disabled (the CPU clears IF on
/// interrupt gate entry); syscall handling re-enables them once it has
/// copied `uregs` out of the frame.
pub fn forward_interrupt(frame: &mut TrapFrame) {
    match frame.vector {
        GP_FAULT_VECTOR => handle_gp_fault(frame),
        PAGE_FAULT_VECTOR => handle_page_fault(frame),
        SYSCALL_VECTOR => crate::syscall::dispatch(frame),
        vector @ 32..=47 => {
            let handler = REGISTRY.lock().handlers[vector as usize];
            if let Some(handler) = handler {
                handler(frame);
            }
            // SAFETY: vector is in the IRQ window and the handler (if any)
            // has already consumed whatever device state caused it.
            unsafe { pic::notify_end_of_interrupt(vector as u8) };
        }
        vector => handle_unexpected_exception(vector, frame),
    }
}

/// Vector 13: GP fault. The source signals ILL to the faulting process;
/// with no current process there is nothing left to kill, so the kernel
/// panics instead. Kills immediately (`fault_now`) rather than queuing --
/// the trampoline resumes straight back into the faulting `eip`, so there is
/// no later point at which a queued signal could still be delivered.
fn handle_gp_fault(frame: &TrapFrame) {
    match crate::process::current_pid() {
        Some(pid) => crate::process::signal::fault_now(pid, crate::process::signal::Signal::Ill),
        None => panic!("GP fault with no current process, eip={:#x}", frame.eip),
    }
}

/// Vector 14: page fault. Extends the user stack by one page if the fault
/// landed exactly one page below its current bottom (silent auto-growth);
/// anything else is SEGV.
fn handle_page_fault(frame: &TrapFrame) {
    let fault_addr = read_cr2();

    let Some(pid) = crate::process::current_pid() else {
        panic!(
            "page fault with no current process, addr={:#x} eip={:#x}",
            fault_addr, frame.eip
        );
    };

    if frame.from_user() {
        if let Some(stack_bottom) = crate::process::user_stack_bottom(pid) {
            let grown_bottom = stack_bottom.wrapping_sub(PAGE_SIZE as u32);
            if fault_addr >= grown_bottom
                && fault_addr < stack_bottom
                && crate::process::grow_user_stack(pid, grown_bottom).is_ok()
            {
                return;
            }
        }
    }

    crate::process::signal::fault_now(pid, crate::process::signal::Signal::Segv);
}

fn handle_unexpected_exception(vector: u32, frame: &TrapFrame) {
    match crate::process::current_pid() {
        Some(pid) => {
            log::error!(
                "unhandled exception {} in pid {}, eip={:#x}, killing process",
                vector,
                pid,
                frame.eip
            );
            crate::process::signal::fault_now(pid, crate::process::signal::Signal::Ill);
        }
        None => panic!("unhandled exception {} with no current process", vector),
    }
}

fn read_cr2() -> u32 {
    let addr: u32;
    // SAFETY: reading CR2 has no side effects and is valid in any ring 0
    // context, which a page fault handler always runs in.
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) addr, options(nomem, nostack, preserves_flags))
    };
    addr
}

/// Wires the timer and device IRQs to their subsystems. Called once during
/// `arch::x86::init`, after `idt::init` has installed the gates but before
/// interrupts are unmasked.
pub fn init() {
    register_handler(PIT_VECTOR, on_pit_tick).expect("PIT vector already registered");
    register_handler(RTC_VECTOR, on_rtc_tick).expect("RTC vector already registered");
    register_handler(KEYBOARD_VECTOR, on_keyboard).expect("keyboard vector already registered");
    register_handler(MOUSE_VECTOR, on_mouse).expect("mouse vector already registered");
}

fn on_pit_tick(_frame: &TrapFrame) {
    crate::arch::x86::pit::tick();
    crate::sched::on_timer_tick();
}

fn on_rtc_tick(_frame: &TrapFrame) {
    crate::arch::x86::rtc::tick();
}

fn on_keyboard(_frame: &TrapFrame) {
    crate::drivers::keyboard::on_irq();
}

fn on_mouse(_frame: &TrapFrame) {
    crate::drivers::mouse::on_irq();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn double_registration_is_rejected() {
        fn handler(_frame: &TrapFrame) {}
        let vector = 200u8;
        assert!(register_handler(vector, handler).is_ok());
        assert_eq!(register_handler(vector, handler), Err(KernelError::Exists));
    }
}
