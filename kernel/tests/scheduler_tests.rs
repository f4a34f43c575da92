//! Scheduler admission and priority tests.
//!
//! Exercises the round-robin run-queue admission path (`sched::ready`,
//! `sched::set_priority`, `sched::wake`) without ever performing a real
//! stack switch, since that needs a task actually spawned through
//! `bootstrap` with a prepared kernel stack and address space.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use mako_kernel::mm::PhysAddr;
use mako_kernel::process::pcb::Priority;
use mako_kernel::process::table;
use mako_kernel::sched;
use mako_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting scheduler tests...");

    sched::init();

    no_current_task_before_start();
    ready_is_idempotent_for_an_already_runnable_task();
    wake_is_an_alias_for_ready();
    set_priority_moves_a_task_between_run_queues();
    ticks_only_advance_on_timer_interrupts();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn no_current_task_before_start() {
    assert!(sched::current_pid().is_none());
    serial_println!("no_current_task_before_start... [ok]");
}

fn ready_is_idempotent_for_an_already_runnable_task() {
    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    // Admitting the same pid twice must not panic or double-enqueue it;
    // there's no public way to inspect queue length, so this only checks
    // that calling `ready` twice is safe.
    sched::ready(pcb.pid);
    sched::ready(pcb.pid);
    table::remove(pcb.pid);
    serial_println!("ready_is_idempotent_for_an_already_runnable_task... [ok]");
}

fn wake_is_an_alias_for_ready() {
    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    sched::wake(pcb.pid);
    table::remove(pcb.pid);
    serial_println!("wake_is_an_alias_for_ready... [ok]");
}

fn set_priority_moves_a_task_between_run_queues() {
    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    assert_eq!(*pcb.priority.lock(), Priority::NORMAL);

    sched::set_priority(pcb.pid, Priority::LOW);
    assert_eq!(*pcb.priority.lock(), Priority::LOW);

    sched::set_priority(pcb.pid, Priority::HIGH);
    assert_eq!(*pcb.priority.lock(), Priority::HIGH);

    table::remove(pcb.pid);
    serial_println!("set_priority_moves_a_task_between_run_queues... [ok]");
}

fn ticks_only_advance_on_timer_interrupts() {
    let before = sched::ticks();
    let after = sched::ticks();
    assert_eq!(before, after);
    serial_println!("ticks_only_advance_on_timer_interrupts... [ok]");
}
