//! Process table and scheduling primitive tests.
//!
//! A real context switch needs a live address space and kernel stack, which
//! only exist once a process has actually been spawned through `bootstrap`.
//! These tests exercise what's reachable without that: slot allocation,
//! pid/priority value semantics, and the run-queue admission calls that
//! don't themselves switch stacks.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use mako_kernel::config::MAX_PROCESS_COUNT;
use mako_kernel::mm::PhysAddr;
use mako_kernel::process::pcb::{Pid, Priority};
use mako_kernel::process::table;
use mako_kernel::sched;
use mako_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting process tests...");

    priority_ordering_runs_high_first();
    pid_equality_is_by_value();
    table_alloc_and_get_round_trips();
    table_remove_frees_the_slot_for_reuse();
    table_exhaustion_reports_process_limit();
    priority_can_be_changed_after_allocation();
    scheduler_ready_does_not_crash_without_a_running_task();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn priority_ordering_runs_high_first() {
    assert!(Priority::HIGH < Priority::NORMAL);
    assert!(Priority::NORMAL < Priority::LOW);
    serial_println!("priority_ordering_runs_high_first... [ok]");
}

fn pid_equality_is_by_value() {
    assert_eq!(Pid(7), Pid(7));
    assert_ne!(Pid(7), Pid(8));
    serial_println!("pid_equality_is_by_value... [ok]");
}

fn table_alloc_and_get_round_trips() {
    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    let pid = pcb.pid;
    assert_eq!(pcb.gid, pid);
    assert!(table::get(pid).is_some());
    table::remove(pid);
    assert!(table::get(pid).is_none());
    serial_println!("table_alloc_and_get_round_trips... [ok]");
}

fn table_remove_frees_the_slot_for_reuse() {
    let first = table::alloc_slot(None, Priority::LOW, PhysAddr::new(0), None).unwrap();
    let first_pid = first.pid;
    table::remove(first_pid);

    let second = table::alloc_slot(None, Priority::LOW, PhysAddr::new(0), None).unwrap();
    assert_eq!(second.pid, first_pid);
    table::remove(second.pid);
    serial_println!("table_remove_frees_the_slot_for_reuse... [ok]");
}

fn table_exhaustion_reports_process_limit() {
    let mut pids = alloc::vec::Vec::new();
    for _ in 0..MAX_PROCESS_COUNT {
        let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
        pids.push(pcb.pid);
    }
    assert!(table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).is_err());
    for pid in pids {
        table::remove(pid);
    }
    serial_println!("table_exhaustion_reports_process_limit... [ok]");
}

fn priority_can_be_changed_after_allocation() {
    let pcb = table::alloc_slot(None, Priority::LOW, PhysAddr::new(0), None).unwrap();
    let pid = pcb.pid;
    assert_eq!(*pcb.priority.lock(), Priority::LOW);

    sched::set_priority(pid, Priority::HIGH);
    assert_eq!(*pcb.priority.lock(), Priority::HIGH);

    table::remove(pid);
    serial_println!("priority_can_be_changed_after_allocation... [ok]");
}

fn scheduler_ready_does_not_crash_without_a_running_task() {
    sched::init();
    assert!(sched::current_pid().is_none());

    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    sched::ready(pcb.pid);
    // No task has ever run, so `current_pid` stays unset; `ready` only
    // admits the pid onto its priority's run queue.
    assert!(sched::current_pid().is_none());

    table::remove(pcb.pid);
    serial_println!("scheduler_ready_does_not_crash_without_a_running_task... [ok]");
}
