//! Address arithmetic and configuration smoke tests.
//!
//! `mm::pmm::init` needs a real Multiboot memory map, which only exists
//! once a bootloader has actually handed the kernel one; the allocator's
//! splitting/merging/exhaustion logic is covered by the `#[cfg(test)]`
//! module colocated with `mm::pmm`, which can build a synthetic map. This
//! binary sticks to what's safe to exercise before that handoff happens.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use mako_kernel::config::{KERNEL_VIRT_BASE, PAGE_SIZE, RECURSIVE_PD_INDEX};
use mako_kernel::mm::{PhysAddr, VirtAddr};
use mako_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting memory tests...");

    page_size_is_a_power_of_two();
    phys_addr_alignment_round_trips();
    virt_addr_splits_into_pd_and_pt_index();
    recursive_slot_is_the_last_page_directory_entry();
    virt_addr_arithmetic_is_consistent();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn page_size_is_a_power_of_two() {
    assert!(PAGE_SIZE.is_power_of_two());
    serial_println!("page_size_is_a_power_of_two... [ok]");
}

fn phys_addr_alignment_round_trips() {
    let a = PhysAddr::new(0x10_1234);
    assert!(!a.is_page_aligned());
    let aligned = a.align_down();
    assert!(aligned.is_page_aligned());
    assert_eq!(aligned.as_u32(), 0x10_1000);
    assert_eq!(a.offset_in_page(), 0x234);
    serial_println!("phys_addr_alignment_round_trips... [ok]");
}

fn virt_addr_splits_into_pd_and_pt_index() {
    let v = VirtAddr::new(KERNEL_VIRT_BASE + 5 * PAGE_SIZE as u32);
    assert!(v.is_kernel_half());
    assert_eq!(v.pd_index(), (KERNEL_VIRT_BASE >> 22) as usize);
    assert_eq!(v.pt_index(), 5);
    serial_println!("virt_addr_splits_into_pd_and_pt_index... [ok]");
}

fn recursive_slot_is_the_last_page_directory_entry() {
    assert_eq!(RECURSIVE_PD_INDEX, 1023);
    serial_println!("recursive_slot_is_the_last_page_directory_entry... [ok]");
}

fn virt_addr_arithmetic_is_consistent() {
    let base = VirtAddr::new(0x1000);
    let advanced = base + PAGE_SIZE as u32;
    assert_eq!(advanced - PAGE_SIZE as u32, base);
    serial_println!("virt_addr_arithmetic_is_consistent... [ok]");
}
