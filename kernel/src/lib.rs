//! Mako kernel library.
//!
//! A small preemptively multitasked kernel for 32-bit x86: physical/virtual
//! memory management, a priority round-robin scheduler, a VFS with USTAR and
//! EXT2 backends, an `int 0x80` syscall ABI, and a compositing UI service.
//! Single CPU only -- no APIC/SMP, no x86-64.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

extern crate alloc;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: mm::heap::KernelHeap = mm::heap::KernelHeap;

// Host target (x86_64-unknown-linux-gnu, used for `cargo test`): delegate to
// the system allocator so unit tests can use Vec/String/Arc normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod boot;
pub mod bootstrap;
pub mod config;
pub mod drivers;
pub mod ds;
pub mod error;
pub mod fs;
pub mod graphics;
pub mod irq;
pub mod log_setup;
pub mod mm;
pub mod process;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;

mod test_framework;

#[cfg(test)]
mod integration_tests;

pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};

#[cfg(test)]
pub use test_framework::test_runner;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation failure is unrecoverable in a `no_std` kernel; the
/// `alloc_error_handler` ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
