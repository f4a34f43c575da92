//! Multiboot 1 entry point.
//!
//! GRUB (or any Multiboot 1 loader) jumps to `_start` with `eax` holding the
//! Multiboot magic and `ebx` the physical address of the boot info struct,
//! per the Multiboot 1 spec; `boot::multiboot::parse` reads it back out of
//! `ebx` once `bootstrap::kmain` is under way.

#![no_std]
#![no_main]
#![cfg_attr(target_os = "none", feature(naked_functions))]

use core::panic::PanicInfo;

/// Multiboot 1 header: GRUB scans the first 8 KiB of the kernel image for
/// this magic/flags/checksum triple before it will boot it at all.
#[cfg(target_os = "none")]
#[link_section = ".multiboot"]
#[used]
static MULTIBOOT_HEADER: [u32; 3] = {
    const MAGIC: u32 = 0x1BAD_B002;
    const FLAGS: u32 = 0;
    [MAGIC, FLAGS, (0u32).wrapping_sub(MAGIC).wrapping_sub(FLAGS)]
};

const BOOT_STACK_SIZE: usize = 16 * 1024;

#[cfg(target_os = "none")]
#[repr(align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

#[cfg(target_os = "none")]
static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

/// Entered directly by the bootloader with `eax` = Multiboot magic, `ebx` =
/// physical address of the Multiboot info struct, and no stack set up yet.
/// Switches onto [`BOOT_STACK`] and forwards both registers to
/// [`kmain_trampoline`] before any Rust code that might touch the stack
/// (spilled locals, a call) can run.
#[cfg(target_os = "none")]
#[naked]
#[no_mangle]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "mov esp, {stack} + {stack_size}",
        "push ebx", // multiboot info pointer
        "push eax", // multiboot magic
        "call {trampoline}",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        trampoline = sym kmain_trampoline,
    );
}

#[cfg(target_os = "none")]
extern "C" fn kmain_trampoline(magic: u32, info_addr: u32) -> ! {
    mako_kernel::bootstrap::kmain(magic, info_addr)
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    mako_kernel::serial_println!("kernel panic: {}", info);
    loop {
        // SAFETY: halting forever is the correct response to an
        // unrecoverable panic; interrupts stay enabled so a debugger
        // attached over serial can still interrupt execution.
        unsafe { core::arch::asm!("hlt") };
    }
}

// Host build (`cargo build` on the dev machine, not the bare-metal target)
// has no bare-metal entry point to provide; this binary only exists for the
// `target_os = "none"` target.
#[cfg(not(target_os = "none"))]
fn main() {}
