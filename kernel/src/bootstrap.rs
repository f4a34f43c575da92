//! Kernel entry sequence.
//!
//! `main.rs`'s `_start` trampoline lands here with the raw Multiboot magic
//! and info pointer straight off the bootloader handoff; everything else --
//! arch glue, memory, VFS, storage backends, scheduler, UI -- comes up in
//! one fixed order from a single place, matching the init order called out
//! in the design notes: arch glue -> PMM -> paging -> heap -> VFS -> storage
//! backends -> scheduler -> UI.

use crate::error::KernelResult;
use crate::{arch, fs, graphics, log_setup, mm, process, sched};

const MULTIBOOT1_MAGIC: u32 = 0x2BAD_B002;

/// Entered from `main.rs`'s `_start` trampoline with the bootloader's
/// `eax`/`ebx` forwarded verbatim. Never returns: the tail end of
/// initialization hands off to the scheduler, which runs `/bin/init` and
/// never gives control back to this stack.
pub fn kmain(magic: u32, info_addr: u32) -> ! {
    log_setup::init();
    log::info!(target: "boot", "mako kernel starting, multiboot info at {:#x}", info_addr);

    if magic != MULTIBOOT1_MAGIC {
        panic!("not loaded by a Multiboot 1 bootloader (magic {:#x})", magic);
    }

    // SAFETY: `info_addr` is the Multiboot info pointer the bootloader left
    // in `ebx`, forwarded unmodified from `_start`.
    let mmap = unsafe { crate::boot::multiboot::parse(info_addr) };

    arch::init();
    log::info!(target: "boot", "arch glue ready (GDT/IDT/PIC/PIT/RTC)");

    // SAFETY: `__kernel_start`/`__kernel_end` are linker-provided markers
    // bracketing the loaded image; only their addresses are read, never
    // dereferenced.
    let (kernel_start, kernel_end) =
        unsafe { (&__kernel_start as *const u8 as u32, &__kernel_end as *const u8 as u32) };
    mm::init(&mmap, kernel_start, kernel_end);
    log::info!(
        target: "boot",
        "memory: {} pages free of {} total",
        mm::pmm::free_pages(),
        mm::pmm::total_pages()
    );

    fs::init();
    mount_root_filesystem().expect("failed to mount root filesystem");
    log::info!(target: "boot", "VFS ready");

    graphics::init().expect("failed to initialize UI server");
    log::info!(target: "boot", "UI server ready");

    sched::init();

    let init_pid = process::spawn_init_process("/bin/init").expect("failed to load /bin/init");
    log::info!(target: "boot", "pid {} (/bin/init) loaded", init_pid);

    let destroyer_pid = process::destroyer::spawn();
    log::info!(target: "boot", "pid {} (destroyer) ready", destroyer_pid);

    // Never returns: this hands off to the scheduler, which marks
    // `init_pid` runnable and switches onto its kernel stack.
    sched::start(init_pid)
}

/// Mounts the root filesystem backend at `/`.
///
/// A real boot hands the kernel its root image as a Multiboot module, but
/// module loading is outside this core's scope (the bootloader/build
/// tooling's job); here an empty USTAR image is formatted on a RAM-backed
/// device so the rest of boot can proceed the same way either way.
fn mount_root_filesystem() -> KernelResult<()> {
    let device = fs::ramdisk::new_device(&[]);
    fs::ustar::format_blank(&device)?;
    fs::ustar::mount(device, "/")?;

    fs::mkdir("/", "/bin")?;
    Ok(())
}

// Linker-provided symbols bracketing the kernel image (src/arch/x86/link.ld),
// used to carve the loaded kernel out of the PMM's free-extent list.
// Addresses only; never dereferenced.
extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}
