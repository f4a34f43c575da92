//! Compile-time constants shared across the kernel.
//!
//! Values here are fixed by the kernel/user ABI (page size, address-space
//! split, recursive mapping slot, fd table size) or are reasonable defaults
//! that do not change kernel correctness (tick rate, PCB slab capacity).

/// Size of a physical/virtual page.
pub const PAGE_SIZE: usize = 4096;

/// Split between the user half and the kernel half of every address space.
pub const KERNEL_VIRT_BASE: u32 = 0xC000_0000;

/// Page holding argv/envp for the process about to start, just below the
/// kernel half.
pub const PROCESS_ENV_VADDR: u32 = KERNEL_VIRT_BASE - PAGE_SIZE as u32;

/// Index of the recursive self-mapping entry in every page directory.
pub const RECURSIVE_PD_INDEX: usize = 1023;

/// Base virtual address of the recursive-map window (current PD/PTs).
pub const RECURSIVE_BASE: u32 = 0xFFC0_0000;

/// Entries per page directory / page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Per-process open file descriptor slots.
pub const MAX_PROCESS_FDS: usize = 16;

/// Static PCB slab capacity, chosen to match the reference userland's
/// `MAX_PROCESS_COUNT`.
pub const MAX_PROCESS_COUNT: usize = 64;

/// Number of scheduler priority levels (0..=2).
pub const PRIORITY_LEVELS: usize = 3;
pub const MAX_PROCESS_PRIORITY: u8 = 2;

/// Maximum path segment/name length.
pub const FS_NAME_LEN: usize = 256;

/// Size of the FXSAVE/FXRSTOR scratch area, 16-byte aligned.
pub const FPU_STATE_SIZE: usize = 512;

/// PIT periodic tick rate.
pub const TIMER_HZ: u32 = 50;

/// Pipe ring buffer capacity.
pub const PIPE_RING_SIZE: usize = 512;

/// Framebuffer geometry.
pub const FB_WIDTH: usize = 1024;
pub const FB_HEIGHT: usize = 768;
pub const FB_BPP: usize = 4;

/// Fixed size of a `ui_event` record delivered over a responder's pipe.
pub const UI_EVENT_SIZE: usize = 24;

/// Opacity step used by the title-bar opacity button.
pub const UI_OPACITY_STEP: u8 = 0x22;
pub const UI_OPACITY_MIN: u8 = 0x99;
pub const UI_OPACITY_MAX: u8 = 0xff;

/// Default kernel stack size per thread, in pages. One extra unmapped guard
/// page is installed above the stack to catch overflow explicitly rather
/// than silently corrupting adjacent allocations.
pub const KERNEL_STACK_PAGES: usize = 4;
pub const KERNEL_STACK_GUARD_PAGES: usize = 1;

/// Base of the fixed kernel-stack pool, one `(KERNEL_STACK_PAGES +
/// KERNEL_STACK_GUARD_PAGES)`-page slot per [`MAX_PROCESS_COUNT`] table
/// entry. Placed far enough above `KERNEL_VIRT_BASE` to sit above the
/// boot-time identity map of physical RAM (capped at 1 GiB in
/// `paging::init`), so slot pages never alias an already-present identity
/// PTE.
pub const KSTACK_REGION_BASE: u32 = KERNEL_VIRT_BASE + 0x3000_0000;

/// Default user stack size in pages, and its own guard page below it that
/// the page-fault handler auto-grows into (see `irq::handle_page_fault`).
pub const USER_STACK_PAGES: usize = 64;
