//! One module per syscall family, grouped the way [`super::table::SyscallNumber`]
//! groups them: process lifecycle, filesystem, address space, signals, UI.

pub mod fs;
pub mod mm;
pub mod process;
pub mod signal;
pub mod ui;
