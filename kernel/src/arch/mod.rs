//! Architecture glue, 32-bit x86 only.

pub mod x86;

pub use x86::*;
