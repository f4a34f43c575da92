//! Boot-time glue: Multiboot 1 info parsing.

pub mod multiboot;
