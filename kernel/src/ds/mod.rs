//! Shared intrusive data structures: a doubly-linked list and an
//! array-backed binary min-heap.
//!
//! Both are allocator-friendly by construction -- neither retries or backs
//! off under memory pressure, since PMM/heap/scheduler code built on top of
//! them must not deadlock against themselves. The VFS mount tree has its
//! own `Arc`-linked node shape (`fs::node::TreeNode`) rather than reusing a
//! generic tree here.

pub mod list;
pub mod minheap;

pub use list::IntrusiveList;
pub use minheap::MinHeap;
