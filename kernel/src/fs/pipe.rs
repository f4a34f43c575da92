//! Pipe: a 512-byte ring buffer shared by two `fs_node`s, one
//! per side. Blocking reads/writes park on a [`WaitQueue`] and are woken by
//! mutations on the opposite side.

use alloc::sync::Arc;

use spin::Mutex;

use super::node::{DirEntry, FsNode, NodeKind, VfsNodeOps};
use crate::config::PIPE_RING_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::sched::wait::WaitQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read returns at the next newline; write blocks until the whole
    /// buffer is queued.
    Buffered,
    /// Read/write return as soon as any progress is made.
    Unbuffered,
}

struct Ring {
    buf: [u8; PIPE_RING_SIZE],
    head: usize,
    tail: usize,
    len: usize,
    read_refcount: u32,
    write_refcount: u32,
    read_closed: bool,
    write_closed: bool,
    read_mode: Mode,
    write_mode: Mode,
}

impl Ring {
    fn new() -> Self {
        Self {
            buf: [0; PIPE_RING_SIZE],
            head: 0,
            tail: 0,
            len: 0,
            read_refcount: 1,
            write_refcount: 1,
            read_closed: false,
            write_closed: false,
            read_mode: Mode::Unbuffered,
            write_mode: Mode::Unbuffered,
        }
    }

    fn is_full(&self) -> bool {
        self.len == PIPE_RING_SIZE
    }

    fn push_byte(&mut self, b: u8) {
        self.buf[self.tail] = b;
        self.tail = (self.tail + 1) % PIPE_RING_SIZE;
        self.len += 1;
    }

    fn pop_byte(&mut self) -> u8 {
        let b = self.buf[self.head];
        self.head = (self.head + 1) % PIPE_RING_SIZE;
        self.len -= 1;
        b
    }
}

/// Shared pipe object; the `VfsNodeOps` for each side holds an `Arc<Pipe>`
/// plus a [`Side`] tag.
pub struct Pipe {
    ring: Mutex<Ring>,
    readers: WaitQueue,
    writers: WaitQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Read,
    Write,
}

impl Pipe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ring: Mutex::new(Ring::new()),
            readers: WaitQueue::new(),
            writers: WaitQueue::new(),
        })
    }

    pub fn set_mode(&self, side: Side, mode: Mode) {
        let mut ring = self.ring.lock();
        match side {
            Side::Read => ring.read_mode = mode,
            Side::Write => ring.write_mode = mode,
        }
    }

    pub fn add_ref(&self, side: Side) {
        let mut ring = self.ring.lock();
        match side {
            Side::Read => ring.read_refcount += 1,
            Side::Write => ring.write_refcount += 1,
        }
    }

    /// Drops a reference to `side`; when the last reference on a side
    /// closes, the opposite side's waiters are woken so pending reads
    /// observe EOF and pending writes observe `BrokenPipe`.
    pub fn drop_ref(&self, side: Side) {
        let became_closed = {
            let mut ring = self.ring.lock();
            match side {
                Side::Read => {
                    ring.read_refcount = ring.read_refcount.saturating_sub(1);
                    if ring.read_refcount == 0 {
                        ring.read_closed = true;
                        true
                    } else {
                        false
                    }
                }
                Side::Write => {
                    ring.write_refcount = ring.write_refcount.saturating_sub(1);
                    if ring.write_refcount == 0 {
                        ring.write_closed = true;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if became_closed {
            match side {
                Side::Read => self.writers.wake_all(),
                Side::Write => self.readers.wake_all(),
            }
        }
    }

    /// Blocks until at least one byte is available or the write side is
    /// closed, then drains up to `buf.len()` bytes (or, in buffered mode,
    /// up to and including the next newline).
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut ring = self.ring.lock();
                if ring.len > 0 {
                    let mode = ring.read_mode;
                    let mut n = 0;
                    while n < buf.len() && ring.len > 0 {
                        let b = ring.pop_byte();
                        buf[n] = b;
                        n += 1;
                        if mode == Mode::Buffered && b == b'\n' {
                            break;
                        }
                        if mode == Mode::Unbuffered {
                            break;
                        }
                    }
                    self.writers.wake_all();
                    return Ok(n);
                }
                if ring.write_closed {
                    return Ok(0); // EOF
                }
            }
            self.readers.park();
        }
    }

    /// Non-blocking variant used by interrupt-context producers (keyboard,
    /// mouse) that cannot park: pushes as many bytes as currently fit and
    /// returns immediately, dropping the rest rather than waiting for the
    /// reader to drain the ring.
    pub fn try_write(&self, buf: &[u8]) -> usize {
        let mut ring = self.ring.lock();
        if ring.read_closed {
            return 0;
        }
        let mut written = 0;
        while written < buf.len() && !ring.is_full() {
            ring.push_byte(buf[written]);
            written += 1;
        }
        if written > 0 {
            self.readers.wake_all();
        }
        written
    }

    /// Blocks while the ring is full. If the read side closes mid-write,
    /// raises `BrokenPipe`, returning the count written before the closure
    /// was observed.
    pub fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        let mut written = 0;
        while written < buf.len() {
            {
                let mut ring = self.ring.lock();
                if ring.read_closed {
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(KernelError::BrokenPipe)
                    };
                }
                if !ring.is_full() {
                    let mode = ring.write_mode;
                    while written < buf.len() && !ring.is_full() {
                        ring.push_byte(buf[written]);
                        written += 1;
                        if mode == Mode::Unbuffered {
                            break;
                        }
                    }
                    self.readers.wake_all();
                    if mode == Mode::Unbuffered {
                        return Ok(written);
                    }
                    continue;
                }
            }
            self.writers.park();
        }
        Ok(written)
    }
}

/// `VfsNodeOps` for one end of a pipe; everything but `read`/`write`/`size`
/// is either unsupported (pipes have no directory structure or links) or a
/// no-op (`chmod`).
struct PipeEnd {
    pipe: Arc<Pipe>,
    side: Side,
}

impl VfsNodeOps for PipeEnd {
    fn read(&self, _offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        self.pipe.read(buf)
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> KernelResult<usize> {
        self.pipe.write(buf)
    }

    fn readdir(&self, _index: usize) -> KernelResult<Option<DirEntry>> {
        Err(KernelError::NotDir)
    }

    fn finddir(&self, _name: &str) -> KernelResult<Arc<FsNode>> {
        Err(KernelError::NotDir)
    }

    fn mkdir(&self, _name: &str) -> KernelResult<Arc<FsNode>> {
        Err(KernelError::NotDir)
    }

    fn create(&self, _name: &str) -> KernelResult<Arc<FsNode>> {
        Err(KernelError::NotDir)
    }

    fn chmod(&self, _mode: u32) -> KernelResult<()> {
        Ok(())
    }

    fn unlink(&self, _name: &str) -> KernelResult<()> {
        Err(KernelError::NotDir)
    }

    fn symlink(&self, _name: &str, _target: &str) -> KernelResult<()> {
        Err(KernelError::NotDir)
    }

    fn readlink(&self, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::InvalidArgument)
    }

    fn rename(&self, _old: &str, _new: &str) -> KernelResult<()> {
        Err(KernelError::NotDir)
    }

    fn size(&self) -> u64 {
        0
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.pipe.drop_ref(self.side);
    }
}

fn next_pipe_inode() -> u32 {
    use core::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Builds the read/write `FsNode` pair backing a freshly created pipe, for
/// the `pipe` syscall to install into two fresh fds.
pub fn open_pair() -> (Arc<FsNode>, Arc<FsNode>) {
    let pipe = Pipe::new();
    let read_end = FsNode::new(
        "pipe",
        NodeKind::Pipe,
        next_pipe_inode(),
        Arc::new(PipeEnd {
            pipe: pipe.clone(),
            side: Side::Read,
        }),
    );
    let write_end = FsNode::new(
        "pipe",
        NodeKind::Pipe,
        next_pipe_inode(),
        Arc::new(PipeEnd {
            pipe,
            side: Side::Write,
        }),
    );
    (read_end, write_end)
}

/// Same as [`open_pair`] but also returns the underlying [`Pipe`], for
/// callers (the UI event path) that need [`Pipe::try_write`] from
/// interrupt context alongside the ordinary blocking `FsNode` read end.
pub fn open_pair_raw() -> (Arc<FsNode>, Arc<FsNode>, Arc<Pipe>) {
    let pipe = Pipe::new();
    let read_end = FsNode::new(
        "pipe",
        NodeKind::Pipe,
        next_pipe_inode(),
        Arc::new(PipeEnd {
            pipe: pipe.clone(),
            side: Side::Read,
        }),
    );
    let write_end = FsNode::new(
        "pipe",
        NodeKind::Pipe,
        next_pipe_inode(),
        Arc::new(PipeEnd {
            pipe: pipe.clone(),
            side: Side::Write,
        }),
    );
    (read_end, write_end, pipe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_write_round_trips() {
        let pipe = Pipe::new();
        pipe.set_mode(Side::Write, Mode::Buffered);
        pipe.set_mode(Side::Read, Mode::Buffered);
        assert_eq!(pipe.write(b"hi\n").unwrap(), 3);
        let mut buf = [0u8; 16];
        let n = pipe.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi\n");
    }

    #[test]
    fn write_closed_causes_broken_pipe() {
        let pipe = Pipe::new();
        pipe.drop_ref(Side::Read);
        assert_eq!(pipe.write(b"x").unwrap_err(), KernelError::BrokenPipe);
    }

    #[test]
    fn read_returns_eof_after_writer_closes() {
        let pipe = Pipe::new();
        pipe.drop_ref(Side::Write);
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn open_pair_round_trips_through_fs_node() {
        let (read_end, write_end) = open_pair();
        assert_eq!(write_end.ops.write(0, b"x").unwrap(), 1);
        let mut buf = [0u8; 8];
        assert_eq!(read_end.ops.read(0, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'x');
    }
}
