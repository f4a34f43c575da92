//! In-memory block device node: backs the USTAR and EXT2 filesystems in the
//! absence of a disk controller driver. Mounted at `/dev/hda` (USTAR) and
//! `/dev/hdb` (EXT2), matching the device-path convention the backends
//! expect, and grown lazily so a freshly booted image can be formatted in
//! place.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::node::{DirEntry, FsNode, NodeKind, VfsNodeOps};
use crate::error::{KernelError, KernelResult};

struct RamDisk {
    bytes: Mutex<Vec<u8>>,
}

impl VfsNodeOps for RamDisk {
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let bytes = self.bytes.lock();
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        let mut bytes = self.bytes.lock();
        let offset = offset as usize;
        let needed = offset + buf.len();
        if bytes.len() < needed {
            bytes.resize(needed, 0);
        }
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
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
        self.bytes.lock().len() as u64
    }
}

fn next_device_inode() -> u32 {
    use core::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Builds a fresh, empty block device node. `preload` seeds its initial
/// contents (an initrd image shipped as a Multiboot module, say); pass an
/// empty slice for a blank disk a backend's `format` call will initialize.
pub fn new_device(preload: &[u8]) -> Arc<FsNode> {
    FsNode::new(
        "hd",
        NodeKind::Block,
        next_device_inode(),
        Arc::new(RamDisk {
            bytes: Mutex::new(preload.to_vec()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dev = new_device(&[]);
        assert_eq!(dev.ops.write(4, b"hi").unwrap(), 2);
        let mut buf = [0u8; 2];
        assert_eq!(dev.ops.read(4, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let dev = new_device(&[1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(dev.ops.read(10, &mut buf).unwrap(), 0);
    }
}
