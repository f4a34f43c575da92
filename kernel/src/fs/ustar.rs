//! USTAR filesystem backend: a tar-like archive of fixed 512-byte metadata
//! blocks interleaved with file contents, linearly scanned on every lookup.
//! No index structure and no free-space coalescing on delete -- a deleted
//! entry's block is simply flipped to [`TYPE_FREE`] and left for [`UstarFs::alloc`]
//! to reclaim on a later write that happens to need a slot of that size.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;

use spin::Mutex;

use super::node::{DirEntry, FsNode, NodeKind, VfsNodeOps};
use crate::error::{KernelError, KernelResult};

const BLOCK_SIZE: u64 = 512;
const USTAR_MAGIC: &[u8; 5] = b"ustar";

const TYPE_NORMAL: u8 = 0;
const TYPE_NORMAL_ALT: u8 = b'0';
const TYPE_HARDLINK: u8 = b'1';
const TYPE_SYMLINK: u8 = b'2';
const TYPE_CHARDEV: u8 = b'3';
const TYPE_BLOCKDEV: u8 = b'4';
const TYPE_DIR: u8 = b'5';
const TYPE_PIPE: u8 = b'6';
const TYPE_FREE: u8 = b'~';

// Field byte offsets within the 512-byte header.
const F_NAME: core::ops::Range<usize> = 0..100;
const F_MODE: core::ops::Range<usize> = 100..108;
const F_SIZE: core::ops::Range<usize> = 124..136;
const F_TYPE: usize = 156;
const F_LINKED_NAME: core::ops::Range<usize> = 157..257;
const F_MAGIC: core::ops::Range<usize> = 257..262;

/// Raw 512-byte header, manipulated through named field accessors rather
/// than a `repr(C)` struct since most fields are text (octal ASCII, NUL- or
/// space-terminated names) rather than fixed-width integers.
#[derive(Clone, Copy)]
struct Header([u8; BLOCK_SIZE as usize]);

impl Header {
    fn zeroed() -> Self {
        Self([0u8; BLOCK_SIZE as usize])
    }

    fn is_ustar(&self) -> bool {
        &self.0[F_MAGIC] == USTAR_MAGIC
    }

    fn set_magic(&mut self) {
        self.0[F_MAGIC].copy_from_slice(USTAR_MAGIC);
    }

    fn name(&self) -> &str {
        cstr(&self.0[F_NAME])
    }

    fn set_name(&mut self, s: &str) {
        write_cstr(&mut self.0[F_NAME], s);
    }

    fn linked_name(&self) -> &str {
        cstr(&self.0[F_LINKED_NAME])
    }

    fn set_linked_name(&mut self, s: &str) {
        write_cstr(&mut self.0[F_LINKED_NAME], s);
    }

    fn kind(&self) -> u8 {
        self.0[F_TYPE]
    }

    fn set_kind(&mut self, kind: u8) {
        self.0[F_TYPE] = kind;
    }

    fn size(&self) -> u32 {
        parse_oct(&self.0[F_SIZE])
    }

    fn set_size(&mut self, n: u32) {
        write_oct(&mut self.0[F_SIZE], n);
    }

    fn mode(&self) -> u32 {
        parse_oct(&self.0[F_MODE])
    }

    fn set_mode(&mut self, n: u32) {
        write_oct(&mut self.0[F_MODE], n);
    }
}

fn cstr(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0 || b == b' ').unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..end]).unwrap_or("")
}

fn write_cstr(dst: &mut [u8], s: &str) {
    dst.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn parse_oct(bytes: &[u8]) -> u32 {
    let mut n: u32 = 0;
    for &b in bytes {
        if b == 0 || b == b' ' || !(b'0'..=b'7').contains(&b) {
            break;
        }
        n = (n << 3) + (b - b'0') as u32;
    }
    n
}

fn write_oct(dst: &mut [u8], mut n: u32) {
    for i in (0..dst.len()).rev() {
        dst[i] = b'0' + (n & 7) as u8;
        n >>= 3;
    }
}

fn block_align_up(n: u32) -> u32 {
    let rem = n % BLOCK_SIZE as u32;
    if rem == 0 {
        n
    } else {
        n + (BLOCK_SIZE as u32 - rem)
    }
}

/// A directory's stored name carries a trailing `/`; matching against a
/// plain (non-slash-terminated) lookup name strips it first.
fn name_match(data_name: &str, name: &str) -> bool {
    if let Some(stripped) = data_name.strip_suffix('/') {
        if stripped.len() == name.len() {
            return stripped == name;
        }
    }
    data_name == name
}

fn join_child(dir_path: &str, name: &str, trailing_slash: bool) -> String {
    let mut path = String::from(dir_path);
    if !path.ends_with('/') {
        path.push('/');
    }
    path.push_str(name);
    if trailing_slash {
        path.push('/');
    }
    path
}

/// True if `name` is a direct child of `dir_path` (its containing directory,
/// minus any trailing slash, equals `dir_path` exactly); returns the child's
/// basename.
fn immediate_child_name<'a>(dir_path: &str, name: &'a str) -> Option<&'a str> {
    let trimmed = name.strip_suffix('/').unwrap_or(name);
    let slash = trimmed.rfind('/')?;
    let (parent, basename) = trimmed.split_at(slash + 1);
    (parent == dir_path).then_some(basename)
}

struct UstarFs {
    device: Arc<FsNode>,
}

impl UstarFs {
    /// Reads the header at `offset`. A short read or a bad magic both mean
    /// "nothing is mapped here" and are folded into `NotFound` -- the ramdisk
    /// backing this filesystem returns `Ok(0)` rather than an error once an
    /// offset runs past its grown length.
    fn read_header_at(&self, offset: u64) -> KernelResult<Header> {
        let mut buf = [0u8; BLOCK_SIZE as usize];
        let n = self.device.ops.read(offset, &mut buf)?;
        let header = Header(buf);
        if n != BLOCK_SIZE as usize || !header.is_ustar() {
            return Err(KernelError::NotFound);
        }
        Ok(header)
    }

    fn write_header(&self, offset: u64, header: &Header) -> KernelResult<()> {
        let n = self.device.ops.write(offset, &header.0)?;
        if n != BLOCK_SIZE as usize {
            return Err(KernelError::Io);
        }
        Ok(())
    }

    fn read_data(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        self.device.ops.read(offset, buf)
    }

    fn write_data(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        self.device.ops.write(offset, buf)
    }

    /// Linear scan for the entry whose stored name matches `path`, skipping
    /// freed slots. `None` once the scan runs off the end of written data.
    fn find(&self, path: &str) -> Option<u64> {
        let mut offset = 0u64;
        loop {
            let mut buf = [0u8; BLOCK_SIZE as usize];
            let n = self.device.ops.read(offset, &mut buf).unwrap_or(0);
            let header = Header(buf);
            if n != BLOCK_SIZE as usize || !header.is_ustar() {
                return None;
            }
            if header.kind() != TYPE_FREE && name_match(header.name(), path) {
                return Some(offset);
            }
            offset += BLOCK_SIZE + block_align_up(header.size()) as u64;
        }
    }

    /// Linear scan for a free slot at least `size` bytes, falling back to
    /// the offset past the last written entry (an append).
    fn alloc(&self, size: u32) -> u64 {
        let mut offset = 0u64;
        loop {
            let mut buf = [0u8; BLOCK_SIZE as usize];
            let n = self.device.ops.read(offset, &mut buf).unwrap_or(0);
            let header = Header(buf);
            if n != BLOCK_SIZE as usize || !header.is_ustar() {
                return offset;
            }
            let block_size = block_align_up(header.size());
            if header.kind() == TYPE_FREE && block_size >= size {
                return offset;
            }
            offset += BLOCK_SIZE + block_size as u64;
        }
    }
}

/// One open USTAR entry. Caches the header's disk offset, but re-locates by
/// [`UstarEntry::path`] if a write has relocated it since (see
/// [`UstarEntry::locate`]).
struct UstarEntry {
    fs: Arc<UstarFs>,
    path: String,
    offset: Mutex<u64>,
}

impl UstarEntry {
    fn locate(&self) -> KernelResult<(u64, Header)> {
        let cached = *self.offset.lock();
        if let Ok(header) = self.fs.read_header_at(cached) {
            if name_match(header.name(), &self.path) {
                return Ok((cached, header));
            }
        }
        let offset = self.fs.find(&self.path).ok_or(KernelError::NotFound)?;
        let header = self.fs.read_header_at(offset)?;
        *self.offset.lock() = offset;
        Ok((offset, header))
    }

    fn make_node(&self, offset: u64, header: Header) -> Arc<FsNode> {
        let path = header.name().to_string();
        let kind = match header.kind() {
            TYPE_DIR => NodeKind::Directory,
            TYPE_SYMLINK => NodeKind::Symlink,
            TYPE_CHARDEV | TYPE_BLOCKDEV => NodeKind::Block,
            TYPE_PIPE => NodeKind::Pipe,
            _ => NodeKind::File,
        };
        let basename = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&path)
            .to_string();
        let entry = Arc::new(UstarEntry {
            fs: self.fs.clone(),
            path,
            offset: Mutex::new(offset),
        });
        FsNode::new(&basename, kind, offset as u32, entry)
    }

    fn create_entry(&self, name: &str, kind: u8, linked: Option<&str>) -> KernelResult<Arc<FsNode>> {
        let lookup_path = join_child(&self.path, name, false);
        if self.fs.find(&lookup_path).is_some() {
            return Err(KernelError::Exists);
        }
        let stored_path = join_child(&self.path, name, kind == TYPE_DIR);
        let mut header = Header::zeroed();
        header.set_magic();
        header.set_name(&stored_path);
        header.set_kind(kind);
        header.set_size(0);
        if let Some(target) = linked {
            header.set_linked_name(target);
        }
        let offset = self.fs.alloc(0);
        self.fs.write_header(offset, &header)?;
        Ok(self.make_node(offset, header))
    }
}

impl VfsNodeOps for UstarEntry {
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let (disk_offset, header) = self.locate()?;
        let file_size = header.size() as u64;
        if offset > file_size {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(file_size - offset) as usize;
        self.fs.read_data(disk_offset + BLOCK_SIZE + offset, &mut buf[..n])
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        let (disk_offset, mut header) = self.locate()?;
        let file_size = header.size();
        let trailing_space = block_align_up(file_size) - file_size;

        // Measure contiguous free space right after this entry's
        // block-aligned allocation, in case later writes can grow in place.
        let mut free_after = trailing_space;
        let mut scan = disk_offset + BLOCK_SIZE + file_size as u64 + trailing_space as u64;
        while let Ok(tmp) = self.fs.read_header_at(scan) {
            if tmp.kind() != TYPE_FREE {
                break;
            }
            let tmp_size = block_align_up(tmp.size());
            free_after += BLOCK_SIZE as u32 + tmp_size;
            scan += BLOCK_SIZE + tmp_size as u64;
        }

        let write_at = offset.min(file_size as u64);
        let new_end = ((write_at as u32).saturating_add(buf.len() as u32)).max(file_size);

        if new_end <= file_size + free_after {
            header.set_size(new_end);
            self.fs.write_header(disk_offset, &header)?;
            let written = self.fs.write_data(disk_offset + BLOCK_SIZE + write_at, buf)?;

            if block_align_up(new_end) != block_align_up(file_size) {
                let remaining = block_align_up(file_size + free_after) - block_align_up(new_end);
                if remaining >= BLOCK_SIZE as u32 {
                    let mut free_block = Header::zeroed();
                    free_block.set_magic();
                    free_block.set_kind(TYPE_FREE);
                    free_block.set_size(remaining - BLOCK_SIZE as u32);
                    self.fs.write_header(
                        disk_offset + BLOCK_SIZE + block_align_up(new_end) as u64,
                        &free_block,
                    )?;
                }
            }
            return Ok(written);
        }

        // Doesn't fit in place: relocate the whole entry to a fresh slot
        // large enough for the new size, and free the old one.
        let new_offset = self.fs.alloc(new_end);
        let mut existing = vec![0u8; file_size as usize];
        self.fs.read_data(disk_offset + BLOCK_SIZE, &mut existing)?;

        let mut new_header = header;
        new_header.set_size(new_end);
        self.fs.write_header(new_offset, &new_header)?;
        self.fs.write_data(new_offset + BLOCK_SIZE, &existing)?;
        let written = self.fs.write_data(new_offset + BLOCK_SIZE + write_at, buf)?;

        header.set_kind(TYPE_FREE);
        self.fs.write_header(disk_offset, &header)?;
        *self.offset.lock() = new_offset;

        Ok(written)
    }

    fn readdir(&self, index: usize) -> KernelResult<Option<DirEntry>> {
        let mut seen = 0usize;
        let mut offset = 0u64;
        loop {
            let Ok(header) = self.fs.read_header_at(offset) else {
                return Ok(None);
            };
            let entry_offset = offset;
            offset += BLOCK_SIZE + block_align_up(header.size()) as u64;

            if header.kind() == TYPE_FREE || header.name().len() <= 1 {
                continue;
            }
            let Some(basename) = immediate_child_name(&self.path, header.name()) else {
                continue;
            };
            if seen == index {
                return Ok(Some(DirEntry {
                    ino: entry_offset as u32,
                    name: basename.to_string(),
                }));
            }
            seen += 1;
        }
    }

    fn finddir(&self, name: &str) -> KernelResult<Arc<FsNode>> {
        let path = join_child(&self.path, name, false);
        let offset = self.fs.find(&path).ok_or(KernelError::NotFound)?;
        let header = self.fs.read_header_at(offset)?;
        Ok(self.make_node(offset, header))
    }

    fn mkdir(&self, name: &str) -> KernelResult<Arc<FsNode>> {
        self.create_entry(name, TYPE_DIR, None)
    }

    fn create(&self, name: &str) -> KernelResult<Arc<FsNode>> {
        self.create_entry(name, TYPE_NORMAL, None)
    }

    fn chmod(&self, mode: u32) -> KernelResult<()> {
        let (offset, mut header) = self.locate()?;
        header.set_mode(mode);
        self.fs.write_header(offset, &header)
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        let path = join_child(&self.path, name, false);
        let offset = self.fs.find(&path).ok_or(KernelError::NotFound)?;
        let mut header = self.fs.read_header_at(offset)?;
        header.set_kind(TYPE_FREE);
        self.fs.write_header(offset, &header)
    }

    fn symlink(&self, name: &str, target: &str) -> KernelResult<()> {
        self.create_entry(name, TYPE_SYMLINK, Some(target)).map(|_| ())
    }

    fn readlink(&self, buf: &mut [u8]) -> KernelResult<usize> {
        let (_, header) = self.locate()?;
        let target = header.linked_name();
        let n = target.len().min(buf.len());
        buf[..n].copy_from_slice(&target.as_bytes()[..n]);
        Ok(n)
    }

    fn rename(&self, old: &str, new: &str) -> KernelResult<()> {
        let old_path = join_child(&self.path, old, false);
        let offset = self.fs.find(&old_path).ok_or(KernelError::NotFound)?;
        if self.fs.find(&join_child(&self.path, new, false)).is_some() {
            return Err(KernelError::Exists);
        }
        let mut header = self.fs.read_header_at(offset)?;
        let new_path = join_child(&self.path, new, header.kind() == TYPE_DIR);
        header.set_name(&new_path);
        self.fs.write_header(offset, &header)
    }

    fn size(&self) -> u64 {
        self.locate().map(|(_, h)| h.size() as u64).unwrap_or(0)
    }

    /// Only the truncate-to-zero case (the common `O_TRUNC` path) reclaims
    /// its old block as a free entry; shrinking to a nonzero length just
    /// lowers the stored size and leaves the slack inside the same block.
    fn truncate(&self, len: u64) -> KernelResult<()> {
        let (disk_offset, mut header) = self.locate()?;
        let old_size = header.size();
        let new_size = len as u32;
        header.set_size(new_size);
        self.fs.write_header(disk_offset, &header)?;

        if new_size == 0 {
            let freed = block_align_up(old_size).saturating_sub(BLOCK_SIZE as u32);
            if freed > 0 {
                let mut free_block = Header::zeroed();
                free_block.set_magic();
                free_block.set_kind(TYPE_FREE);
                free_block.set_size(freed);
                self.fs.write_header(disk_offset + BLOCK_SIZE, &free_block)?;
            }
        }
        Ok(())
    }
}

/// Writes an empty root directory header to `device`, for booting a blank
/// ramdisk with no preloaded archive image.
pub fn format_blank(device: &Arc<FsNode>) -> KernelResult<()> {
    let mut root = Header::zeroed();
    root.set_magic();
    root.set_kind(TYPE_DIR);
    root.set_name("/");
    root.set_size(0);
    let n = device.ops.write(0, &root.0)?;
    if n != BLOCK_SIZE as usize {
        return Err(KernelError::Io);
    }
    Ok(())
}

/// Mounts the USTAR archive on `device` at `mount_path`, reading its root
/// entry from offset 0.
pub fn mount(device: Arc<FsNode>, mount_path: &str) -> KernelResult<()> {
    let fs = Arc::new(UstarFs { device });
    fs.read_header_at(0)?;
    let entry = Arc::new(UstarEntry {
        fs,
        path: String::from("/"),
        offset: Mutex::new(0),
    });
    let root = FsNode::new_mount("ustar", NodeKind::Directory, 0, entry);
    super::vfs::mount(root, mount_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramdisk;
    use alloc::vec::Vec;

    fn formatted_device() -> Arc<FsNode> {
        let dev = ramdisk::new_device(&[]);
        format_blank(&dev).unwrap();
        dev
    }

    fn root_entry(fs: Arc<UstarFs>) -> UstarEntry {
        UstarEntry {
            fs,
            path: String::from("/"),
            offset: Mutex::new(0),
        }
    }

    #[test]
    fn create_write_read_roundtrip() {
        let fs = Arc::new(UstarFs { device: formatted_device() });
        let root = root_entry(fs);
        let node = root.create("greeting").unwrap();
        assert_eq!(node.ops.write(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(node.ops.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_grows_and_relocates_when_out_of_room() {
        let fs = Arc::new(UstarFs { device: formatted_device() });
        let root = root_entry(fs);
        let node = root.create("big").unwrap();
        let payload = vec![7u8; 4096];
        assert_eq!(node.ops.write(0, &payload).unwrap(), payload.len());
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(node.ops.read(0, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn mkdir_then_readdir_lists_immediate_children_only() {
        let fs = Arc::new(UstarFs { device: formatted_device() });
        let root = root_entry(fs);
        let sub = root.mkdir("dir").unwrap();
        let sub_entry = UstarEntry {
            fs: root.fs.clone(),
            path: String::from("/dir/"),
            offset: Mutex::new(sub.inode as u64),
        };
        sub_entry.create("nested").unwrap();
        root.create("top").unwrap();

        let mut names = Vec::new();
        let mut i = 0;
        while let Some(e) = root.readdir(i).unwrap() {
            names.push(e.name);
            i += 1;
        }
        assert_eq!(names, alloc::vec![String::from("dir"), String::from("top")]);
    }

    #[test]
    fn unlink_frees_the_slot_without_coalescing() {
        let fs = Arc::new(UstarFs { device: formatted_device() });
        let root = root_entry(fs);
        root.create("temp").unwrap();
        root.unlink("temp").unwrap();
        assert!(root.fs.find("/temp").is_none());
    }

    #[test]
    fn symlink_readlink_roundtrip() {
        let fs = Arc::new(UstarFs { device: formatted_device() });
        let root = root_entry(fs);
        root.symlink("link", "/target").unwrap();
        let node = root.finddir("link").unwrap();
        let mut buf = [0u8; 32];
        let n = node.ops.readlink(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"/target");
    }

    #[test]
    fn rename_updates_lookup_path() {
        let fs = Arc::new(UstarFs { device: formatted_device() });
        let root = root_entry(fs);
        root.create("old").unwrap();
        root.rename("old", "new").unwrap();
        assert!(root.fs.find("/old").is_none());
        assert!(root.fs.find("/new").is_some());
    }
}
