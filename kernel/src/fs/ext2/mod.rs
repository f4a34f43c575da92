//! EXT2 (revision 0) filesystem backend: a block-group/bitmap-allocated
//! filesystem with indirect block chains and packed variable-length
//! directory entries, as opposed to USTAR's flat linear-scan archive.
//!
//! Only a single block group is ever produced by [`format`] -- enough
//! blocks and inodes to back a root filesystem image bundled with the
//! kernel -- but [`Ext2Fs::open`] computes `group_count` generically from
//! the superblock, so a multi-group image (were one ever supplied) mounts
//! correctly too.
//!
//! Deliberately, like [`super::ustar`], nothing here ever reclaims a
//! block or inode freed by `unlink` or `truncate`: the original
//! implementation's free-space bookkeeping for both paths existed only as
//! commented-out dead code, never wired up, so the Rust port matches that
//! behavior openly rather than inventing a reclaim path with no
//! original to ground it in.

mod disk;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use disk::{
    padded_entry_len, Bgd, DirEntryHeader, Inode, Superblock, BGD_SIZE, INODE_SIZE, S_IFDIR,
    S_IFLNK, S_IFMT, S_IFREG,
};

use super::node::{DirEntry, FsNode, NodeKind, VfsNodeOps};
use crate::error::{KernelError, KernelResult};

const ROOT_INODE: u32 = 2;

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

fn test_bit(bitmap: &[u8], bit: u32) -> bool {
    bitmap[(bit / 8) as usize] & (1 << (bit % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], bit: u32) {
    bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
}

/// First unset bit below `limit`, or `None` if the whole range is taken.
fn find_zero_bit(bitmap: &[u8], limit: u32) -> Option<u32> {
    (0..limit).find(|&b| !test_bit(bitmap, b))
}

fn write_dir_entry(dst: &mut [u8], inode_num: u32, rec_len: u16, name: &str) {
    DirEntryHeader::set_inode(dst, inode_num);
    DirEntryHeader::set_rec_len(dst, rec_len);
    DirEntryHeader::set_name_len(dst, name.len() as u8);
    dst[DirEntryHeader::LEN..DirEntryHeader::LEN + name.len()].copy_from_slice(name.as_bytes());
}

/// Mounted filesystem state: device handle, cached superblock/BGD table and
/// the four locks mirroring the original's separate critical sections
/// (raw block I/O, block bitmap+BGDs+superblock, inode bitmap+BGDs+superblock,
/// and the directory/file operations built on top of both).
struct Ext2Fs {
    device: Arc<FsNode>,
    block_size: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    group_count: u32,
    inode_size: u32,
    superblock: Mutex<Superblock>,
    bgds: Mutex<Vec<Bgd>>,
    io_lock: Mutex<()>,
    block_bitmap_lock: Mutex<()>,
    inode_bitmap_lock: Mutex<()>,
    ops_lock: Mutex<()>,
}

impl Ext2Fs {
    fn bgd_start(&self) -> u32 {
        if self.block_size > 1024 {
            1
        } else {
            2
        }
    }

    fn open(device: Arc<FsNode>) -> KernelResult<Self> {
        let mut sb_buf = [0u8; disk::SUPERBLOCK_SIZE];
        let n = device.ops.read(1024, &mut sb_buf)?;
        if n != disk::SUPERBLOCK_SIZE {
            return Err(KernelError::NoSuchDevice);
        }
        let superblock = Superblock(sb_buf);
        if superblock.magic() != disk::EXT2_MAGIC {
            return Err(KernelError::NoSuchDevice);
        }

        let block_size = 1024u32 << superblock.block_size_offset();
        let blocks_per_group = superblock.blocks_per_group();
        let inodes_per_group = superblock.inodes_per_group();
        let group_count = ceil_div(superblock.block_count(), blocks_per_group);
        let inode_size = superblock.inode_size() as u32;

        let fs = Ext2Fs {
            device,
            block_size,
            blocks_per_group,
            inodes_per_group,
            group_count,
            inode_size,
            superblock: Mutex::new(superblock),
            bgds: Mutex::new(Vec::new()),
            io_lock: Mutex::new(()),
            block_bitmap_lock: Mutex::new(()),
            inode_bitmap_lock: Mutex::new(()),
            ops_lock: Mutex::new(()),
        };

        let bgd_block_count = ceil_div(group_count * BGD_SIZE as u32, block_size);
        let per_block = block_size as usize / BGD_SIZE;
        let mut bgds = Vec::with_capacity(group_count as usize);
        let mut buf = vec![0u8; block_size as usize];
        for i in 0..bgd_block_count {
            fs.read_block(fs.bgd_start() + i, &mut buf)?;
            for j in 0..per_block {
                if bgds.len() as u32 >= group_count {
                    break;
                }
                let off = j * BGD_SIZE;
                bgds.push(Bgd::from_bytes(&buf[off..off + BGD_SIZE]));
            }
        }
        *fs.bgds.lock() = bgds;
        Ok(fs)
    }

    fn read_block(&self, block_num: u32, buf: &mut [u8]) -> KernelResult<()> {
        let _guard = self.io_lock.lock();
        let offset = self.block_size as u64 * block_num as u64;
        let n = self.device.ops.read(offset, buf)?;
        if n != buf.len() {
            return Err(KernelError::Io);
        }
        Ok(())
    }

    fn write_block(&self, block_num: u32, buf: &[u8]) -> KernelResult<()> {
        let _guard = self.io_lock.lock();
        let offset = self.block_size as u64 * block_num as u64;
        let n = self.device.ops.write(offset, buf)?;
        if n != buf.len() {
            return Err(KernelError::Io);
        }
        Ok(())
    }

    fn write_bgds(&self) -> KernelResult<()> {
        let bgds = self.bgds.lock();
        let per_block = self.block_size as usize / BGD_SIZE;
        let bgd_block_count = ceil_div(self.group_count * BGD_SIZE as u32, self.block_size);
        let mut buf = vec![0u8; self.block_size as usize];
        for i in 0..bgd_block_count {
            buf.fill(0);
            for j in 0..per_block {
                let gi = (i as usize) * per_block + j;
                if gi >= bgds.len() {
                    break;
                }
                let off = j * BGD_SIZE;
                buf[off..off + BGD_SIZE].copy_from_slice(&bgds[gi].0);
            }
            self.write_block(self.bgd_start() + i, &buf)?;
        }
        Ok(())
    }

    fn write_superblock(&self) -> KernelResult<()> {
        let sb = self.superblock.lock();
        let n = self.device.ops.write(1024, &sb.0)?;
        if n != disk::SUPERBLOCK_SIZE {
            return Err(KernelError::Io);
        }
        Ok(())
    }

    /// Scans block groups for a free block, falling back across groups in
    /// order. Unlike the original's separate, inconsistently-addressed
    /// free path, the bit scheme here is the same one `alloc_block` uses,
    /// so there's only one way to interpret a bitmap byte in this module.
    fn alloc_block(&self) -> KernelResult<u32> {
        let _guard = self.block_bitmap_lock.lock();
        for gi in 0..self.group_count {
            let (free, bitmap_block) = {
                let bgds = self.bgds.lock();
                (bgds[gi as usize].free_block_count(), bgds[gi as usize].block_bitmap())
            };
            if free == 0 {
                continue;
            }
            let mut bitmap = vec![0u8; self.block_size as usize];
            self.read_block(bitmap_block, &mut bitmap)?;
            let Some(bit) = find_zero_bit(&bitmap, self.blocks_per_group) else {
                continue;
            };
            set_bit(&mut bitmap, bit);
            self.write_block(bitmap_block, &bitmap)?;

            {
                let mut bgds = self.bgds.lock();
                let f = bgds[gi as usize].free_block_count();
                bgds[gi as usize].set_free_block_count(f - 1);
            }
            self.write_bgds()?;
            {
                let mut sb = self.superblock.lock();
                let f = sb.free_block_count();
                sb.set_free_block_count(f - 1);
            }
            self.write_superblock()?;

            let block_num = gi * self.blocks_per_group + bit;
            let zero = vec![0u8; self.block_size as usize];
            self.write_block(block_num, &zero)?;
            return Ok(block_num);
        }
        Err(KernelError::NoSpace)
    }

    /// Same bug present in the original's `alloc_inode` -- its loop
    /// condition tested `free_block_count` where `free_inode_count` was
    /// clearly meant -- fixed here rather than reproduced.
    fn alloc_inode(&self) -> KernelResult<u32> {
        let _guard = self.inode_bitmap_lock.lock();
        for gi in 0..self.group_count {
            let (free, bitmap_block) = {
                let bgds = self.bgds.lock();
                (bgds[gi as usize].free_inode_count(), bgds[gi as usize].inode_bitmap())
            };
            if free == 0 {
                continue;
            }
            let mut bitmap = vec![0u8; self.block_size as usize];
            self.read_block(bitmap_block, &mut bitmap)?;
            let Some(bit) = find_zero_bit(&bitmap, self.inodes_per_group) else {
                continue;
            };
            set_bit(&mut bitmap, bit);
            self.write_block(bitmap_block, &bitmap)?;

            {
                let mut bgds = self.bgds.lock();
                let f = bgds[gi as usize].free_inode_count();
                bgds[gi as usize].set_free_inode_count(f - 1);
            }
            self.write_bgds()?;
            {
                let mut sb = self.superblock.lock();
                let f = sb.free_inode_count();
                sb.set_free_inode_count(f - 1);
            }
            self.write_superblock()?;

            return Ok(gi * self.inodes_per_group + bit + 1);
        }
        Err(KernelError::NoSpace)
    }

    fn inode_location(&self, inode_num: u32) -> KernelResult<(u32, u32, usize)> {
        let group_idx = (inode_num - 1) / self.inodes_per_group;
        let group_offset = (inode_num - 1) % self.inodes_per_group;
        let inodes_per_block = self.block_size / self.inode_size;
        let block_idx = group_offset / inodes_per_block;
        let byte_offset = (group_offset % inodes_per_block) as usize * self.inode_size as usize;
        if group_idx >= self.group_count {
            return Err(KernelError::InvalidArgument);
        }
        Ok((group_idx, block_idx, byte_offset))
    }

    fn read_inode(&self, inode_num: u32) -> KernelResult<Inode> {
        let (group_idx, block_idx, byte_offset) = self.inode_location(inode_num)?;
        let inode_table = self.bgds.lock()[group_idx as usize].inode_table();
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(inode_table + block_idx, &mut buf)?;
        Ok(Inode::from_bytes(&buf[byte_offset..byte_offset + INODE_SIZE]))
    }

    fn write_inode(&self, inode_num: u32, inode: &Inode) -> KernelResult<()> {
        let (group_idx, block_idx, byte_offset) = self.inode_location(inode_num)?;
        let inode_table = self.bgds.lock()[group_idx as usize].inode_table();
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(inode_table + block_idx, &mut buf)?;
        buf[byte_offset..byte_offset + INODE_SIZE].copy_from_slice(&inode.0);
        self.write_block(inode_table + block_idx, &buf)
    }

    fn read_index_entry(&self, block_num: u32, idx: u32) -> KernelResult<u32> {
        if block_num == 0 {
            return Ok(0);
        }
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(block_num, &mut buf)?;
        let off = (idx * 4) as usize;
        Ok(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()))
    }

    fn write_index_entry(&self, block_num: u32, idx: u32, value: u32) -> KernelResult<()> {
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(block_num, &mut buf)?;
        let off = (idx * 4) as usize;
        buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
        self.write_block(block_num, &buf)
    }

    fn ensure_index_block(&self, inode: &mut Inode, inode_num: u32, pointer_idx: usize) -> KernelResult<u32> {
        let existing = inode.block_pointer(pointer_idx);
        if existing != 0 {
            return Ok(existing);
        }
        let new_block = self.alloc_block()?;
        inode.set_block_pointer(pointer_idx, new_block);
        self.write_inode(inode_num, inode)?;
        Ok(new_block)
    }

    fn ensure_nested_index_block(&self, parent_block: u32, idx: u32) -> KernelResult<u32> {
        let existing = self.read_index_entry(parent_block, idx)?;
        if existing != 0 {
            return Ok(existing);
        }
        let new_block = self.alloc_block()?;
        self.write_index_entry(parent_block, idx, new_block)?;
        Ok(new_block)
    }

    /// Resolves a logical block index to a physical block number through
    /// direct, single-, double- and triple-indirect pointers. One shared
    /// helper replaces the original's three separately unrolled branches
    /// (the original also disagreed with itself at the `block_num == 12`
    /// boundary between its read and write paths; this version can't,
    /// since both paths share the same arithmetic).
    fn get_disk_block_number(&self, inode: &Inode, block_num: u32) -> KernelResult<u32> {
        let p = self.block_size / 4;
        if block_num < disk::DIRECT_BLOCKS {
            return Ok(inode.block_pointer(block_num as usize));
        }
        let rel = block_num - disk::DIRECT_BLOCKS;
        if rel < p {
            return self.read_index_entry(inode.block_pointer(disk::DIRECT_BLOCKS as usize), rel);
        }
        let rel2 = rel - p;
        if rel2 < p * p {
            let idx1 = rel2 / p;
            let idx2 = rel2 % p;
            let l1 = self.read_index_entry(inode.block_pointer(disk::DIRECT_BLOCKS as usize + 1), idx1)?;
            return self.read_index_entry(l1, idx2);
        }
        let rel3 = rel2 - p * p;
        if rel3 < p * p * p {
            let idx1 = rel3 / (p * p);
            let idx2 = (rel3 % (p * p)) / p;
            let idx3 = rel3 % p;
            let l1 = self.read_index_entry(inode.block_pointer(disk::DIRECT_BLOCKS as usize + 2), idx1)?;
            let l2 = self.read_index_entry(l1, idx2)?;
            return self.read_index_entry(l2, idx3);
        }
        Ok(0)
    }

    fn set_disk_block_number(
        &self,
        inode: &mut Inode,
        inode_num: u32,
        block_num: u32,
        disk_block_num: u32,
    ) -> KernelResult<()> {
        let p = self.block_size / 4;
        if block_num < disk::DIRECT_BLOCKS {
            inode.set_block_pointer(block_num as usize, disk_block_num);
            return self.write_inode(inode_num, inode);
        }

        let rel = block_num - disk::DIRECT_BLOCKS;
        if rel < p {
            let l0 = self.ensure_index_block(inode, inode_num, disk::DIRECT_BLOCKS as usize)?;
            return self.write_index_entry(l0, rel, disk_block_num);
        }

        let rel2 = rel - p;
        if rel2 < p * p {
            let idx1 = rel2 / p;
            let idx2 = rel2 % p;
            let l0 = self.ensure_index_block(inode, inode_num, disk::DIRECT_BLOCKS as usize + 1)?;
            let l1 = self.ensure_nested_index_block(l0, idx1)?;
            return self.write_index_entry(l1, idx2, disk_block_num);
        }

        let rel3 = rel2 - p * p;
        if rel3 < p * p * p {
            let idx1 = rel3 / (p * p);
            let idx2 = (rel3 % (p * p)) / p;
            let idx3 = rel3 % p;
            let l0 = self.ensure_index_block(inode, inode_num, disk::DIRECT_BLOCKS as usize + 2)?;
            let l1 = self.ensure_nested_index_block(l0, idx1)?;
            let l2 = self.ensure_nested_index_block(l1, idx2)?;
            return self.write_index_entry(l2, idx3, disk_block_num);
        }

        Err(KernelError::NoSpace)
    }

    fn alloc_inode_block(&self, inode: &mut Inode, inode_num: u32, block_num: u32) -> KernelResult<()> {
        let disk_block = self.alloc_block()?;
        self.set_disk_block_number(inode, inode_num, block_num, disk_block)?;
        let sectors_per_block = self.block_size / 512;
        let needed = (block_num + 1) * sectors_per_block;
        if needed > inode.sector_count() {
            inode.set_sector_count(needed);
        }
        self.write_inode(inode_num, inode)
    }

    fn read_inode_block(&self, inode: &Inode, block_num: u32, buf: &mut [u8]) -> KernelResult<()> {
        let disk_block = self.get_disk_block_number(inode, block_num)?;
        if disk_block == 0 {
            buf.fill(0);
            return Ok(());
        }
        self.read_block(disk_block, buf)
    }

    /// Grows `inode` with newly allocated blocks as needed, then writes
    /// `buf` to `block_num`.
    fn write_inode_block(&self, inode: &mut Inode, inode_num: u32, block_num: u32, buf: &[u8]) -> KernelResult<()> {
        let sectors_per_block = self.block_size / 512;
        while block_num >= inode.sector_count() / sectors_per_block {
            let next = inode.sector_count() / sectors_per_block;
            self.alloc_inode_block(inode, inode_num, next)?;
        }
        let disk_block = self.get_disk_block_number(inode, block_num)?;
        self.write_block(disk_block, buf)
    }

    fn read_range(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> KernelResult<()> {
        let block_size = self.block_size as u64;
        let mut done = 0usize;
        let mut block_num = (offset / block_size) as u32;
        let mut in_block_offset = (offset % block_size) as usize;
        let mut block_buf = vec![0u8; self.block_size as usize];
        while done < buf.len() {
            self.read_inode_block(inode, block_num, &mut block_buf)?;
            let take = (self.block_size as usize - in_block_offset).min(buf.len() - done);
            buf[done..done + take].copy_from_slice(&block_buf[in_block_offset..in_block_offset + take]);
            done += take;
            block_num += 1;
            in_block_offset = 0;
        }
        Ok(())
    }

    fn write_range(&self, inode: &mut Inode, inode_num: u32, offset: u64, buf: &[u8]) -> KernelResult<()> {
        let block_size = self.block_size as u64;
        let mut done = 0usize;
        let mut block_num = (offset / block_size) as u32;
        let mut in_block_offset = (offset % block_size) as usize;
        let mut block_buf = vec![0u8; self.block_size as usize];
        while done < buf.len() {
            let take = (self.block_size as usize - in_block_offset).min(buf.len() - done);
            if take != self.block_size as usize {
                self.read_inode_block(inode, block_num, &mut block_buf)?;
            }
            block_buf[in_block_offset..in_block_offset + take].copy_from_slice(&buf[done..done + take]);
            self.write_inode_block(inode, inode_num, block_num, &block_buf)?;
            done += take;
            block_num += 1;
            in_block_offset = 0;
        }
        Ok(())
    }

    /// Finds room for a new `name` -> `child_inode_num` record in `inode`'s
    /// data blocks: reusing a freed (zero-inode) record of adequate size,
    /// splitting the tail of the last live record in a block, or else
    /// growing the directory by one block.
    fn create_dir_entry(&self, inode: &mut Inode, inode_num: u32, name: &str, child_inode_num: u32) -> KernelResult<()> {
        let needed = padded_entry_len(name.len());
        let block_count = ceil_div(inode.size(), self.block_size).max(1);
        let mut block_buf = vec![0u8; self.block_size as usize];

        for block_num in 0..block_count {
            self.read_inode_block(inode, block_num, &mut block_buf)?;
            let mut pos = 0usize;
            while pos < block_buf.len() {
                let rec_len = DirEntryHeader::rec_len(&block_buf[pos..]) as usize;
                if rec_len == 0 {
                    break;
                }
                let entry_inode = DirEntryHeader::inode(&block_buf[pos..]);
                let real_len = padded_entry_len(DirEntryHeader::name_len(&block_buf[pos..]) as usize);

                if entry_inode == 0 && rec_len >= needed {
                    write_dir_entry(&mut block_buf[pos..pos + rec_len], child_inode_num, rec_len as u16, name);
                    return self.write_inode_block(inode, inode_num, block_num, &block_buf);
                }
                if entry_inode != 0 && rec_len >= real_len + needed {
                    let split_at = pos + real_len;
                    let split_len = rec_len - real_len;
                    DirEntryHeader::set_rec_len(&mut block_buf[pos..], real_len as u16);
                    write_dir_entry(&mut block_buf[split_at..split_at + split_len], child_inode_num, split_len as u16, name);
                    return self.write_inode_block(inode, inode_num, block_num, &block_buf);
                }
                pos += rec_len;
            }
        }

        let new_block_num = block_count;
        block_buf.fill(0);
        write_dir_entry(&mut block_buf, child_inode_num, self.block_size as u16, name);
        self.write_inode_block(inode, inode_num, new_block_num, &block_buf)?;
        inode.set_size(inode.size() + self.block_size);
        self.write_inode(inode_num, inode)
    }

    /// Nth live entry in `inode`'s directory data, skipping "." and ".." --
    /// `vfs::readdir` always synthesizes those itself, so emitting them
    /// here would duplicate them.
    fn readdir_inode(&self, inode: &Inode, idx: usize) -> KernelResult<Option<(u32, String)>> {
        let block_count = ceil_div(inode.size(), self.block_size);
        let mut buf = vec![0u8; self.block_size as usize];
        let mut seen = 0usize;
        for block_num in 0..block_count {
            self.read_inode_block(inode, block_num, &mut buf)?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let rec_len = DirEntryHeader::rec_len(&buf[pos..]) as usize;
                if rec_len == 0 {
                    break;
                }
                let entry_inode = DirEntryHeader::inode(&buf[pos..]);
                if entry_inode != 0 {
                    let name = core::str::from_utf8(DirEntryHeader::name(&buf[pos..])).unwrap_or("");
                    if name != "." && name != ".." {
                        if seen == idx {
                            return Ok(Some((entry_inode, name.to_string())));
                        }
                        seen += 1;
                    }
                }
                pos += rec_len;
            }
        }
        Ok(None)
    }

    fn finddir_in_dir(&self, inode: &Inode, name: &str) -> KernelResult<u32> {
        let block_count = ceil_div(inode.size(), self.block_size);
        let mut buf = vec![0u8; self.block_size as usize];
        for block_num in 0..block_count {
            self.read_inode_block(inode, block_num, &mut buf)?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let rec_len = DirEntryHeader::rec_len(&buf[pos..]) as usize;
                if rec_len == 0 {
                    break;
                }
                let entry_inode = DirEntryHeader::inode(&buf[pos..]);
                if entry_inode != 0 && DirEntryHeader::name(&buf[pos..]) == name.as_bytes() {
                    return Ok(entry_inode);
                }
                pos += rec_len;
            }
        }
        Err(KernelError::NotFound)
    }

    /// Zeroes the matching entry's inode field in place. Does not reclaim
    /// the record's `rec_len` slack or merge it into a neighbor --
    /// `create_dir_entry` already knows how to reuse a zero-inode record of
    /// adequate size, so the space isn't lost, just left for that scan.
    fn remove_dir_entry(&self, inode: &mut Inode, inode_num: u32, name: &str) -> KernelResult<()> {
        let block_count = ceil_div(inode.size(), self.block_size);
        let mut buf = vec![0u8; self.block_size as usize];
        for block_num in 0..block_count {
            self.read_inode_block(inode, block_num, &mut buf)?;
            let mut pos = 0usize;
            while pos < buf.len() {
                let rec_len = DirEntryHeader::rec_len(&buf[pos..]) as usize;
                if rec_len == 0 {
                    break;
                }
                let entry_inode = DirEntryHeader::inode(&buf[pos..]);
                if entry_inode != 0 && DirEntryHeader::name(&buf[pos..]) == name.as_bytes() {
                    DirEntryHeader::set_inode(&mut buf[pos..], 0);
                    return self.write_inode_block(inode, inode_num, block_num, &buf);
                }
                pos += rec_len;
            }
        }
        Err(KernelError::NotFound)
    }

    fn bump_dir_count(&self, inode_num: u32) -> KernelResult<()> {
        let group_idx = (inode_num - 1) / self.inodes_per_group;
        {
            let mut bgds = self.bgds.lock();
            let cur = bgds[group_idx as usize].dir_count();
            bgds[group_idx as usize].set_dir_count(cur + 1);
        }
        self.write_bgds()
    }
}

/// One open EXT2 node, addressed purely by inode number -- unlike
/// [`super::ustar::UstarEntry`] there's no path to go stale, since every
/// lookup walks the directory tree through inode-indexed block reads.
struct Ext2Entry {
    fs: Arc<Ext2Fs>,
    inode_num: u32,
}

impl Ext2Fs {
    fn make_node(self: &Arc<Self>, inode_num: u32, name: &str) -> KernelResult<Arc<FsNode>> {
        let inode = self.read_inode(inode_num)?;
        let kind = if inode.is_dir() {
            NodeKind::Directory
        } else if inode.is_symlink() {
            NodeKind::Symlink
        } else {
            NodeKind::File
        };
        let entry = Arc::new(Ext2Entry { fs: self.clone(), inode_num });
        Ok(FsNode::new(name, kind, inode_num, entry))
    }
}

impl VfsNodeOps for Ext2Entry {
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let _guard = self.fs.ops_lock.lock();
        let inode = self.fs.read_inode(self.inode_num)?;
        let size = inode.size() as u64;
        if offset >= size {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(size - offset) as usize;
        self.fs.read_range(&inode, offset, &mut buf[..n])?;
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        let _guard = self.fs.ops_lock.lock();
        let mut inode = self.fs.read_inode(self.inode_num)?;
        let end = offset + buf.len() as u64;
        if end > inode.size() as u64 {
            inode.set_size(end as u32);
            self.fs.write_inode(self.inode_num, &inode)?;
        }
        self.fs.write_range(&mut inode, self.inode_num, offset, buf)?;
        Ok(buf.len())
    }

    fn readdir(&self, index: usize) -> KernelResult<Option<DirEntry>> {
        let _guard = self.fs.ops_lock.lock();
        let inode = self.fs.read_inode(self.inode_num)?;
        if !inode.is_dir() {
            return Err(KernelError::NotDir);
        }
        Ok(self
            .fs
            .readdir_inode(&inode, index)?
            .map(|(ino, name)| DirEntry { ino, name }))
    }

    fn finddir(&self, name: &str) -> KernelResult<Arc<FsNode>> {
        let _guard = self.fs.ops_lock.lock();
        let inode = self.fs.read_inode(self.inode_num)?;
        let child_inode_num = self.fs.finddir_in_dir(&inode, name)?;
        self.fs.make_node(child_inode_num, name)
    }

    fn mkdir(&self, name: &str) -> KernelResult<Arc<FsNode>> {
        let _guard = self.fs.ops_lock.lock();
        let mut parent_inode = self.fs.read_inode(self.inode_num)?;
        if !parent_inode.is_dir() {
            return Err(KernelError::NotDir);
        }
        if self.fs.finddir_in_dir(&parent_inode, name).is_ok() {
            return Err(KernelError::Exists);
        }

        let child_inode_num = self.fs.alloc_inode()?;
        let mut child = Inode::zeroed();
        child.set_permissions(S_IFDIR | 0o755);
        child.set_hard_link_count(2);
        self.fs.write_inode(child_inode_num, &child)?;

        self.fs.create_dir_entry(&mut parent_inode, self.inode_num, name, child_inode_num)?;
        parent_inode.set_hard_link_count(parent_inode.hard_link_count() + 1);
        self.fs.write_inode(self.inode_num, &parent_inode)?;

        let dot_len = padded_entry_len(1) as u16;
        let mut block = vec![0u8; self.fs.block_size as usize];
        write_dir_entry(&mut block[..dot_len as usize], child_inode_num, dot_len, ".");
        let dotdot_len = self.fs.block_size as u16 - dot_len;
        write_dir_entry(&mut block[dot_len as usize..], self.inode_num, dotdot_len, "..");
        self.fs.write_inode_block(&mut child, child_inode_num, 0, &block)?;
        child.set_size(self.fs.block_size);
        self.fs.write_inode(child_inode_num, &child)?;

        self.fs.bump_dir_count(child_inode_num)?;

        self.fs.make_node(child_inode_num, name)
    }

    fn create(&self, name: &str) -> KernelResult<Arc<FsNode>> {
        let _guard = self.fs.ops_lock.lock();
        let mut parent_inode = self.fs.read_inode(self.inode_num)?;
        if !parent_inode.is_dir() {
            return Err(KernelError::NotDir);
        }
        if self.fs.finddir_in_dir(&parent_inode, name).is_ok() {
            return Err(KernelError::Exists);
        }

        let child_inode_num = self.fs.alloc_inode()?;
        let mut child = Inode::zeroed();
        child.set_permissions(S_IFREG | 0o644);
        child.set_hard_link_count(1);
        self.fs.write_inode(child_inode_num, &child)?;

        self.fs.create_dir_entry(&mut parent_inode, self.inode_num, name, child_inode_num)?;
        self.fs.make_node(child_inode_num, name)
    }

    fn chmod(&self, mode: u32) -> KernelResult<()> {
        let _guard = self.fs.ops_lock.lock();
        let mut inode = self.fs.read_inode(self.inode_num)?;
        let kind_bits = inode.permissions() & S_IFMT;
        inode.set_permissions(kind_bits | (mode as u16 & 0x0FFF));
        self.fs.write_inode(self.inode_num, &inode)
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        let _guard = self.fs.ops_lock.lock();
        let mut parent_inode = self.fs.read_inode(self.inode_num)?;
        let child_inode_num = self.fs.finddir_in_dir(&parent_inode, name)?;
        let mut child_inode = self.fs.read_inode(child_inode_num)?;

        if child_inode.is_dir() && self.fs.readdir_inode(&child_inode, 0)?.is_some() {
            return Err(KernelError::NotEmpty);
        }

        self.fs.remove_dir_entry(&mut parent_inode, self.inode_num, name)?;

        if child_inode.hard_link_count() > 0 {
            child_inode.set_hard_link_count(child_inode.hard_link_count() - 1);
        }
        self.fs.write_inode(child_inode_num, &child_inode)?;

        if child_inode.is_dir() {
            parent_inode.set_hard_link_count(parent_inode.hard_link_count().saturating_sub(1));
            self.fs.write_inode(self.inode_num, &parent_inode)?;
        }

        Ok(())
    }

    fn symlink(&self, name: &str, target: &str) -> KernelResult<()> {
        let _guard = self.fs.ops_lock.lock();
        let mut parent_inode = self.fs.read_inode(self.inode_num)?;
        if self.fs.finddir_in_dir(&parent_inode, name).is_ok() {
            return Err(KernelError::Exists);
        }

        let child_inode_num = self.fs.alloc_inode()?;
        let mut child = Inode::zeroed();
        child.set_permissions(S_IFLNK | 0o660);
        child.set_hard_link_count(1);

        let bytes = target.as_bytes();
        if bytes.len() <= child.block_pointer_bytes().len() {
            child.block_pointer_bytes_mut()[..bytes.len()].copy_from_slice(bytes);
            child.set_size(bytes.len() as u32);
            self.fs.write_inode(child_inode_num, &child)?;
        } else {
            self.fs.write_inode(child_inode_num, &child)?;
            self.fs.write_range(&mut child, child_inode_num, 0, bytes)?;
            child.set_size(bytes.len() as u32);
            self.fs.write_inode(child_inode_num, &child)?;
        }

        self.fs.create_dir_entry(&mut parent_inode, self.inode_num, name, child_inode_num)
    }

    fn readlink(&self, buf: &mut [u8]) -> KernelResult<usize> {
        let _guard = self.fs.ops_lock.lock();
        let inode = self.fs.read_inode(self.inode_num)?;
        let size = inode.size() as usize;
        let n = size.min(buf.len());
        if inode.size() as usize <= inode.block_pointer_bytes().len() {
            buf[..n].copy_from_slice(&inode.block_pointer_bytes()[..n]);
        } else {
            self.fs.read_range(&inode, 0, &mut buf[..n])?;
        }
        Ok(n)
    }

    /// Refuses to replace an existing `new`, matching the original's
    /// explicit choice not to implement POSIX rename-replaces-target
    /// semantics for this filesystem.
    fn rename(&self, old: &str, new: &str) -> KernelResult<()> {
        let _guard = self.fs.ops_lock.lock();
        let mut parent_inode = self.fs.read_inode(self.inode_num)?;
        let child_inode_num = self.fs.finddir_in_dir(&parent_inode, old)?;
        if self.fs.finddir_in_dir(&parent_inode, new).is_ok() {
            return Err(KernelError::Exists);
        }
        self.fs.remove_dir_entry(&mut parent_inode, self.inode_num, old)?;
        self.fs.create_dir_entry(&mut parent_inode, self.inode_num, new, child_inode_num)
    }

    fn size(&self) -> u64 {
        self.fs.read_inode(self.inode_num).map(|i| i.size() as u64).unwrap_or(0)
    }

    fn truncate(&self, len: u64) -> KernelResult<()> {
        let _guard = self.fs.ops_lock.lock();
        let mut inode = self.fs.read_inode(self.inode_num)?;
        inode.set_size(len as u32);
        self.fs.write_inode(self.inode_num, &inode)
    }
}

/// Formats a fresh single-group filesystem on `device`: superblock, one
/// block-group descriptor, block and inode bitmaps, an inode table sized
/// for `inode_count` inodes, and a root directory holding just "." and
/// "..". `total_blocks` and `inode_count` must each fit in one 1024-byte
/// bitmap block (8192 entries) -- this backend only ever produces images
/// meant to be bundled with the kernel image, not arbitrarily large disks.
pub fn format(device: &Arc<FsNode>, total_blocks: u32, inode_count: u32) -> KernelResult<()> {
    let block_size = 1024u32;
    let bits_per_block = block_size * 8;
    if total_blocks > bits_per_block || inode_count > bits_per_block {
        return Err(KernelError::InvalidArgument);
    }

    let bgd_start = 2u32;
    let bgd_block_count = 1u32;
    let block_bitmap_block = bgd_start + bgd_block_count;
    let inode_bitmap_block = block_bitmap_block + 1;
    let inode_table_blocks = ceil_div(inode_count * INODE_SIZE as u32, block_size);
    let inode_table_block = inode_bitmap_block + 1;
    let first_data_block = inode_table_block + inode_table_blocks;

    if first_data_block + 1 > total_blocks {
        return Err(KernelError::NoSpace);
    }

    let free_blocks = total_blocks - first_data_block - 1;

    let mut sb = Superblock::zeroed();
    sb.set_inode_count(inode_count);
    sb.set_block_count(total_blocks);
    sb.set_free_block_count(free_blocks);
    sb.set_free_inode_count(inode_count - 2);
    sb.set_block_size_offset(0);
    sb.set_blocks_per_group(total_blocks);
    sb.set_inodes_per_group(inode_count);
    sb.set_magic();
    sb.set_inode_size(INODE_SIZE as u16);
    let n = device.ops.write(1024, &sb.0)?;
    if n != disk::SUPERBLOCK_SIZE {
        return Err(KernelError::Io);
    }

    let mut bgd = Bgd::zeroed();
    bgd.set_block_bitmap(block_bitmap_block);
    bgd.set_inode_bitmap(inode_bitmap_block);
    bgd.set_inode_table(inode_table_block);
    bgd.set_free_block_count(free_blocks);
    bgd.set_free_inode_count(inode_count - 2);
    bgd.set_dir_count(1);
    let mut bgd_block_buf = vec![0u8; block_size as usize];
    bgd_block_buf[..BGD_SIZE].copy_from_slice(&bgd.0);
    write_raw_block(device, block_size, bgd_start, &bgd_block_buf)?;

    let mut block_bitmap = vec![0u8; block_size as usize];
    for b in 0..=first_data_block {
        set_bit(&mut block_bitmap, b);
    }
    write_raw_block(device, block_size, block_bitmap_block, &block_bitmap)?;

    let mut inode_bitmap = vec![0u8; block_size as usize];
    set_bit(&mut inode_bitmap, 0);
    set_bit(&mut inode_bitmap, 1);
    write_raw_block(device, block_size, inode_bitmap_block, &inode_bitmap)?;

    let mut table = vec![0u8; (inode_table_blocks * block_size) as usize];
    let mut root = Inode::zeroed();
    root.set_permissions(S_IFDIR | 0o755);
    root.set_hard_link_count(2);
    root.set_size(block_size);
    root.set_block_pointer(0, first_data_block);
    root.set_sector_count(block_size / 512);
    table[INODE_SIZE..INODE_SIZE * 2].copy_from_slice(&root.0);
    for i in 0..inode_table_blocks {
        let off = (i * block_size) as usize;
        write_raw_block(device, block_size, inode_table_block + i, &table[off..off + block_size as usize])?;
    }

    let mut root_block = vec![0u8; block_size as usize];
    let dot_len = padded_entry_len(1) as u16;
    write_dir_entry(&mut root_block[..dot_len as usize], ROOT_INODE, dot_len, ".");
    let dotdot_len = block_size as u16 - dot_len;
    write_dir_entry(&mut root_block[dot_len as usize..], ROOT_INODE, dotdot_len, "..");
    write_raw_block(device, block_size, first_data_block, &root_block)?;

    Ok(())
}

/// Default-sized [`format`] for booting a blank ramdisk: 2000 blocks
/// (~2 MiB at the 1 KiB block size `format` always uses) and 512 inodes.
pub fn format_blank(device: &Arc<FsNode>) -> KernelResult<()> {
    format(device, 2000, 512)
}

fn write_raw_block(device: &Arc<FsNode>, block_size: u32, block_num: u32, buf: &[u8]) -> KernelResult<()> {
    let offset = block_size as u64 * block_num as u64;
    let n = device.ops.write(offset, buf)?;
    if n != buf.len() {
        return Err(KernelError::Io);
    }
    Ok(())
}

/// Mounts the EXT2 image on `device` at `mount_path`, reading its
/// superblock at the fixed byte offset 1024.
pub fn mount(device: Arc<FsNode>, mount_path: &str) -> KernelResult<()> {
    let fs = Arc::new(Ext2Fs::open(device)?);
    let entry = Arc::new(Ext2Entry { fs, inode_num: ROOT_INODE });
    let root = FsNode::new_mount("ext2", NodeKind::Directory, ROOT_INODE, entry);
    super::vfs::mount(root, mount_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramdisk;

    fn formatted_device() -> Arc<FsNode> {
        let dev = ramdisk::new_device(&[]);
        format(&dev, 512, 64).unwrap();
        dev
    }

    fn mounted_root() -> Ext2Entry {
        let fs = Arc::new(Ext2Fs::open(formatted_device()).unwrap());
        Ext2Entry { fs, inode_num: ROOT_INODE }
    }

    #[test]
    fn create_write_read_roundtrip() {
        let root = mounted_root();
        let node = root.create("greeting").unwrap();
        assert_eq!(node.ops.write(0, b"hello, ext2").unwrap(), 11);
        let mut buf = [0u8; 11];
        assert_eq!(node.ops.read(0, &mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello, ext2");
    }

    #[test]
    fn write_spans_multiple_blocks_and_indirect_pointers() {
        let root = mounted_root();
        let node = root.create("big").unwrap();
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(node.ops.write(0, &payload).unwrap(), payload.len());
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(node.ops.read(0, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn mkdir_then_readdir_lists_children_without_dot_entries() {
        let root = mounted_root();
        root.mkdir("sub").unwrap();
        root.create("top").unwrap();

        let mut names = Vec::new();
        let mut i = 0;
        while let Some(e) = root.readdir(i).unwrap() {
            names.push(e.name);
            i += 1;
        }
        names.sort();
        assert_eq!(names, alloc::vec![String::from("sub"), String::from("top")]);
    }

    #[test]
    fn unlink_nonempty_directory_fails() {
        let root = mounted_root();
        let sub_node = root.mkdir("sub").unwrap();
        let sub = Ext2Entry { fs: root.fs.clone(), inode_num: sub_node.inode };
        sub.create("file").unwrap();
        assert_eq!(root.unlink("sub").unwrap_err(), KernelError::NotEmpty);
    }

    #[test]
    fn unlink_then_lookup_fails_but_space_is_not_reclaimed() {
        let root = mounted_root();
        root.create("temp").unwrap();
        root.unlink("temp").unwrap();
        assert_eq!(root.finddir("temp").unwrap_err(), KernelError::NotFound);
    }

    #[test]
    fn symlink_readlink_roundtrip_short_and_long() {
        let root = mounted_root();
        root.symlink("short", "/bin/sh").unwrap();
        let node = root.finddir("short").unwrap();
        let mut buf = [0u8; 32];
        let n = node.ops.readlink(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"/bin/sh");

        let long_target = "a".repeat(100);
        root.symlink("long", &long_target).unwrap();
        let node = root.finddir("long").unwrap();
        let mut buf = vec![0u8; 100];
        let n = node.ops.readlink(&mut buf).unwrap();
        assert_eq!(n, 100);
        assert_eq!(core::str::from_utf8(&buf).unwrap(), long_target);
    }

    #[test]
    fn rename_refuses_to_replace_existing_target() {
        let root = mounted_root();
        root.create("a").unwrap();
        root.create("b").unwrap();
        assert_eq!(root.rename("a", "b").unwrap_err(), KernelError::Exists);
        root.rename("a", "c").unwrap();
        assert_eq!(root.finddir("a").unwrap_err(), KernelError::NotFound);
        assert!(root.finddir("c").is_ok());
    }
}
