//! Filesystem syscalls: `open`, `close`, `read`, `write`, `readdir`,
//! `chmod`, `readlink`, `unlink`, `symlink`, `mkdir`, `pipe`, `movefd`,
//! `chdir`, `getcwd`, `fstat`, `lstat`, `lseek`, `dup`, `rename`, `resolve`.
//!
//! Every path argument is a user pointer read with [`uaccess::read_cstr`];
//! every fd argument indexes the calling process's own `fds` table, which
//! lives in kernel memory, so no cross-address-space access is needed here.

use alloc::sync::Arc;

use crate::config::MAX_PROCESS_FDS;
use crate::error::{KernelError, KernelResult};
use crate::fs::node::{FdSlot, FsNode, NodeKind, OpenFlags, RawDirent, DIRENT_NAME_LEN};
use crate::fs::{self, vfs};
use crate::process::pcb::Pid;
use crate::process::table;
use crate::syscall::uaccess;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFIFO: u32 = 0o010000;

/// On-wire `stat` record, field layout and sizes carried over from the
/// reference libc's `struct stat`.
#[repr(C)]
struct RawStat {
    st_dev: u16,
    st_ino: u16,
    st_mode: u32,
    st_nlink: u16,
    st_uid: u16,
    st_gid: u16,
    st_rdev: u16,
    st_size: i32,
    st_atime: u32,
    _unused1: u32,
    st_mtime: i32,
    _unused2: u32,
    st_ctime: u32,
    _unused3: u32,
    st_blksize: u32,
    st_blocks: u32,
}

fn kind_mode_bits(kind: NodeKind) -> u32 {
    match kind {
        NodeKind::File | NodeKind::Block => S_IFREG,
        NodeKind::Directory => S_IFDIR,
        NodeKind::Symlink => S_IFLNK,
        NodeKind::Pipe => S_IFIFO,
    }
}

fn fill_stat(node: &Arc<FsNode>) -> RawStat {
    RawStat {
        st_dev: 0,
        st_ino: node.inode as u16,
        st_mode: *node.mode.lock() | kind_mode_bits(node.kind),
        st_nlink: 1,
        st_uid: node.uid as u16,
        st_gid: node.gid as u16,
        st_rdev: 0,
        st_size: node.ops.size() as i32,
        st_atime: *node.atime.lock() as u32,
        _unused1: 0,
        st_mtime: *node.mtime.lock() as i32,
        _unused2: 0,
        st_ctime: *node.ctime.lock() as u32,
        _unused3: 0,
        st_blksize: 1024,
        st_blocks: 0,
    }
}

fn cwd_of(current: Pid) -> KernelResult<alloc::string::String> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    Ok(pcb.wd.lock().clone())
}

fn alloc_fd(current: Pid, slot: Arc<spin::Mutex<FdSlot>>) -> KernelResult<usize> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    let mut fds = pcb.fds.lock();
    for (i, entry) in fds.iter_mut().enumerate() {
        if entry.is_none() {
            *entry = Some(slot);
            return Ok(i);
        }
    }
    Err(KernelError::TooManyOpenFiles)
}

fn fd_slot(current: Pid, fdnum: u32) -> KernelResult<Arc<spin::Mutex<FdSlot>>> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    let fds = pcb.fds.lock();
    fds.get(fdnum as usize)
        .and_then(|e| e.clone())
        .ok_or(KernelError::BadFd)
}

pub fn open(current: Pid, path_ptr: u32, flags_raw: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let flags = OpenFlags::from_bits_truncate(flags_raw);
    let cwd = cwd_of(current)?;
    let node = fs::open(&cwd, &path, flags)?;
    let slot = FdSlot::new(node, flags);
    Ok(alloc_fd(current, slot)? as i32)
}

pub fn close(current: Pid, fdnum: u32) -> KernelResult<i32> {
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    let mut fds = pcb.fds.lock();
    let entry = fds.get_mut(fdnum as usize).ok_or(KernelError::BadFd)?;
    if entry.take().is_none() {
        return Err(KernelError::BadFd);
    }
    Ok(0)
}

pub fn read(current: Pid, fdnum: u32, buf_ptr: u32, len: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    let mut slot = slot.lock();
    if !slot.flags.contains(OpenFlags::RDWR) && slot.flags.writable() {
        return Err(KernelError::BadFd);
    }
    let buf = unsafe { uaccess::user_slice_mut(buf_ptr, len) }?;
    let n = slot.node.ops.read(slot.offset, buf)?;
    slot.offset += n as u64;
    Ok(n as i32)
}

pub fn write(current: Pid, fdnum: u32, buf_ptr: u32, len: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    let mut slot = slot.lock();
    if !slot.flags.writable() {
        return Err(KernelError::BadFd);
    }
    let buf = unsafe { uaccess::user_slice(buf_ptr, len) }?;
    let n = slot.node.ops.write(slot.offset, buf)?;
    slot.offset += n as u64;
    Ok(n as i32)
}

pub fn readdir(current: Pid, fdnum: u32, index: u32, dirent_ptr: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    let slot = slot.lock();
    let Some(entry) = slot.node.ops.readdir(index as usize)? else {
        return Ok(0);
    };
    let mut raw = RawDirent {
        ino: entry.ino,
        name: [0u8; DIRENT_NAME_LEN],
    };
    let bytes = entry.name.as_bytes();
    let n = bytes.len().min(DIRENT_NAME_LEN - 1);
    raw.name[..n].copy_from_slice(&bytes[..n]);
    let out = unsafe {
        uaccess::user_slice_mut(dirent_ptr, core::mem::size_of::<RawDirent>() as u32)
    }?;
    // SAFETY: `out` is exactly `size_of::<RawDirent>()` bytes, just checked.
    unsafe { core::ptr::write(out.as_mut_ptr() as *mut RawDirent, raw) };
    Ok(1)
}

pub fn chmod(current: Pid, fdnum: u32, mode: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    slot.lock().node.ops.chmod(mode)?;
    Ok(0)
}

pub fn readlink(current: Pid, path_ptr: u32, buf_ptr: u32, len: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let cwd = cwd_of(current)?;
    let node = vfs::resolve(&cwd, &path, OpenFlags::NOFOLLOW)?;
    let buf = unsafe { uaccess::user_slice_mut(buf_ptr, len) }?;
    Ok(node.ops.readlink(buf)? as i32)
}

pub fn unlink(current: Pid, path_ptr: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let cwd = cwd_of(current)?;
    fs::unlink(&cwd, &path)?;
    Ok(0)
}

pub fn symlink(current: Pid, target_ptr: u32, link_ptr: u32) -> KernelResult<i32> {
    let target = unsafe { uaccess::read_cstr(target_ptr) }?;
    let link_path = unsafe { uaccess::read_cstr(link_ptr) }?;
    let cwd = cwd_of(current)?;
    fs::symlink(&cwd, &target, &link_path)?;
    Ok(0)
}

pub fn mkdir(current: Pid, path_ptr: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let cwd = cwd_of(current)?;
    fs::mkdir(&cwd, &path)?;
    Ok(0)
}

/// `pipe` syscall: installs both ends into two fresh fds atomically,
/// rolling back the read end if the write end has no free slot.
pub fn pipe(current: Pid, fds_out_ptr: u32) -> KernelResult<i32> {
    let (read_end, write_end) = fs::pipe::open_pair();
    let read_slot = FdSlot::new(read_end, OpenFlags::RDONLY);
    let write_slot = FdSlot::new(write_end, OpenFlags::WRONLY);

    let read_fd = alloc_fd(current, read_slot)?;
    let write_fd = match alloc_fd(current, write_slot) {
        Ok(fd) => fd,
        Err(e) => {
            close(current, read_fd as u32)?;
            return Err(e);
        }
    };

    unsafe {
        uaccess::write_u32(fds_out_ptr, read_fd as u32)?;
        uaccess::write_u32(fds_out_ptr + 4, write_fd as u32)?;
    }
    Ok(0)
}

pub fn movefd(current: Pid, src_fd: u32, dst_fd: u32) -> KernelResult<i32> {
    if src_fd as usize >= MAX_PROCESS_FDS || dst_fd as usize >= MAX_PROCESS_FDS {
        return Err(KernelError::BadFd);
    }
    let slot = fd_slot(current, src_fd)?;
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    let mut fds = pcb.fds.lock();
    fds[dst_fd as usize] = Some(slot);
    fds[src_fd as usize] = None;
    Ok(dst_fd as i32)
}

pub fn chdir(current: Pid, path_ptr: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let cwd = cwd_of(current)?;
    let node = vfs::resolve(&cwd, &path, OpenFlags::DIRECTORY)?;
    if node.kind != NodeKind::Directory {
        return Err(KernelError::NotDir);
    }
    let segments = fs::path::canonicalize(&cwd, &path);
    let pcb = table::get(current).ok_or(KernelError::NoSuchProcess)?;
    *pcb.wd.lock() = fs::path::to_absolute(&segments);
    Ok(0)
}

pub fn getcwd(current: Pid, buf_ptr: u32, len: u32) -> KernelResult<i32> {
    let cwd = cwd_of(current)?;
    let bytes = cwd.as_bytes();
    if bytes.len() + 1 > len as usize {
        return Err(KernelError::NameTooLong);
    }
    let buf = unsafe { uaccess::user_slice_mut(buf_ptr, len) }?;
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    Ok(bytes.len() as i32)
}

pub fn fstat(current: Pid, fdnum: u32, stat_ptr: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    let raw = fill_stat(&slot.lock().node);
    let out = unsafe { uaccess::user_slice_mut(stat_ptr, core::mem::size_of::<RawStat>() as u32) }?;
    unsafe { core::ptr::write(out.as_mut_ptr() as *mut RawStat, raw) };
    Ok(0)
}

pub fn lstat(current: Pid, path_ptr: u32, stat_ptr: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let cwd = cwd_of(current)?;
    let node = vfs::resolve(&cwd, &path, OpenFlags::NOFOLLOW)?;
    let raw = fill_stat(&node);
    let out = unsafe { uaccess::user_slice_mut(stat_ptr, core::mem::size_of::<RawStat>() as u32) }?;
    unsafe { core::ptr::write(out.as_mut_ptr() as *mut RawStat, raw) };
    Ok(0)
}

pub fn lseek(current: Pid, fdnum: u32, offset: i32, whence: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    let mut slot = slot.lock();
    let size = slot.node.ops.size();
    let base: i64 = match whence {
        0 => 0,                    // SEEK_SET
        1 => slot.offset as i64,   // SEEK_CUR
        2 => size as i64,          // SEEK_END
        _ => return Err(KernelError::InvalidArgument),
    };
    let new_offset = base + offset as i64;
    if new_offset < 0 {
        return Err(KernelError::InvalidArgument);
    }
    slot.offset = new_offset as u64;
    Ok(slot.offset as i32)
}

pub fn dup(current: Pid, fdnum: u32) -> KernelResult<i32> {
    let slot = fd_slot(current, fdnum)?;
    slot.lock().refcount += 1;
    Ok(alloc_fd(current, slot)? as i32)
}

pub fn rename(current: Pid, from_ptr: u32, to_ptr: u32) -> KernelResult<i32> {
    let from = unsafe { uaccess::read_cstr(from_ptr) }?;
    let to = unsafe { uaccess::read_cstr(to_ptr) }?;
    let cwd = cwd_of(current)?;
    fs::rename(&cwd, &from, &to)?;
    Ok(0)
}

/// `resolve` syscall: resolves `path` against the caller's working
/// directory and writes the canonical absolute path back into the
/// caller-supplied buffer, following symlinks the same way `open` would.
pub fn resolve(current: Pid, path_ptr: u32, buf_ptr: u32, len: u32) -> KernelResult<i32> {
    let path = unsafe { uaccess::read_cstr(path_ptr) }?;
    let cwd = cwd_of(current)?;
    vfs::resolve(&cwd, &path, OpenFlags::RDONLY)?;
    let segments = fs::path::canonicalize(&cwd, &path);
    let absolute = fs::path::to_absolute(&segments);
    let bytes = absolute.as_bytes();
    if bytes.len() + 1 > len as usize {
        return Err(KernelError::NameTooLong);
    }
    let buf = unsafe { uaccess::user_slice_mut(buf_ptr, len) }?;
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    Ok(bytes.len() as i32)
}
