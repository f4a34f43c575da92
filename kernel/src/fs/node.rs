//! Filesystem node: represents an opened path anywhere
//! in the VFS mount tree. Behavioral dispatch (`read`/`write`/`finddir`/...)
//! goes through a trait object so USTAR, EXT2 and pipes share one node
//! shape; the non-behavioral bookkeeping fields (name, size, type, owner,
//! timestamps, tree linkage) live directly on [`FsNode`].

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::FS_NAME_LEN;
use crate::error::KernelResult;

bitflags::bitflags! {
    /// Open-flag bit values, carried verbatim from the original syscall ABI
    /// so user/kernel agree on the numeric encoding.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct OpenFlags: u32 {
        const RDONLY    = 0;
        const WRONLY    = 1;
        const RDWR      = 2;
        const APPEND    = 0x8;
        const CREAT     = 0x200;
        const TRUNC     = 0x400;
        const EXCL      = 0x800;
        const NOFOLLOW  = 0x1000;
        const PATH      = 0x2000;
        const NONBLOCK  = 0x4000;
        const DIRECTORY = 0x8000;
    }
}

impl OpenFlags {
    pub fn writable(self) -> bool {
        self.bits() & 0x3 != Self::RDONLY.bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
    Block,
    Pipe,
}

/// A directory entry as returned by `readdir`.
#[derive(Clone)]
pub struct DirEntry {
    pub ino: u32,
    pub name: String,
}

pub const DIRENT_NAME_LEN: usize = 256;

/// On-wire `dirent` record matching the syscall ABI exactly.
#[repr(C)]
pub struct RawDirent {
    pub ino: u32,
    pub name: [u8; DIRENT_NAME_LEN],
}

/// Behavioral vtable every backend (USTAR, EXT2, pipe, VFS directory shim)
/// implements. One object per open node instance, keeping the
/// "vtable" description of `fs_node`.
pub trait VfsNodeOps: Send + Sync {
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize>;
    fn write(&self, offset: u64, buf: &[u8]) -> KernelResult<usize>;
    fn readdir(&self, index: usize) -> KernelResult<Option<DirEntry>>;
    fn finddir(&self, name: &str) -> KernelResult<Arc<FsNode>>;
    fn mkdir(&self, name: &str) -> KernelResult<Arc<FsNode>>;
    fn create(&self, name: &str) -> KernelResult<Arc<FsNode>>;
    fn chmod(&self, mode: u32) -> KernelResult<()>;
    fn unlink(&self, name: &str) -> KernelResult<()>;
    fn symlink(&self, name: &str, target: &str) -> KernelResult<()>;
    fn readlink(&self, buf: &mut [u8]) -> KernelResult<usize>;
    fn rename(&self, old: &str, new: &str) -> KernelResult<()>;
    fn size(&self) -> u64;

    /// Shrinks or grows a file to exactly `len` bytes. Most backends have no
    /// use for it (directories, devices, pipes); the default rejects it
    /// rather than forcing every `VfsNodeOps` impl to spell out a no-op.
    fn truncate(&self, _len: u64) -> KernelResult<()> {
        Err(crate::error::KernelError::NotSupported)
    }
}

/// A mount-tree position: children of a mount node's `tree_node` are
/// sub-mounts.
pub struct TreeNode {
    pub parent: Mutex<Option<Arc<FsNode>>>,
    pub children: Mutex<Vec<Arc<FsNode>>>,
}

impl TreeNode {
    pub fn new() -> Self {
        Self {
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }
    }
}

impl Default for TreeNode {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FsNode {
    pub name: Mutex<String>,
    pub kind: NodeKind,
    pub inode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: Mutex<u32>,
    pub atime: Mutex<u64>,
    pub mtime: Mutex<u64>,
    pub ctime: Mutex<u64>,
    /// Non-`None` iff this node is a VFS mount point.
    pub tree_node: Option<TreeNode>,
    pub ops: Arc<dyn VfsNodeOps>,
}

impl FsNode {
    pub fn new(name: &str, kind: NodeKind, inode: u32, ops: Arc<dyn VfsNodeOps>) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(truncate_name(name)),
            kind,
            inode,
            uid: 0,
            gid: 0,
            mode: Mutex::new(0o755),
            atime: Mutex::new(0),
            mtime: Mutex::new(0),
            ctime: Mutex::new(0),
            tree_node: None,
            ops,
        })
    }

    pub fn new_mount(name: &str, kind: NodeKind, inode: u32, ops: Arc<dyn VfsNodeOps>) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(truncate_name(name)),
            kind,
            inode,
            uid: 0,
            gid: 0,
            mode: Mutex::new(0o755),
            atime: Mutex::new(0),
            mtime: Mutex::new(0),
            ctime: Mutex::new(0),
            tree_node: Some(TreeNode::new()),
            ops,
        })
    }

    pub fn is_mount(&self) -> bool {
        self.tree_node.is_some()
    }
}

fn truncate_name(name: &str) -> String {
    let mut s = String::from(name);
    s.truncate(FS_NAME_LEN - 1);
    s
}

/// Per-process open-file record: a refcounted
/// snapshot of the opened node plus a file offset, shared by every PCB
/// slot that points at it (`dup`, `fork`, `movefd`).
pub struct FdSlot {
    pub node: Arc<FsNode>,
    pub offset: u64,
    pub flags: OpenFlags,
    pub refcount: u32,
}

impl FdSlot {
    pub fn new(node: Arc<FsNode>, flags: OpenFlags) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            node,
            offset: 0,
            flags,
            refcount: 1,
        }))
    }
}
