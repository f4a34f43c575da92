//! Mount tree and path resolution.
//!
//! The VFS is a rooted tree of [`FsNode`]s; every node with children is a
//! mount point (`tree_node.is_some()`), following the rule that "children of a
//! mount node's tree-node are sub-mounts." `mount()` synthesizes trivial
//! empty-directory nodes for any intermediate path component that doesn't
//! exist yet, so the whole tree is built purely out of mount points -- there
//! is no separate "plain VFS directory" backend.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Once;

use super::node::{DirEntry, FsNode, NodeKind, OpenFlags, VfsNodeOps};
use super::path;
use crate::error::{KernelError, KernelResult};

/// Backend for synthetic intermediate mount directories: carries no content
/// of its own, every child comes from the tree-node's children list.
struct EmptyDir;

impl VfsNodeOps for EmptyDir {
    fn read(&self, _offset: u64, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::IsDir)
    }
    fn write(&self, _offset: u64, _buf: &[u8]) -> KernelResult<usize> {
        Err(KernelError::IsDir)
    }
    fn readdir(&self, _index: usize) -> KernelResult<Option<DirEntry>> {
        Ok(None)
    }
    fn finddir(&self, _name: &str) -> KernelResult<Arc<FsNode>> {
        Err(KernelError::NotFound)
    }
    fn mkdir(&self, _name: &str) -> KernelResult<Arc<FsNode>> {
        Err(KernelError::NotSupported)
    }
    fn create(&self, _name: &str) -> KernelResult<Arc<FsNode>> {
        Err(KernelError::NotSupported)
    }
    fn chmod(&self, _mode: u32) -> KernelResult<()> {
        Ok(())
    }
    fn unlink(&self, _name: &str) -> KernelResult<()> {
        Err(KernelError::NotFound)
    }
    fn symlink(&self, _name: &str, _target: &str) -> KernelResult<()> {
        Err(KernelError::NotSupported)
    }
    fn readlink(&self, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::InvalidArgument)
    }
    fn rename(&self, _old: &str, _new: &str) -> KernelResult<()> {
        Err(KernelError::NotFound)
    }
    fn size(&self) -> u64 {
        0
    }
}

static ROOT: Once<Arc<FsNode>> = Once::new();

fn next_synthetic_inode() -> u32 {
    use core::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Builds the empty root mount. Called once from `bootstrap::kmain`.
pub fn init() {
    ROOT.call_once(|| FsNode::new_mount("/", NodeKind::Directory, 0, Arc::new(EmptyDir)));
    log::info!(target: "vfs", "mount tree initialized");
}

pub fn root() -> Arc<FsNode> {
    ROOT.get().expect("vfs not initialized").clone()
}

/// Attaches `node` at `path`, creating empty intermediate mount
/// directories as needed.
pub fn mount(node: Arc<FsNode>, path: &str) -> KernelResult<()> {
    let segments = path::canonicalize("/", path);
    if segments.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    let mut current = root();
    for seg in &segments[..segments.len() - 1] {
        current = find_or_create_dir(&current, seg)?;
    }
    let leaf_name = segments.last().unwrap();
    attach_child(&current, leaf_name, node)
}

fn find_or_create_dir(parent: &Arc<FsNode>, name: &str) -> KernelResult<Arc<FsNode>> {
    let Some(tree) = &parent.tree_node else {
        return Err(KernelError::NotDir);
    };
    {
        let children = tree.children.lock();
        if let Some(existing) = children.iter().find(|c| *c.name.lock() == name) {
            return Ok(existing.clone());
        }
    }
    let dir = FsNode::new_mount(name, NodeKind::Directory, next_synthetic_inode(), Arc::new(EmptyDir));
    attach_child(parent, name, dir.clone())?;
    Ok(dir)
}

fn attach_child(parent: &Arc<FsNode>, name: &str, child: Arc<FsNode>) -> KernelResult<()> {
    let Some(tree) = &parent.tree_node else {
        return Err(KernelError::NotDir);
    };
    let mut children = tree.children.lock();
    if children.iter().any(|c| *c.name.lock() == name) {
        return Err(KernelError::Exists);
    }
    if let Some(child_tree) = &child.tree_node {
        *child_tree.parent.lock() = Some(parent.clone());
    }
    children.push(child);
    Ok(())
}

/// Resolves `path` (relative to `cwd`) to a node, following symlinks unless
/// `nofollow` is set, restarting resolution from the link target on follow
///. Bounded symlink-follow count guards against loops.
pub fn resolve(cwd: &str, path: &str, flags: OpenFlags) -> KernelResult<Arc<FsNode>> {
    resolve_inner(cwd, path, flags, 0)
}

fn resolve_inner(cwd: &str, path: &str, flags: OpenFlags, depth: u32) -> KernelResult<Arc<FsNode>> {
    if depth > 16 {
        return Err(KernelError::TooManyLinks);
    }
    let segments = path::canonicalize(cwd, path);
    let mut node = root();
    for (i, seg) in segments.iter().enumerate() {
        node = find_in_mount_chain(&node, seg)?;
        let is_last = i == segments.len() - 1;
        if node.kind == NodeKind::Symlink && (!is_last || !flags.contains(OpenFlags::NOFOLLOW)) {
            let mut buf = [0u8; 256];
            let n = node.ops.readlink(&mut buf)?;
            let target = core::str::from_utf8(&buf[..n])
                .map_err(|_| KernelError::InvalidArgument)?
                .to_string();
            let rest: String = segments[i + 1..].iter().fold(String::new(), |mut acc, s| {
                acc.push('/');
                acc.push_str(s);
                acc
            });
            let restarted = format!("{}{}", target, rest);
            return resolve_inner("/", &restarted, flags, depth + 1);
        }
    }
    Ok(node)
}

/// Looks up `name` under `dir`, walking to the deepest mount if `dir` is a
/// mount point (its own children take priority over backend entries),
/// falling back to the node's own `finddir`.
fn find_in_mount_chain(dir: &Arc<FsNode>, name: &str) -> KernelResult<Arc<FsNode>> {
    if let Some(tree) = &dir.tree_node {
        let children = tree.children.lock();
        if let Some(child) = children.iter().find(|c| *c.name.lock() == name) {
            return Ok(child.clone());
        }
    }
    dir.ops.finddir(name)
}

/// Composes `.`, `..`, submount children, then backend entries for `dir`
///.
pub fn readdir(dir: &Arc<FsNode>) -> KernelResult<Vec<DirEntry>> {
    let mut out = Vec::new();
    out.push(DirEntry {
        ino: dir.inode,
        name: String::from("."),
    });
    let parent_ino = dir
        .tree_node
        .as_ref()
        .and_then(|t| t.parent.lock().as_ref().map(|p| p.inode))
        .unwrap_or(dir.inode);
    out.push(DirEntry {
        ino: parent_ino,
        name: String::from(".."),
    });

    if let Some(tree) = &dir.tree_node {
        for child in tree.children.lock().iter() {
            out.push(DirEntry {
                ino: child.inode,
                name: child.name.lock().clone(),
            });
        }
    }

    let mut index = 0;
    while let Some(entry) = dir.ops.readdir(index)? {
        out.push(entry);
        index += 1;
    }
    Ok(out)
}

/// `mkdir`/`create` on `dir`'s backend, failing if a submount already uses
/// that name.
pub fn mkdir(dir: &Arc<FsNode>, name: &str) -> KernelResult<Arc<FsNode>> {
    if let Some(tree) = &dir.tree_node {
        if tree.children.lock().iter().any(|c| *c.name.lock() == name) {
            return Err(KernelError::Exists);
        }
    }
    dir.ops.mkdir(name)
}

pub fn create(dir: &Arc<FsNode>, name: &str) -> KernelResult<Arc<FsNode>> {
    if let Some(tree) = &dir.tree_node {
        if tree.children.lock().iter().any(|c| *c.name.lock() == name) {
            return Err(KernelError::Exists);
        }
    }
    dir.ops.create(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_root() -> Arc<FsNode> {
        FsNode::new_mount("/", NodeKind::Directory, 0, Arc::new(EmptyDir))
    }

    #[test]
    fn mount_creates_intermediate_directories() {
        let root = fresh_root();
        let leaf = FsNode::new_mount("data", NodeKind::Directory, 5, Arc::new(EmptyDir));
        let a = find_or_create_dir(&root, "a").unwrap();
        attach_child(&a, "data", leaf.clone()).unwrap();
        let found = find_in_mount_chain(&a, "data").unwrap();
        assert_eq!(found.inode, 5);
    }

    #[test]
    fn duplicate_mount_rejected() {
        let root = fresh_root();
        let a = FsNode::new_mount("a", NodeKind::Directory, 1, Arc::new(EmptyDir));
        let b = FsNode::new_mount("a", NodeKind::Directory, 2, Arc::new(EmptyDir));
        attach_child(&root, "a", a).unwrap();
        assert_eq!(attach_child(&root, "a", b).unwrap_err(), KernelError::Exists);
    }
}
