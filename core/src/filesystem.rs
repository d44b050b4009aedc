// Generic filesystem operations
// Every driver exposes the same inode-oriented interface so callers can
// work with any filesystem image the same way.

use crate::StrataError;
use serde::{Deserialize, Serialize};

/// Opaque inode handle. Handles are positive, assigned by the driver's
/// inode registry, and stay valid for the lifetime of a mount.
pub type Inode = u32;

/// The root directory of every mount.
pub const ROOT_INODE: Inode = 1;

/// Directory bit in [`FileStat::mode`].
pub const S_DIR: u32 = 0o040000;

/// Metadata record exposed by the filesystem façade.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    /// Seconds since the Unix epoch (UTC).
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

impl FileStat {
    pub fn is_directory(&self) -> bool {
        self.mode & S_DIR == S_DIR
    }
}

/// One directory entry as returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub inode: Inode,
}

/// The operations every filesystem driver implements.
///
/// All operations run to completion on the caller's thread; a mount must
/// not be shared across threads without external serialization. The
/// `load`/`create` lifecycle hooks are the drivers' constructors.
pub trait FilesystemDriver: Send {
    /// Read up to `buf.len()` bytes at `offset`; returns the count read.
    fn read(&mut self, ino: Inode, buf: &mut [u8], offset: u64) -> Result<usize, StrataError>;

    /// Write `buf` at `offset`, clamped to the current size; returns the
    /// count written. Writes never extend a file.
    fn write(&mut self, ino: Inode, buf: &[u8], offset: u64) -> Result<usize, StrataError>;

    /// Allocate a fresh inode (and its backing storage) described by `st`.
    /// The inode has no directory entry until it is linked.
    fn touch(&mut self, st: &FileStat) -> Result<Inode, StrataError>;

    /// Enumerate a directory. Index 0 is `.`, index 1 is `..`; `None`
    /// past the last entry.
    fn readdir(&mut self, dir: Inode, index: usize) -> Result<Option<DirEntry>, StrataError>;

    /// Write a directory entry for `ino` into `dir` under `name`.
    fn link(&mut self, ino: Inode, dir: Inode, name: &str) -> Result<(), StrataError>;

    /// Remove the entry at `index` from `dir` and release its storage.
    fn unlink(&mut self, dir: Inode, index: usize) -> Result<(), StrataError>;

    fn fstat(&mut self, ino: Inode) -> Result<FileStat, StrataError>;

    fn mkdir(&mut self, parent: Inode, name: &str) -> Result<(), StrataError>;

    fn rmdir(&mut self, dir: Inode, index: usize) -> Result<(), StrataError>;

    /// Flush buffered metadata to disk.
    fn sync(&mut self) -> Result<(), StrataError> {
        Ok(())
    }

    /// Consistency check hook.
    fn check(&mut self) -> Result<(), StrataError> {
        Ok(())
    }

    /// Flush everything and tear down the mount.
    fn close(self: Box<Self>) -> Result<(), StrataError>;

    /// Filesystem type name, e.g. "fat12".
    fn filesystem_type(&self) -> &str;
}
