//! Metadata types returned from `stat`-like operations.

use std::time::SystemTime;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// The type of a filesystem entry, as reported by a [`Layer`](crate::layer::Layer).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum FileType {
    /// A regular file.
    RegularFile,
    /// A directory.
    Directory,
    /// Anything else a backing layer chooses to report (device, fifo, ...).
    Other,
}

impl FileType {
    /// `true` for [`FileType::Directory`].
    pub fn is_dir(self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// `true` for [`FileType::RegularFile`].
    pub fn is_file(self) -> bool {
        matches!(self, FileType::RegularFile)
    }
}

/// Unix mode bits, high bits carry the file-type the way `st_mode` does.
pub const MODE_WRITE_BITS: u32 = 0o222;

/// Metadata about a filesystem entry, as returned by `stat`/`lstat`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Stat {
    /// The entry's type.
    pub file_type: FileType,
    /// Unix permission bits (and, conventionally, file-type bits in the high nibble).
    pub mode: u32,
    /// Size in bytes. `None` when the layer cannot report it cheaply (mirrors the source's `-1`).
    pub size: Option<u64>,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time.
    pub atime: SystemTime,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
}

impl Stat {
    /// Clone this stat with the mode widened to include user/group/other write permission,
    /// preserving the file-type high bits. Used when presenting a readable-layer entry through
    /// the union (see `UnionEngine::stat`).
    pub fn widened_for_union(&self) -> Stat {
        let mut widened = self.clone();
        widened.mode |= MODE_WRITE_BITS;
        widened
    }
}
