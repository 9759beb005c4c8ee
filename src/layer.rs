//! The interface a backing filesystem must provide to be composed by [`UnionEngine`].
//!
//! [`UnionEngine`]: crate::engine::UnionEngine
//!
//! Both layer implementations themselves are out of scope for this crate: this module only
//! defines the trait boundary, the way `fuser`'s `Filesystem` trait defines the boundary the
//! kernel driver calls into without prescribing how any particular filesystem is implemented.

use std::fmt;
use std::io::SeekFrom;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::Result;
use crate::flags::OpenFlag;
use crate::stat::Stat;

/// An open file handle on a [`Layer`]. Deliberately thin: whole-content convenience is provided
/// by [`Layer::read_file`]/[`Layer::write_file`]; this trait only exists to give
/// [`OverlayFile`](crate::overlay_file::OverlayFile) the same shape as a real layer handle.
#[async_trait]
pub trait LayerFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at the handle's current position.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at the handle's current position, extending the file if necessary.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Truncate (or extend with zeroes) the file to exactly `len` bytes.
    async fn set_len(&mut self, len: u64) -> Result<()>;

    /// Reposition the handle, mirroring `std::io::Seek`.
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Metadata for the open file.
    async fn stat(&self) -> Result<Stat>;

    /// Flush buffered writes to durable storage.
    async fn sync(&mut self) -> Result<()>;
}

/// A backing filesystem composed by [`UnionEngine`](crate::engine::UnionEngine).
///
/// Every operation has an asynchronous and a synchronous form, mirroring §6 of the design: the
/// [`SerializingWrapper`](crate::serializing::SerializingWrapper) forwards asynchronous calls
/// after acquiring the engine's mutex, and synchronous calls directly, rejecting the latter
/// while the mutex is held.
#[async_trait]
pub trait Layer: Send + Sync + fmt::Debug + 'static {
    /// Stat `path`. `lstat` requests not following a trailing symlink (the union never creates
    /// symlinks itself, but passes the flag through to layers that support them).
    async fn stat(&self, path: &str, lstat: bool) -> Result<Stat>;

    /// Open `path` with the given flag, returning a handle. `mode` is used only if the flag's
    /// not-exists action creates the file.
    async fn open(&self, path: &str, flag: OpenFlag, mode: u32) -> Result<Box<dyn LayerFile>>;

    /// Read the full content of `path`.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.open(path, OpenFlag::READ, 0).await?;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(buf)
    }

    /// Write the full content of `path`, creating or truncating it, with the given mode.
    async fn write_file(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        let mut file = self.open(path, OpenFlag::WRITE_TRUNCATE, mode).await?;
        file.write(data).await?;
        file.sync().await
    }

    /// Append `data` to `path`, creating it if necessary, flushing before returning.
    async fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = self.open(path, OpenFlag::READ_WRITE_CREATE, 0o644).await?;
        let len = file.stat().await?.size.unwrap_or(0);
        file.seek(SeekFrom::Start(len)).await?;
        file.write(data).await?;
        file.sync().await
    }

    /// `true` iff `path` exists.
    async fn exists(&self, path: &str) -> bool {
        self.stat(path, false).await.is_ok()
    }

    async fn unlink(&self, path: &str) -> Result<()>;
    async fn rmdir(&self, path: &str) -> Result<()>;
    async fn mkdir(&self, path: &str, mode: u32) -> Result<()>;
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
    async fn readdir(&self, path: &str) -> Result<Vec<String>>;
    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;
    async fn utimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    fn stat_sync(&self, path: &str, lstat: bool) -> Result<Stat>;
    fn exists_sync(&self, path: &str) -> bool {
        self.stat_sync(path, false).is_ok()
    }
    fn read_file_sync(&self, path: &str) -> Result<Vec<u8>>;
    fn write_file_sync(&self, path: &str, data: &[u8], mode: u32) -> Result<()>;
    /// Append `data` to `path`, creating it with mode `0o644` if necessary.
    fn append_file_sync(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut existing = match self.read_file_sync(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == crate::error::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        existing.extend_from_slice(data);
        self.write_file_sync(path, &existing, 0o644)
    }
    fn unlink_sync(&self, path: &str) -> Result<()>;
    fn rmdir_sync(&self, path: &str) -> Result<()>;
    fn mkdir_sync(&self, path: &str, mode: u32) -> Result<()>;
    fn rename_sync(&self, from: &str, to: &str) -> Result<()>;
    fn readdir_sync(&self, path: &str) -> Result<Vec<String>>;
    fn chmod_sync(&self, path: &str, mode: u32) -> Result<()>;
    fn chown_sync(&self, path: &str, uid: u32, gid: u32) -> Result<()>;
    fn utimes_sync(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    /// Always `false` for a writable layer candidate (see `UnionEngine::new`).
    fn is_read_only(&self) -> bool;
    /// `true` if the `_sync` methods are safe to call (do not panic / block the executor).
    fn supports_synch(&self) -> bool;
    /// Always `false` in this crate: hard links and symlinks are a non-goal.
    fn supports_links(&self) -> bool {
        false
    }
    /// `true` if this layer tracks POSIX-style owner/mode/time properties.
    fn supports_props(&self) -> bool;
}
