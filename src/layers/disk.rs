//! A [`Layer`] rooted at a real directory, used as both readable and writable layers in tests
//! and by any consumer that wants an on-disk union mount.
//!
//! Grounded on the `fuser` project's `passthrough.rs` philosophy: a thin, direct wrapper over
//! real filesystem syscalls with no caching or translation beyond path-rooting.

use std::ffi::CString;
use std::fs as std_fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs as tokio_fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::flags::{ExistsAction, NotExistsAction, OpenFlag};
use crate::layer::{Layer, LayerFile};
use crate::stat::{FileType, Stat};
use crate::time::time_from_system_time;

/// A [`Layer`] backed by a directory on the local filesystem.
#[derive(Debug)]
pub struct DiskLayer {
    root: PathBuf,
    read_only: bool,
}

impl DiskLayer {
    /// Root the layer at `root`. `read_only` is reported by [`Layer::is_read_only`]; it does
    /// not itself prevent mutation (the OS permissions on `root` are the real enforcement), but
    /// `UnionEngine::new` rejects a `writable` layer for which this is `true`.
    pub fn new(root: impl AsRef<Path>, read_only: bool) -> Self {
        DiskLayer {
            root: root.as_ref().to_path_buf(),
            read_only,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn metadata_to_stat(metadata: &std_fs::Metadata) -> Stat {
        let file_type = if metadata.is_dir() {
            FileType::Directory
        } else if metadata.is_file() {
            FileType::RegularFile
        } else {
            FileType::Other
        };
        Stat {
            file_type,
            mode: metadata.permissions().mode(),
            size: Some(metadata.len()),
            mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            atime: metadata.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            uid: metadata.uid(),
            gid: metadata.gid(),
        }
    }

    fn open_options(flag: OpenFlag) -> (tokio_fs::OpenOptions, bool) {
        let mut options = tokio_fs::OpenOptions::new();
        options.read(true);
        if flag.is_write() {
            options.write(true);
        }
        if flag.exists_action() == ExistsAction::Truncate {
            options.truncate(true);
        }
        let creating = matches!(flag.not_exists_action(), NotExistsAction::Create);
        if creating {
            if flag.exists_action() == ExistsAction::Error {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }
        (options, creating)
    }
}

#[async_trait]
impl Layer for DiskLayer {
    async fn stat(&self, path: &str, lstat: bool) -> Result<Stat> {
        let full = self.resolve(path);
        let metadata = if lstat {
            tokio_fs::symlink_metadata(full).await?
        } else {
            tokio_fs::metadata(full).await?
        };
        Ok(Self::metadata_to_stat(&metadata))
    }

    async fn open(&self, path: &str, flag: OpenFlag, mode: u32) -> Result<Box<dyn LayerFile>> {
        let full = self.resolve(path);
        let existed = tokio_fs::metadata(&full).await.is_ok();
        let (options, creating) = Self::open_options(flag);
        let file = options.open(&full).await?;
        if creating && !existed {
            tokio_fs::set_permissions(&full, std_fs::Permissions::from_mode(mode)).await?;
        }
        Ok(Box::new(DiskFile { file }))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        Ok(tokio_fs::remove_file(self.resolve(path)).await?)
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        Ok(tokio_fs::remove_dir(self.resolve(path)).await?)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let full = self.resolve(path);
        tokio_fs::create_dir(&full).await?;
        tokio_fs::set_permissions(&full, std_fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        Ok(tokio_fs::rename(self.resolve(from), self.resolve(to)).await?)
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let mut entries = tokio_fs::read_dir(self.resolve(path)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let full = self.resolve(path);
        tokio_fs::set_permissions(&full, std_fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let full = self.resolve(path);
        tokio::task::spawn_blocking(move || chown_sync_impl(&full, uid, gid))
            .await
            .expect("chown blocking task panicked")
    }

    async fn utimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let full = self.resolve(path);
        tokio::task::spawn_blocking(move || utimes_sync_impl(&full, atime, mtime))
            .await
            .expect("utimes blocking task panicked")
    }

    fn stat_sync(&self, path: &str, lstat: bool) -> Result<Stat> {
        let full = self.resolve(path);
        let metadata = if lstat {
            std_fs::symlink_metadata(full)?
        } else {
            std_fs::metadata(full)?
        };
        Ok(Self::metadata_to_stat(&metadata))
    }

    fn read_file_sync(&self, path: &str) -> Result<Vec<u8>> {
        Ok(std_fs::read(self.resolve(path))?)
    }

    fn write_file_sync(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        let full = self.resolve(path);
        std_fs::write(&full, data)?;
        std_fs::set_permissions(&full, std_fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn unlink_sync(&self, path: &str) -> Result<()> {
        Ok(std_fs::remove_file(self.resolve(path))?)
    }

    fn rmdir_sync(&self, path: &str) -> Result<()> {
        Ok(std_fs::remove_dir(self.resolve(path))?)
    }

    fn mkdir_sync(&self, path: &str, mode: u32) -> Result<()> {
        let full = self.resolve(path);
        std_fs::create_dir(&full)?;
        std_fs::set_permissions(&full, std_fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn rename_sync(&self, from: &str, to: &str) -> Result<()> {
        Ok(std_fs::rename(self.resolve(from), self.resolve(to))?)
    }

    fn readdir_sync(&self, path: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std_fs::read_dir(self.resolve(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn chmod_sync(&self, path: &str, mode: u32) -> Result<()> {
        let full = self.resolve(path);
        std_fs::set_permissions(&full, std_fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn chown_sync(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        chown_sync_impl(&self.resolve(path), uid, gid)
    }

    fn utimes_sync(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        utimes_sync_impl(&self.resolve(path), atime, mtime)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn supports_synch(&self) -> bool {
        true
    }

    fn supports_props(&self) -> bool {
        true
    }
}

fn chown_sync_impl(full: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(full.as_os_str().as_bytes())
        .map_err(|_| Error::invalid_argument("path contains a NUL byte"))?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc != 0 {
        Err(std::io::Error::last_os_error().into())
    } else {
        Ok(())
    }
}

fn utimes_sync_impl(full: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    let c_path = CString::new(full.as_os_str().as_bytes())
        .map_err(|_| Error::invalid_argument("path contains a NUL byte"))?;
    let (atime_secs, atime_nanos) = time_from_system_time(&atime);
    let (mtime_secs, mtime_nanos) = time_from_system_time(&mtime);
    let times = [
        libc::timeval {
            tv_sec: atime_secs as libc::time_t,
            tv_usec: (atime_nanos / 1_000) as libc::suseconds_t,
        },
        libc::timeval {
            tv_sec: mtime_secs as libc::time_t,
            tv_usec: (mtime_nanos / 1_000) as libc::suseconds_t,
        },
    ];
    let rc = unsafe { libc::utimes(c_path.as_ptr(), times.as_ptr()) };
    if rc != 0 {
        Err(std::io::Error::last_os_error().into())
    } else {
        Ok(())
    }
}

/// A real, open file on disk, wrapped to satisfy [`LayerFile`].
struct DiskFile {
    file: tokio_fs::File,
}

#[async_trait]
impl LayerFile for DiskFile {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf).await?)
    }

    async fn set_len(&mut self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len).await?)
    }

    async fn seek(&mut self, pos: std::io::SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos).await?)
    }

    async fn stat(&self) -> Result<Stat> {
        let metadata = self.file.metadata().await?;
        Ok(DiskLayer::metadata_to_stat(&metadata))
    }

    async fn sync(&mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(self.file.sync_all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let layer = DiskLayer::new(dir.path(), false);
        layer.write_file("/a.txt", b"payload", 0o644).await.unwrap();
        assert_eq!(layer.read_file("/a.txt").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn mkdir_and_readdir() {
        let dir = tempdir().unwrap();
        let layer = DiskLayer::new(dir.path(), false);
        layer.mkdir("/sub", 0o755).await.unwrap();
        layer.write_file("/sub/f", b"x", 0o644).await.unwrap();
        let mut names = layer.readdir("/sub").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["f".to_string()]);
    }
}
