//! Serializes asynchronous access to an inner [`Layer`] through a [`Mutex`].

use std::fmt;
use std::io::SeekFrom;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::flags::OpenFlag;
use crate::layer::{Layer, LayerFile};
use crate::mutex::Mutex;
use crate::stat::Stat;

/// Wraps any [`Layer`] and serializes every asynchronous call through a FIFO [`Mutex`],
/// rejecting synchronous calls outright while the lock is held (see §4.2).
///
/// This is what makes the multi-step sub-operations inside `UnionEngine` (e.g. the several
/// layer calls a cross-layer rename makes) appear atomic to any other caller of the same
/// engine: nothing else can observe the engine mid-operation.
pub struct SerializingWrapper<L> {
    inner: L,
    mutex: Mutex,
}

impl<L: fmt::Debug> fmt::Debug for SerializingWrapper<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializingWrapper")
            .field("inner", &self.inner)
            .field("locked", &self.mutex.is_locked())
            .finish()
    }
}

impl<L> SerializingWrapper<L> {
    /// Wrap `inner`, starting unlocked.
    pub fn new(inner: L) -> Self {
        SerializingWrapper {
            inner,
            mutex: Mutex::new(),
        }
    }

    /// The wrapped layer, for callers that need direct (still-synchronized) access.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    fn reject_if_locked(&self) -> Result<()> {
        if self.mutex.is_locked() {
            Err(Error::invalid_argument(
                "synchronous call attempted while the async mutex is held",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<L: Layer> Layer for SerializingWrapper<L> {
    async fn stat(&self, path: &str, lstat: bool) -> Result<Stat> {
        let _guard = self.mutex.lock().await;
        self.inner.stat(path, lstat).await
    }

    async fn open(&self, path: &str, flag: OpenFlag, mode: u32) -> Result<Box<dyn LayerFile>> {
        let _guard = self.mutex.lock().await;
        self.inner.open(path, flag, mode).await
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.unlink(path).await
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.rmdir(path).await
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.mkdir(path, mode).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.rename(from, to).await
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let _guard = self.mutex.lock().await;
        self.inner.readdir(path).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.chmod(path, mode).await
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.chown(path, uid, gid).await
    }

    async fn utimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let _guard = self.mutex.lock().await;
        self.inner.utimes(path, atime, mtime).await
    }

    fn stat_sync(&self, path: &str, lstat: bool) -> Result<Stat> {
        self.reject_if_locked()?;
        self.inner.stat_sync(path, lstat)
    }

    fn read_file_sync(&self, path: &str) -> Result<Vec<u8>> {
        self.reject_if_locked()?;
        self.inner.read_file_sync(path)
    }

    fn write_file_sync(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.write_file_sync(path, data, mode)
    }

    fn unlink_sync(&self, path: &str) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.unlink_sync(path)
    }

    fn rmdir_sync(&self, path: &str) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.rmdir_sync(path)
    }

    fn mkdir_sync(&self, path: &str, mode: u32) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.mkdir_sync(path, mode)
    }

    fn rename_sync(&self, from: &str, to: &str) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.rename_sync(from, to)
    }

    fn readdir_sync(&self, path: &str) -> Result<Vec<String>> {
        self.reject_if_locked()?;
        self.inner.readdir_sync(path)
    }

    fn chmod_sync(&self, path: &str, mode: u32) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.chmod_sync(path, mode)
    }

    fn chown_sync(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.chown_sync(path, uid, gid)
    }

    fn utimes_sync(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.reject_if_locked()?;
        self.inner.utimes_sync(path, atime, mtime)
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn supports_synch(&self) -> bool {
        self.inner.supports_synch()
    }

    fn supports_links(&self) -> bool {
        self.inner.supports_links()
    }

    fn supports_props(&self) -> bool {
        self.inner.supports_props()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::disk::DiskLayer;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_call_rejected_while_async_call_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = Arc::new(SerializingWrapper::new(DiskLayer::new(dir.path(), false)));

        let holder = {
            let wrapper = wrapper.clone();
            tokio::spawn(async move {
                let _guard = wrapper.mutex.lock().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
        };

        // Give the spawned task a chance to acquire the lock before we probe it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(wrapper.mutex.is_locked());

        let result = wrapper.stat_sync("/", false);
        assert!(matches!(result, Err(ref err) if err.kind() == crate::error::ErrorKind::InvalidArgument));

        holder.await.unwrap();
        assert!(!wrapper.mutex.is_locked());
        assert!(wrapper.stat_sync("/", false).is_ok());
    }
}
