//! A buffered file handle bridging a read-only source and a deferred write-back.

use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::copy_up::ensure_parent_dirs;
use crate::error::Result;
use crate::layer::{Layer, LayerFile};
use crate::stat::Stat;
use crate::whiteout::WhiteoutLog;

/// Returned by [`UnionEngine::open`](crate::engine::UnionEngine::open) when a readable-layer
/// file is opened with a write-capable, "use existing" flag and has not yet been copied up.
///
/// Holds `Arc` references into the engine's layers rather than a back-reference to the engine
/// itself, so there is no reference cycle to manage (see DESIGN.md).
pub struct OverlayFile<R, W> {
    readable: Arc<R>,
    writable: Arc<W>,
    whiteout: Arc<WhiteoutLog>,
    path: String,
    stat: Stat,
    buffer: Vec<u8>,
    position: usize,
    dirty: bool,
}

impl<R: Layer, W: Layer> OverlayFile<R, W> {
    /// Construct an overlay file over `path`, whose content is read from `readable`.
    /// `stat` is the union-view metadata for `path`, with its mode forced to `mode` (the mode
    /// requested at `open` time) per §4.5.
    pub(crate) async fn open(
        readable: Arc<R>,
        writable: Arc<W>,
        whiteout: Arc<WhiteoutLog>,
        path: String,
        mut stat: Stat,
        mode: u32,
    ) -> Result<Self> {
        let buffer = readable.read_file(&path).await?;
        if stat.size.is_none() {
            stat.size = Some(buffer.len() as u64);
        }
        stat.mode = mode;
        Ok(OverlayFile {
            readable,
            writable,
            whiteout,
            path,
            stat,
            buffer,
            position: 0,
            dirty: false,
        })
    }

    /// The path this handle was opened against.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl<R: Layer, W: Layer> LayerFile for OverlayFile<R, W> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.buffer.len().saturating_sub(self.position);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let end = self.position + buf.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(buf);
        self.position = end;
        self.dirty = true;
        self.stat.size = Some(self.buffer.len() as u64);
        Ok(buf.len())
    }

    async fn set_len(&mut self, len: u64) -> Result<()> {
        self.buffer.resize(len as usize, 0);
        self.position = self.position.min(self.buffer.len());
        self.dirty = true;
        self.stat.size = Some(len);
        Ok(())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_position = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.buffer.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        self.position = new_position.max(0) as usize;
        Ok(self.position as u64)
    }

    async fn stat(&self) -> Result<Stat> {
        Ok(self.stat.clone())
    }

    /// If dirty, copy up the parent directories and write the buffer to `writable`, then clear
    /// the dirty flag. A clean overlay file is a no-op, matching §4.6.
    async fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        debug!("overlay file flush: writing back {}", self.path);
        ensure_parent_dirs(self.readable.as_ref(), self.writable.as_ref(), &self.whiteout, &self.path)
            .await?;
        self.writable
            .write_file(&self.path, &self.buffer, self.stat.mode)
            .await?;
        self.dirty = false;
        Ok(())
    }
}

impl<R, W> Drop for OverlayFile<R, W> {
    fn drop(&mut self) {
        if self.dirty {
            log::warn!(
                "overlay file for {} dropped while dirty; call sync()/close() explicitly to flush",
                self.path
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::disk::DiskLayer;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_sync_flushes_to_writable() {
        let readable_dir = tempdir().unwrap();
        let writable_dir = tempdir().unwrap();
        std::fs::write(readable_dir.path().join("hello.txt"), b"hi").unwrap();

        let readable = Arc::new(DiskLayer::new(readable_dir.path(), true));
        let writable = Arc::new(DiskLayer::new(writable_dir.path(), false));
        let whiteout = Arc::new(WhiteoutLog::new());

        let stat = readable.stat("/hello.txt", false).await.unwrap();
        let mut file = OverlayFile::open(
            readable.clone(),
            writable.clone(),
            whiteout,
            "/hello.txt".to_string(),
            stat,
            0o644,
        )
        .await
        .unwrap();

        file.seek(SeekFrom::End(0)).await.unwrap();
        file.write(b" there").await.unwrap();
        file.sync().await.unwrap();

        let written = writable.read_file("/hello.txt").await.unwrap();
        assert_eq!(written, b"hi there");
    }
}
