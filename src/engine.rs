//! The union filesystem: the composition of a writable upper layer and a readable lower layer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::OnceCell;

use crate::copy_up::{
    copy_up, ensure_parent_dirs, ensure_parent_dirs_sync, join_path, union_stat, union_stat_sync,
};
use crate::error::{Error, ErrorKind, Result};
use crate::flags::{ExistsAction, NotExistsAction, OpenFlag};
use crate::layer::{Layer, LayerFile};
use crate::overlay_file::OverlayFile;
use crate::stat::Stat;
use crate::whiteout::WhiteoutLog;

/// Builds a [`UnionEngine`], mirroring the small-builder convention this codebase uses for
/// multi-option construction (see `fuser`'s `SessionConfiguration`).
pub struct UnionEngineBuilder<R, W> {
    readable: R,
    writable: W,
    log_path: Option<String>,
    clear_stale_whiteout_on_mkdir: bool,
}

impl<R: Layer, W: Layer> UnionEngineBuilder<R, W> {
    /// Start building an engine over `writable` (upper) and `readable` (lower).
    pub fn new(writable: W, readable: R) -> Self {
        UnionEngineBuilder {
            readable,
            writable,
            log_path: None,
            clear_stale_whiteout_on_mkdir: true,
        }
    }

    /// Override the whiteout log's path (default [`crate::whiteout::DEFAULT_LOG_PATH`]). Tests
    /// use this to keep fixture directories free of the log file.
    pub fn whiteout_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Whether `mkdir` eagerly clears a stale whiteout entry at its path (§9 Open Questions).
    ///
    /// Eager (the default) writes a durable `u` record on every successful `mkdir`, even when no
    /// whiteout existed for the path: the entry is known-clean regardless of what the log says,
    /// at the cost of one append per `mkdir`. Set `false` to clear the entry lazily, only when
    /// [`WhiteoutLog::is_whiteout`] actually reports the path as whited-out, avoiding the write
    /// for the common case of creating a directory that was never previously deleted.
    pub fn clear_stale_whiteout_on_mkdir(mut self, eager: bool) -> Self {
        self.clear_stale_whiteout_on_mkdir = eager;
        self
    }

    /// Construct the engine. Fails with [`ErrorKind::InvalidArgument`] if `writable` reports
    /// itself read-only (§3).
    pub fn build(self) -> Result<UnionEngine<R, W>> {
        if self.writable.is_read_only() {
            return Err(Error::invalid_argument(
                "writable layer must not be read-only",
            ));
        }
        let whiteout = match self.log_path {
            Some(path) => WhiteoutLog::with_path(path),
            None => WhiteoutLog::new(),
        };
        Ok(UnionEngine {
            readable: Arc::new(self.readable),
            writable: Arc::new(self.writable),
            whiteout: Arc::new(whiteout),
            clear_stale_whiteout_on_mkdir: self.clear_stale_whiteout_on_mkdir,
            init: OnceCell::new(),
        })
    }
}

/// The copy-on-write union filesystem composing `readable` (lower, immutable) and `writable`
/// (upper, mutable) into a single namespace (see SPEC_FULL.md §3–§5).
pub struct UnionEngine<R, W> {
    readable: Arc<R>,
    writable: Arc<W>,
    whiteout: Arc<WhiteoutLog>,
    clear_stale_whiteout_on_mkdir: bool,
    init: OnceCell<()>,
}

impl<R: Layer, W: Layer> UnionEngine<R, W> {
    /// Construct an engine with the default whiteout log path. Equivalent to
    /// `UnionEngineBuilder::new(writable, readable).build()`.
    pub fn new(writable: W, readable: R) -> Result<Self> {
        UnionEngineBuilder::new(writable, readable).build()
    }

    /// Recover the whiteout log and mark the engine ready to serve operations. Safe to call
    /// concurrently or repeatedly; only the first in-flight call performs I/O (§4.3).
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.whiteout.initialize(self.writable.as_ref()).await?;
                debug!("union engine initialized");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// The two layers this engine composes.
    pub fn overlayed_filesystems(&self) -> (&R, &W) {
        (self.readable.as_ref(), self.writable.as_ref())
    }

    fn assert_initialized(&self) -> Result<()> {
        if self.init.initialized() {
            Ok(())
        } else {
            Err(Error::permission())
        }
    }

    async fn ensure_copied_up(&self, path: &str) -> Result<()> {
        if !self.writable.exists(path).await {
            copy_up(
                self.readable.as_ref(),
                self.writable.as_ref(),
                &self.whiteout,
                path,
            )
            .await?;
        }
        Ok(())
    }

    /// Recursive, cross-layer rename (§4.5). Boxed because `async fn` cannot recurse directly.
    fn rename_inner<'a>(&'a self, old_path: &'a str, new_path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.assert_initialized()?;
            if old_path == new_path {
                return Ok(());
            }

            let old_stat = union_stat(
                self.readable.as_ref(),
                self.writable.as_ref(),
                &self.whiteout,
                old_path,
                false,
            )
            .await?;
            let new_stat = union_stat(
                self.readable.as_ref(),
                self.writable.as_ref(),
                &self.whiteout,
                new_path,
                false,
            )
            .await;

            if old_stat.file_type.is_dir() {
                match new_stat {
                    Err(ref err) if err.kind() == ErrorKind::NotFound => {
                        if self.writable.exists(old_path).await {
                            self.writable.rename(old_path, new_path).await?;
                        } else {
                            debug!("rename: materializing directory {} at {}", old_path, new_path);
                            self.writable.mkdir(new_path, 0o777).await?;
                            let children =
                                self.readable.readdir(old_path).await.unwrap_or_default();
                            for child in children {
                                let child_old = join_path(old_path, &child);
                                let child_new = join_path(new_path, &child);
                                self.rename_inner(&child_old, &child_new).await?;
                            }
                            self.rmdir(old_path).await?;
                        }
                        Ok(())
                    }
                    Ok(stat) => {
                        if !stat.file_type.is_dir() {
                            return Err(Error::not_a_directory());
                        }
                        if !self.readdir(new_path).await?.is_empty() {
                            return Err(Error::not_empty());
                        }
                        let children = self.readdir(old_path).await?;
                        for child in children {
                            let child_old = join_path(old_path, &child);
                            let child_new = join_path(new_path, &child);
                            self.rename_inner(&child_old, &child_new).await?;
                        }
                        self.rmdir(old_path).await
                    }
                    Err(err) => Err(err),
                }
            } else {
                if let Ok(stat) = &new_stat {
                    if stat.file_type.is_dir() {
                        return Err(Error::is_a_directory());
                    }
                }
                let content = self.read_file(old_path).await?;
                self.write_file(new_path, &content, old_stat.mode).await?;
                self.unlink(old_path).await
            }
        })
    }

    fn stat_through_union_sync(&self, path: &str, lstat: bool) -> Result<Stat> {
        union_stat_sync(
            self.readable.as_ref(),
            self.writable.as_ref(),
            &self.whiteout,
            path,
            lstat,
        )
    }
}

#[async_trait]
impl<R: Layer, W: Layer> Layer for UnionEngine<R, W> {
    async fn stat(&self, path: &str, lstat: bool) -> Result<Stat> {
        self.assert_initialized()?;
        union_stat(
            self.readable.as_ref(),
            self.writable.as_ref(),
            &self.whiteout,
            path,
            lstat,
        )
        .await
    }

    async fn open(&self, path: &str, flag: OpenFlag, mode: u32) -> Result<Box<dyn LayerFile>> {
        self.assert_initialized()?;
        let visible = self.stat(path, false).await;
        match visible {
            Ok(stat) => match flag.exists_action() {
                ExistsAction::Truncate => {
                    ensure_parent_dirs(
                        self.readable.as_ref(),
                        self.writable.as_ref(),
                        &self.whiteout,
                        path,
                    )
                    .await?;
                    self.writable.open(path, flag, mode).await
                }
                ExistsAction::UseExisting => {
                    if self.writable.exists(path).await {
                        self.writable.open(path, flag, mode).await
                    } else {
                        let overlay = OverlayFile::open(
                            self.readable.clone(),
                            self.writable.clone(),
                            self.whiteout.clone(),
                            path.to_string(),
                            stat,
                            mode,
                        )
                        .await?;
                        Ok(Box::new(overlay))
                    }
                }
                ExistsAction::Error => Err(Error::already_exists()),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => match flag.not_exists_action() {
                NotExistsAction::Create => {
                    ensure_parent_dirs(
                        self.readable.as_ref(),
                        self.writable.as_ref(),
                        &self.whiteout,
                        path,
                    )
                    .await?;
                    self.writable.open(path, flag, mode).await
                }
                NotExistsAction::Error => Err(Error::not_found()),
            },
            Err(err) => Err(err),
        }
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.assert_initialized()?;
        let stat = self.stat(path, false).await?;
        if stat.file_type.is_dir() {
            return Err(Error::is_a_directory());
        }
        if self.writable.exists(path).await {
            self.writable.unlink(path).await?;
            if self.readable.exists(path).await {
                self.whiteout.record_delete(self.writable.as_ref(), path).await?;
            }
        } else {
            self.whiteout.record_delete(self.writable.as_ref(), path).await?;
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.assert_initialized()?;
        let stat = self.stat(path, false).await?;
        if !stat.file_type.is_dir() {
            return Err(Error::not_a_directory());
        }
        if self.writable.exists(path).await {
            self.writable.rmdir(path).await?;
        }
        if self.readable.exists(path).await {
            if !self.readdir(path).await?.is_empty() {
                return Err(Error::not_empty());
            }
            self.whiteout.record_delete(self.writable.as_ref(), path).await?;
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.assert_initialized()?;
        if self.stat(path, false).await.is_ok() {
            return Err(Error::already_exists());
        }
        ensure_parent_dirs(
            self.readable.as_ref(),
            self.writable.as_ref(),
            &self.whiteout,
            path,
        )
        .await?;
        self.writable.mkdir(path, mode).await?;
        if self.clear_stale_whiteout_on_mkdir || self.whiteout.is_whiteout(path) {
            self.whiteout.record_undelete(self.writable.as_ref(), path).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.rename_inner(from, to).await
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.assert_initialized()?;
        let stat = self.stat(path, false).await?;
        if !stat.file_type.is_dir() {
            return Err(Error::not_a_directory());
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        match self.writable.readdir(path).await {
            Ok(names) => {
                for name in names {
                    if seen.insert(name.clone()) {
                        result.push(name);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        match self.readable.readdir(path).await {
            Ok(names) => {
                for name in names {
                    if seen.insert(name.clone()) {
                        result.push(name);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        result.retain(|name| {
            let whited = self.whiteout.is_whiteout(&join_path(path, name));
            if whited {
                warn!("readdir: filtering whited-out entry {}/{}", path, name);
            }
            !whited
        });
        Ok(result)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.assert_initialized()?;
        self.stat(path, false).await?;
        self.ensure_copied_up(path).await?;
        self.writable.chmod(path, mode).await
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.assert_initialized()?;
        self.stat(path, false).await?;
        self.ensure_copied_up(path).await?;
        self.writable.chown(path, uid, gid).await
    }

    async fn utimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.assert_initialized()?;
        self.stat(path, false).await?;
        self.ensure_copied_up(path).await?;
        self.writable.utimes(path, atime, mtime).await
    }

    fn stat_sync(&self, path: &str, lstat: bool) -> Result<Stat> {
        self.assert_initialized()?;
        self.stat_through_union_sync(path, lstat)
    }

    fn read_file_sync(&self, path: &str) -> Result<Vec<u8>> {
        self.assert_initialized()?;
        if self.writable.exists_sync(path) {
            self.writable.read_file_sync(path)
        } else {
            self.stat_through_union_sync(path, false)?;
            self.readable.read_file_sync(path)
        }
    }

    fn write_file_sync(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        self.assert_initialized()?;
        ensure_parent_dirs_sync(
            self.readable.as_ref(),
            self.writable.as_ref(),
            &self.whiteout,
            path,
        )?;
        self.writable.write_file_sync(path, data, mode)
    }

    fn unlink_sync(&self, path: &str) -> Result<()> {
        self.assert_initialized()?;
        let stat = self.stat_through_union_sync(path, false)?;
        if stat.file_type.is_dir() {
            return Err(Error::is_a_directory());
        }
        if self.writable.exists_sync(path) {
            self.writable.unlink_sync(path)?;
            if self.readable.exists_sync(path) {
                self.whiteout.record_delete_sync(self.writable.as_ref(), path)?;
            }
        } else {
            self.whiteout.record_delete_sync(self.writable.as_ref(), path)?;
        }
        Ok(())
    }

    fn rmdir_sync(&self, path: &str) -> Result<()> {
        self.assert_initialized()?;
        let stat = self.stat_through_union_sync(path, false)?;
        if !stat.file_type.is_dir() {
            return Err(Error::not_a_directory());
        }
        if self.writable.exists_sync(path) {
            self.writable.rmdir_sync(path)?;
        }
        if self.readable.exists_sync(path) {
            if !self.readdir_sync(path)?.is_empty() {
                return Err(Error::not_empty());
            }
            self.whiteout.record_delete_sync(self.writable.as_ref(), path)?;
        }
        Ok(())
    }

    fn mkdir_sync(&self, path: &str, mode: u32) -> Result<()> {
        self.assert_initialized()?;
        if self.stat_through_union_sync(path, false).is_ok() {
            return Err(Error::already_exists());
        }
        ensure_parent_dirs_sync(
            self.readable.as_ref(),
            self.writable.as_ref(),
            &self.whiteout,
            path,
        )?;
        self.writable.mkdir_sync(path, mode)?;
        if self.clear_stale_whiteout_on_mkdir || self.whiteout.is_whiteout(path) {
            self.whiteout.record_undelete_sync(self.writable.as_ref(), path)?;
        }
        Ok(())
    }

    fn rename_sync(&self, from: &str, to: &str) -> Result<()> {
        self.assert_initialized()?;
        if from == to {
            return Ok(());
        }
        let old_stat = self.stat_through_union_sync(from, false)?;
        let new_stat = self.stat_through_union_sync(to, false);

        if old_stat.file_type.is_dir() {
            match new_stat {
                Err(ref err) if err.kind() == ErrorKind::NotFound => {
                    if self.writable.exists_sync(from) {
                        self.writable.rename_sync(from, to)
                    } else {
                        self.writable.mkdir_sync(to, 0o777)?;
                        for child in self.readable.readdir_sync(from).unwrap_or_default() {
                            self.rename_sync(&join_path(from, &child), &join_path(to, &child))?;
                        }
                        self.rmdir_sync(from)
                    }
                }
                Ok(stat) => {
                    if !stat.file_type.is_dir() {
                        return Err(Error::not_a_directory());
                    }
                    if !self.readdir_sync(to)?.is_empty() {
                        return Err(Error::not_empty());
                    }
                    for child in self.readdir_sync(from)? {
                        self.rename_sync(&join_path(from, &child), &join_path(to, &child))?;
                    }
                    self.rmdir_sync(from)
                }
                Err(err) => Err(err),
            }
        } else {
            if let Ok(stat) = &new_stat {
                if stat.file_type.is_dir() {
                    return Err(Error::is_a_directory());
                }
            }
            let content = self.read_file_sync(from)?;
            self.write_file_sync(to, &content, old_stat.mode)?;
            self.unlink_sync(from)
        }
    }

    fn readdir_sync(&self, path: &str) -> Result<Vec<String>> {
        self.assert_initialized()?;
        let stat = self.stat_through_union_sync(path, false)?;
        if !stat.file_type.is_dir() {
            return Err(Error::not_a_directory());
        }
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        match self.writable.readdir_sync(path) {
            Ok(names) => {
                for name in names {
                    if seen.insert(name.clone()) {
                        result.push(name);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        match self.readable.readdir_sync(path) {
            Ok(names) => {
                for name in names {
                    if seen.insert(name.clone()) {
                        result.push(name);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        result.retain(|name| !self.whiteout.is_whiteout(&join_path(path, name)));
        Ok(result)
    }

    fn chmod_sync(&self, path: &str, mode: u32) -> Result<()> {
        self.assert_initialized()?;
        self.stat_through_union_sync(path, false)?;
        if !self.writable.exists_sync(path) {
            self.chmod_copy_up_sync(path)?;
        }
        self.writable.chmod_sync(path, mode)
    }

    fn chown_sync(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.assert_initialized()?;
        self.stat_through_union_sync(path, false)?;
        if !self.writable.exists_sync(path) {
            self.chmod_copy_up_sync(path)?;
        }
        self.writable.chown_sync(path, uid, gid)
    }

    fn utimes_sync(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.assert_initialized()?;
        self.stat_through_union_sync(path, false)?;
        if !self.writable.exists_sync(path) {
            self.chmod_copy_up_sync(path)?;
        }
        self.writable.utimes_sync(path, atime, mtime)
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn supports_synch(&self) -> bool {
        self.readable.supports_synch() && self.writable.supports_synch()
    }

    fn supports_links(&self) -> bool {
        false
    }

    fn supports_props(&self) -> bool {
        self.readable.supports_props() && self.writable.supports_props()
    }
}

impl<R: Layer, W: Layer> UnionEngine<R, W> {
    fn chmod_copy_up_sync(&self, path: &str) -> Result<()> {
        let stat = self.stat_through_union_sync(path, false)?;
        ensure_parent_dirs_sync(
            self.readable.as_ref(),
            self.writable.as_ref(),
            &self.whiteout,
            path,
        )?;
        if stat.file_type.is_dir() {
            self.writable.mkdir_sync(path, stat.mode)
        } else {
            let content = self.readable.read_file_sync(path)?;
            self.writable.write_file_sync(path, &content, stat.mode)
        }
    }
}

impl<R: std::fmt::Debug, W: std::fmt::Debug> std::fmt::Debug for UnionEngine<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionEngine")
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("initialized", &self.init.initialized())
            .finish()
    }
}
