//! Lazy promotion of files and parent directories from the readable layer to the writable layer.

use log::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::layer::Layer;
use crate::stat::Stat;
use crate::whiteout::WhiteoutLog;

/// The parent of an absolute, `/`-separated path. `None` for the root itself.
pub(crate) fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => None,
    }
}

/// Join a directory path and a bare entry name into an absolute path.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// `stat(p)` through the union (§4.5): writable shadows readable; a whiteout hides a readable
/// entry; a readable-only entry has its mode widened for write permission.
pub(crate) async fn union_stat<R: Layer, W: Layer>(
    readable: &R,
    writable: &W,
    whiteout: &WhiteoutLog,
    path: &str,
    lstat: bool,
) -> Result<Stat> {
    match writable.stat(path, lstat).await {
        Ok(stat) => return Ok(stat),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    if whiteout.is_whiteout(path) {
        return Err(Error::not_found());
    }
    let stat = readable.stat(path, lstat).await?;
    Ok(stat.widened_for_union())
}

/// Walk upward from `parent(path)` until an ancestor exists on `writable` (or the root), then
/// create the missing ancestors on `writable` top-down, each with the mode it has in the union
/// view (see §4.4).
pub(crate) async fn ensure_parent_dirs<R: Layer, W: Layer>(
    readable: &R,
    writable: &W,
    whiteout: &WhiteoutLog,
    path: &str,
) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = parent_of(path);
    while let Some(ancestor) = current {
        if writable.exists(&ancestor).await {
            break;
        }
        current = parent_of(&ancestor);
        missing.push(ancestor);
    }

    for ancestor in missing.into_iter().rev() {
        let stat = union_stat(readable, writable, whiteout, &ancestor, false).await?;
        debug!("copy-up: creating ancestor directory {}", ancestor);
        writable.mkdir(&ancestor, stat.mode).await?;
    }
    Ok(())
}

/// Promote `path` from `readable` to `writable`. Precondition: `path` exists on `readable` and
/// not on `writable` (callers check this via [`union_stat`] before calling).
pub(crate) async fn copy_up<R: Layer, W: Layer>(
    readable: &R,
    writable: &W,
    whiteout: &WhiteoutLog,
    path: &str,
) -> Result<()> {
    let stat = union_stat(readable, writable, whiteout, path, false).await?;
    ensure_parent_dirs(readable, writable, whiteout, path).await?;
    if stat.file_type.is_dir() {
        debug!("copy-up: creating directory {}", path);
        writable.mkdir(path, stat.mode).await
    } else {
        debug!("copy-up: copying file {}", path);
        let content = readable.read_file(path).await?;
        writable.write_file(path, &content, stat.mode).await
    }
}

/// Synchronous twin of [`union_stat`], used by the engine's `_sync` surface.
pub(crate) fn union_stat_sync<R: Layer, W: Layer>(
    readable: &R,
    writable: &W,
    whiteout: &WhiteoutLog,
    path: &str,
    lstat: bool,
) -> Result<Stat> {
    match writable.stat_sync(path, lstat) {
        Ok(stat) => return Ok(stat),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    if whiteout.is_whiteout(path) {
        return Err(Error::not_found());
    }
    let stat = readable.stat_sync(path, lstat)?;
    Ok(stat.widened_for_union())
}

/// Synchronous twin of [`ensure_parent_dirs`].
pub(crate) fn ensure_parent_dirs_sync<R: Layer, W: Layer>(
    readable: &R,
    writable: &W,
    whiteout: &WhiteoutLog,
    path: &str,
) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = parent_of(path);
    while let Some(ancestor) = current {
        if writable.exists_sync(&ancestor) {
            break;
        }
        current = parent_of(&ancestor);
        missing.push(ancestor);
    }

    for ancestor in missing.into_iter().rev() {
        let stat = union_stat_sync(readable, writable, whiteout, &ancestor, false)?;
        writable.mkdir_sync(&ancestor, stat.mode)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_root_is_none() {
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(parent_of("/a"), Some("/".to_string()));
    }

    #[test]
    fn parent_of_nested_path() {
        assert_eq!(parent_of("/a/b/c"), Some("/a/b".to_string()));
    }
}
