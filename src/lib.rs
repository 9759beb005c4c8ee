//! A copy-on-write union filesystem composing a writable upper layer over a read-only lower
//! layer into one logical namespace.
//!
//! The core type is [`engine::UnionEngine`], wrapped in [`serializing::SerializingWrapper`] so
//! that multi-step operations (copy-up, cross-layer rename) appear atomic to concurrent callers.
//! Backing filesystems implement the [`layer::Layer`] trait; [`layers::disk::DiskLayer`] is the
//! one concrete implementation this crate ships, rooting a layer at a real directory.
//!
//! ```no_run
//! use unionfs::{DiskLayer, SerializingWrapper, UnionEngine};
//!
//! # async fn run() -> unionfs::Result<()> {
//! let readable = DiskLayer::new("/mnt/base", true);
//! let writable = DiskLayer::new("/mnt/upper", false);
//! let engine = SerializingWrapper::new(UnionEngine::new(writable, readable)?);
//! engine.inner().initialize().await?;
//! # Ok(())
//! # }
//! ```

mod copy_up;
mod engine;
mod error;
mod flags;
mod layer;
mod layers;
mod mutex;
mod overlay_file;
mod serializing;
mod stat;
mod time;
mod whiteout;

pub use engine::{UnionEngine, UnionEngineBuilder};
pub use error::{Error, ErrorKind, Result};
pub use flags::{ExistsAction, NotExistsAction, OpenFlag};
pub use layer::{Layer, LayerFile};
pub use layers::disk::DiskLayer;
pub use mutex::{Mutex, MutexGuard};
pub use overlay_file::OverlayFile;
pub use serializing::SerializingWrapper;
pub use stat::{FileType, Stat};
pub use whiteout::{WhiteoutLog, DEFAULT_LOG_PATH};
