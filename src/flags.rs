//! Open-flag vocabulary consumed by `UnionEngine::open`.
//!
//! The exact flag vocabulary is treated as an external collaborator's concern (see the crate's
//! scope notes); what lives here is only the thin slice `open` itself branches on: what to do
//! when the path already exists, and what to do when it doesn't.

use std::fmt;

/// What `open` should do when the target path already exists.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ExistsAction {
    /// Truncate the existing file and open it for writing.
    Truncate,
    /// Use the existing file as-is (the common case for plain reads and read-modify-write).
    UseExisting,
    /// Fail with [`crate::Error::already_exists`].
    Error,
}

/// What `open` should do when the target path does not exist.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NotExistsAction {
    /// Create the file (and its parent directories, via copy-up if necessary).
    Create,
    /// Fail with [`crate::Error::not_found`].
    Error,
}

/// Open flags as passed to [`crate::engine::UnionEngine::open`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OpenFlag {
    exists: ExistsAction,
    not_exists: NotExistsAction,
    write: bool,
}

impl OpenFlag {
    /// `O_RDONLY`: fails if the path is missing, never creates, never truncates.
    pub const READ: OpenFlag = OpenFlag {
        exists: ExistsAction::UseExisting,
        not_exists: NotExistsAction::Error,
        write: false,
    };

    /// `O_RDWR | O_CREAT`: opens for read-write, creating if missing, using the existing
    /// content otherwise. This is the flag the spec calls "no-op (use existing)".
    pub const READ_WRITE_CREATE: OpenFlag = OpenFlag {
        exists: ExistsAction::UseExisting,
        not_exists: NotExistsAction::Create,
        write: true,
    };

    /// `O_WRONLY | O_CREAT | O_TRUNC`: always creates or truncates.
    pub const WRITE_TRUNCATE: OpenFlag = OpenFlag {
        exists: ExistsAction::Truncate,
        not_exists: NotExistsAction::Create,
        write: true,
    };

    /// `O_WRONLY | O_CREAT | O_EXCL`: fails if the path already exists.
    pub const WRITE_EXCLUSIVE: OpenFlag = OpenFlag {
        exists: ExistsAction::Error,
        not_exists: NotExistsAction::Create,
        write: true,
    };

    /// What to do if the path already exists.
    pub fn exists_action(self) -> ExistsAction {
        self.exists
    }

    /// What to do if the path does not exist.
    pub fn not_exists_action(self) -> NotExistsAction {
        self.not_exists
    }

    /// `true` if this flag requests write access.
    pub fn is_write(self) -> bool {
        self.write
    }
}

impl fmt::Display for OpenFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OpenFlag(exists={:?}, not_exists={:?}, write={})",
            self.exists, self.not_exists, self.write
        )
    }
}
