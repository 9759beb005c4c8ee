//! Error taxonomy exchanged at the union engine's boundary.

use std::fmt;
use std::io;

/// The taxonomy of errors a [`Layer`](crate::layer::Layer) or the
/// [`UnionEngine`](crate::engine::UnionEngine) may report.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Path absent in the union (or whited-out).
    NotFound,
    /// Target present where a create was requested.
    AlreadyExists,
    /// A directory-only operation was applied to a non-directory.
    NotADirectory,
    /// A file-only operation was applied to a directory.
    IsADirectory,
    /// Directory removal or overwrite attempted on a non-empty directory.
    NotEmpty,
    /// Operation invoked before `initialize` completed, or the writable layer refused a write.
    Permission,
    /// Engine constructed with a read-only writable layer, or a synchronous call raced the lock.
    InvalidArgument,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotADirectory => "not a directory",
            ErrorKind::IsADirectory => "is a directory",
            ErrorKind::NotEmpty => "directory not empty",
            ErrorKind::Permission => "permission denied",
            ErrorKind::InvalidArgument => "invalid argument",
        }
    }

    fn from_raw_os_error(errno: i32) -> Option<Self> {
        match errno {
            libc::ENOENT => Some(ErrorKind::NotFound),
            libc::EEXIST => Some(ErrorKind::AlreadyExists),
            libc::ENOTDIR => Some(ErrorKind::NotADirectory),
            libc::EISDIR => Some(ErrorKind::IsADirectory),
            libc::ENOTEMPTY => Some(ErrorKind::NotEmpty),
            libc::EACCES | libc::EPERM => Some(ErrorKind::Permission),
            libc::EINVAL => Some(ErrorKind::InvalidArgument),
            _ => None,
        }
    }
}

/// An error produced by a [`Layer`](crate::layer::Layer) implementation or the union engine.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<io::Error>,
}

impl Error {
    /// Construct an error of the given kind with no attached message.
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: None,
            source: None,
        }
    }

    /// Construct an error of the given kind with a human-readable message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: Some(message.into()),
            source: None,
        }
    }

    /// The taxonomy bucket this error falls into.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Shorthand for [`ErrorKind::NotFound`].
    pub fn not_found() -> Self {
        Error::new(ErrorKind::NotFound)
    }

    /// Shorthand for [`ErrorKind::AlreadyExists`].
    pub fn already_exists() -> Self {
        Error::new(ErrorKind::AlreadyExists)
    }

    /// Shorthand for [`ErrorKind::NotADirectory`].
    pub fn not_a_directory() -> Self {
        Error::new(ErrorKind::NotADirectory)
    }

    /// Shorthand for [`ErrorKind::IsADirectory`].
    pub fn is_a_directory() -> Self {
        Error::new(ErrorKind::IsADirectory)
    }

    /// Shorthand for [`ErrorKind::NotEmpty`].
    pub fn not_empty() -> Self {
        Error::new(ErrorKind::NotEmpty)
    }

    /// Shorthand for [`ErrorKind::Permission`].
    pub fn permission() -> Self {
        Error::new(ErrorKind::Permission)
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::with_message(ErrorKind::InvalidArgument, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind.as_str(), message),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = err
            .raw_os_error()
            .and_then(ErrorKind::from_raw_os_error)
            .or_else(|| match err.kind() {
                io::ErrorKind::NotFound => Some(ErrorKind::NotFound),
                io::ErrorKind::AlreadyExists => Some(ErrorKind::AlreadyExists),
                io::ErrorKind::PermissionDenied => Some(ErrorKind::Permission),
                _ => None,
            })
            .unwrap_or(ErrorKind::Permission);
        Error {
            kind,
            message: None,
            source: Some(err),
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
