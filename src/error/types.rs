//! Error types
//!
//! Defines the error taxonomy surfaced by every storage operation.

use std::io;
use std::path::PathBuf;

/// Path validation errors raised before any I/O is attempted.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,
    #[error("Malformed path {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("Path is outside the storage root: {0}")]
    OutsideRoot(String),
    #[error("Symbolic links are not supported: {0}")]
    SymlinkNotSupported(String),
    #[error("Path exceeds {limit} bytes: {path}")]
    TooLong { path: String, limit: usize },
}

impl PathError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        PathError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Quota enforcement errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("Storage quota exceeded: requested {requested} bytes, {available} bytes available")]
    Exceeded { requested: u64, available: u64 },
}

/// Errors returned by the store facade.
///
/// `QuotaExceeded` and `OperationCancelled` are produced only by the quota
/// guard and cancellation checks; `from_io` never yields them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Path is outside the storage root: {0}")]
    PathOutsideRoot(String),
    #[error("Malformed path: {0}")]
    PathMalformed(String),
    #[error("Symbolic link rejected: {0}")]
    SymlinkRejected(String),
    #[error("Storage quota exceeded: requested {requested} bytes, {available} bytes available")]
    QuotaExceeded { requested: u64, available: u64 },
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("I/O failure on {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Operation cancelled")]
    OperationCancelled,
    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Not a file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("Buffer size {size} outside {min}..={max}")]
    InvalidBufferSize { size: usize, min: usize, max: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Store has been shut down")]
    ShutDown,
}

impl StoreError {
    /// Wraps an unexpected I/O error with path context.
    pub fn from_io(path: impl Into<PathBuf>, error: io::Error) -> Self {
        let path = path.into();
        match error.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(path),
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied(path),
            io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path),
            _ => StoreError::IoFailure {
                path,
                source: error,
            },
        }
    }

    /// True for validation failures that never touch the filesystem.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::PathOutsideRoot(_)
                | StoreError::PathMalformed(_)
                | StoreError::SymlinkRejected(_)
                | StoreError::InvalidBufferSize { .. }
                | StoreError::InvalidConfig(_)
        )
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::NotFound(p) => format!("'{}' does not exist", p.display()),
            StoreError::PathOutsideRoot(_) => {
                "That location is outside the storage folder".to_string()
            }
            StoreError::PathMalformed(p) => format!("'{p}' is not a valid path"),
            StoreError::SymlinkRejected(p) => format!("'{p}' is a link and cannot be used"),
            StoreError::QuotaExceeded { available, .. } => {
                format!("Storage quota exceeded, {available} bytes available")
            }
            StoreError::PermissionDenied(p) => format!("Access denied to '{}'", p.display()),
            StoreError::IoFailure { path, .. } => {
                format!("Could not access '{}', please try again", path.display())
            }
            StoreError::OperationCancelled => "Operation cancelled".to_string(),
            StoreError::AlreadyExists(p) => format!("'{}' already exists", p.display()),
            StoreError::NotADirectory(p) => format!("'{}' is not a folder", p.display()),
            StoreError::NotAFile(p) => format!("'{}' is not a file", p.display()),
            StoreError::InvalidBufferSize { min, max, .. } => {
                format!("Buffer size must be between {min} and {max} bytes")
            }
            StoreError::InvalidConfig(msg) => format!("Storage is misconfigured: {msg}"),
            StoreError::ShutDown => "Storage is no longer available".to_string(),
        }
    }
}

impl From<PathError> for StoreError {
    fn from(error: PathError) -> Self {
        match error {
            PathError::Empty => StoreError::PathMalformed(String::new()),
            PathError::Malformed { path, .. } => StoreError::PathMalformed(path),
            PathError::TooLong { path, .. } => StoreError::PathMalformed(path),
            PathError::OutsideRoot(p) => StoreError::PathOutsideRoot(p),
            PathError::SymlinkNotSupported(p) => StoreError::SymlinkRejected(p),
        }
    }
}

impl From<QuotaError> for StoreError {
    fn from(error: QuotaError) -> Self {
        match error {
            QuotaError::Exceeded {
                requested,
                available,
            } => StoreError::QuotaExceeded {
                requested,
                available,
            },
        }
    }
}
