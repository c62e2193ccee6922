//! File system storage management
//!
//! The store facade plus the path guard, lock table, permission checks and
//! tree walks it is built from.

pub mod filesystem;
pub mod locks;
pub mod operations;
pub mod permissions;
pub mod results;
pub mod validation;

// Re-export commonly used types
pub use operations::{
    DEFAULT_BUFFER_SIZE, LARGE_FILE_THRESHOLD, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE, SecureFileStore,
};
pub use results::{FileEntry, FileProperties, OpenedFile};
pub use validation::{MAX_PATH_LENGTH, NormalizedPath, PathGuard};
