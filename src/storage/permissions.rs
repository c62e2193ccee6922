//! File permissions
//!
//! Read checks before opening and the read-only flag reported by properties.

use std::fs::Metadata;
use std::path::Path;

use crate::error::StoreError;

pub fn is_read_only(meta: &Metadata) -> bool {
    meta.permissions().readonly()
}

/// Fails with `PermissionDenied` when no read bit is set.
#[cfg(unix)]
pub fn check_readable(meta: &Metadata, path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o444 == 0 {
        return Err(StoreError::PermissionDenied(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_readable(_meta: &Metadata, _path: &Path) -> Result<(), StoreError> {
    Ok(())
}
