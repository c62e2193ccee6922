//! Error handlers
//!
//! Logging at the store boundary.

use crate::error::types::StoreError;
use log::{error, warn};

/// Log a failed operation at a level matching its kind.
pub fn log_failure(operation: &str, path: &str, err: &StoreError) {
    match err {
        StoreError::IoFailure { .. } => {
            error!("{operation} failed on {path}: {err}");
        }
        StoreError::OperationCancelled => {
            warn!("{operation} cancelled on {path}");
        }
        StoreError::PermissionDenied(_) => {
            warn!("{operation} denied on {path}: {err}");
        }
        _ => {
            warn!("{operation} rejected on {path}: {err}");
        }
    }
}
