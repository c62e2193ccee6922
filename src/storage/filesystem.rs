//! File system operations
//!
//! Blocking tree walks used by the store. Each walk polls the cancellation
//! token once per entry. Symlinks are never followed.

use log::debug;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::StoreError;

/// One node of a walked tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub path: PathBuf,
    pub is_dir: bool,
    /// False for directories and for links.
    pub is_file: bool,
    pub size: u64,
}

/// Total size in bytes of the regular files under `root`. A missing root
/// counts as empty. Unreadable entries are skipped.
pub fn tree_size(root: &Path, cancel: &CancellationToken) -> Result<u64, StoreError> {
    let meta = match std::fs::symlink_metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::from_io(root, e)),
    };
    if meta.is_file() {
        return Ok(meta.len());
    }

    let mut total = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

/// Every node below `root` (excluding `root`). Parents come before their
/// children unless `children_first` is set. Siblings are in name order.
pub fn collect_tree(
    root: &Path,
    children_first: bool,
    cancel: &CancellationToken,
) -> Result<Vec<TreeItem>, StoreError> {
    let mut items = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .contents_first(children_first)
        .sort_by_file_name();
    for entry in walker {
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            match e.into_io_error() {
                Some(io) => StoreError::from_io(path, io),
                None => StoreError::IoFailure {
                    path,
                    source: io::Error::other("filesystem loop"),
                },
            }
        })?;
        let file_type = entry.file_type();
        let size = if file_type.is_file() {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        items.push(TreeItem {
            path: entry.into_path(),
            is_dir: file_type.is_dir(),
            is_file: file_type.is_file(),
            size,
        });
    }
    Ok(items)
}

/// Hidden or system entries that listings leave out.
pub fn is_hidden(name: &OsStr, meta: &Metadata) -> bool {
    if name.to_string_lossy().starts_with('.') {
        return true;
    }
    has_hidden_attribute(meta)
}

#[cfg(windows)]
fn has_hidden_attribute(meta: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    meta.file_attributes() & (FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM) != 0
}

#[cfg(not(windows))]
fn has_hidden_attribute(_meta: &Metadata) -> bool {
    false
}
