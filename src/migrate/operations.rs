//! Migration operations
//!
//! Walks the source root breadth-first and replays it into a destination
//! store, so every file goes through the destination's path guard, quota
//! and lock table. The live store keeps its root; the caller switches over
//! by building a new store once this returns.

use log::{debug, info};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::error::handlers::log_failure;
use crate::migrate::results::MigrationReport;
use crate::storage::SecureFileStore;
use crate::storage::validation::PathGuard;
use crate::transfer::file_ops::{Progress, fraction};

pub struct MigrationCoordinator<'a> {
    source: &'a SecureFileStore,
}

/// Work discovered by the source walk, in breadth-first order.
#[derive(Debug, Default)]
struct Plan {
    directories: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl<'a> MigrationCoordinator<'a> {
    pub fn new(source: &'a SecureFileStore) -> Self {
        Self { source }
    }

    /// Copies the source tree under `new_root`, creating it if needed.
    /// `progress` receives files copied over total files.
    pub async fn migrate(
        &self,
        new_root: &str,
        progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, StoreError> {
        info!("migrate {} -> {new_root}", self.source.root().display());
        let result = self.migrate_inner(new_root, progress, cancel).await;
        if let Err(e) = &result {
            log_failure("migrate", new_root, e);
        }
        result
    }

    async fn migrate_inner(
        &self,
        new_root: &str,
        progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, StoreError> {
        let requested = PathGuard::validate(new_root)?.into_path_buf();
        fs::create_dir_all(&requested)
            .await
            .map_err(|e| StoreError::from_io(&requested, e))?;
        let destination_root = PathGuard::new(&requested)
            .map_err(|e| StoreError::from_io(&requested, e))?
            .root()
            .to_path_buf();

        let source_root = self.source.root();
        if destination_root == source_root {
            info!("Migration skipped, {} is already the root", destination_root.display());
            return Ok(MigrationReport {
                skipped: true,
                ..MigrationReport::default()
            });
        }
        if destination_root.starts_with(source_root) {
            return Err(StoreError::PathMalformed(format!(
                "{new_root} is inside the current storage root"
            )));
        }

        let destination = SecureFileStore::new(
            self.source.config().with_root(destination_root.clone()),
            self.source.options().clone(),
        )?;
        let usage = self.source.quota_info(cancel).await?.current_usage_bytes;
        destination.quota().validate(usage, cancel).await?;

        let plan = walk_breadth_first(source_root, cancel).await?;
        debug!(
            "Migration plan: {} directories, {} files",
            plan.directories.len(),
            plan.files.len()
        );

        let mut report = MigrationReport::default();
        for dir in &plan.directories {
            let target = relative_to(source_root, dir)?;
            destination.create_walked_directory(target, cancel).await?;
            report.directories_created += 1;
        }

        let total = plan.files.len() as u64;
        for file in &plan.files {
            let target = relative_to(source_root, file)?;
            report.bytes_copied += destination.import_file(file, target, None, cancel).await?;
            report.files_copied += 1;
            if let Some(report_progress) = progress {
                report_progress(fraction(report.files_copied, total));
            }
        }
        if total == 0 {
            if let Some(report_progress) = progress {
                report_progress(1.0);
            }
        }

        destination.shutdown();
        info!(
            "Migrated {} files ({} bytes) to {}",
            report.files_copied,
            report.bytes_copied,
            destination_root.display()
        );
        Ok(report)
    }
}

/// `path` relative to the source root. The destination store re-roots it.
fn relative_to<'p>(source_root: &Path, path: &'p Path) -> Result<&'p Path, StoreError> {
    path.strip_prefix(source_root)
        .map_err(|_| StoreError::PathOutsideRoot(path.display().to_string()))
}

async fn walk_breadth_first(root: &Path, cancel: &CancellationToken) -> Result<Plan, StoreError> {
    let mut plan = Plan::default();
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::from_io(&dir, e))?;
        let mut children = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&dir, e))?
        {
            if cancel.is_cancelled() {
                return Err(StoreError::OperationCancelled);
            }
            children.push(entry);
        }
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::from_io(entry.path(), e))?;
            if file_type.is_dir() {
                plan.directories.push(entry.path());
                queue.push_back(entry.path());
            } else if file_type.is_file() {
                plan.files.push(entry.path());
            } else {
                debug!("Not migrating link {}", entry.path().display());
            }
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuotaConfig, StoreOptions};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn store_at(root: &Path, max: u64) -> SecureFileStore {
        let config = QuotaConfig::new(root, max).unwrap();
        SecureFileStore::new(config, StoreOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn copies_tree_breadth_first() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let store = store_at(source_dir.path(), 100_000);
        let cancel = CancellationToken::new();
        store.write_bytes("top.txt", b"12", &cancel).await.unwrap();
        store.write_bytes("a/b/deep.txt", b"123", &cancel).await.unwrap();
        store.create_directory("empty", &cancel).await.unwrap();

        let seen = Mutex::new(Vec::new());
        let report_fn = |f: f64| seen.lock().push(f);
        let new_root = target_dir.path().join("moved");
        let report = MigrationCoordinator::new(&store)
            .migrate(&new_root.to_string_lossy(), Some(&report_fn), &cancel)
            .await
            .unwrap();

        assert!(!report.skipped);
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.directories_created, 3);
        assert_eq!(report.bytes_copied, 5);
        assert_eq!(std::fs::read(new_root.join("a/b/deep.txt")).unwrap(), b"123");
        assert!(new_root.join("empty").is_dir());
        assert_eq!(*seen.lock(), vec![0.5, 1.0]);
        // Source is untouched.
        assert!(store.root().join("top.txt").exists());
    }

    #[tokio::test]
    async fn names_with_tilde_are_migrated() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let store = store_at(source_dir.path(), 100_000);
        let cancel = CancellationToken::new();
        store.write_bytes("a.txt", b"a", &cancel).await.unwrap();
        std::fs::create_dir(store.root().join("backup~")).unwrap();
        std::fs::write(store.root().join("backup~/notes~"), b"old").unwrap();
        std::fs::write(store.root().join("~$report.docx"), b"lock").unwrap();

        let new_root = target_dir.path().join("moved");
        let report = MigrationCoordinator::new(&store)
            .migrate(&new_root.to_string_lossy(), None, &cancel)
            .await
            .unwrap();

        assert_eq!(report.files_copied, 3);
        assert_eq!(report.directories_created, 1);
        assert_eq!(std::fs::read(new_root.join("backup~/notes~")).unwrap(), b"old");
        assert_eq!(std::fs::read(new_root.join("~$report.docx")).unwrap(), b"lock");
        assert!(new_root.join("a.txt").exists());
    }

    #[tokio::test]
    async fn same_root_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store_at(dir.path(), 1000);
        let report = MigrationCoordinator::new(&store)
            .migrate(&dir.path().to_string_lossy(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.skipped);
        assert_eq!(report.files_copied, 0);
    }

    #[tokio::test]
    async fn destination_inside_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_at(dir.path(), 1000);
        let inner = store.root().join("nested");
        let err = MigrationCoordinator::new(&store)
            .migrate(&inner.to_string_lossy(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PathMalformed(_)));
    }

    #[tokio::test]
    async fn destination_quota_is_checked_first() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let store = store_at(source_dir.path(), 1000);
        let cancel = CancellationToken::new();
        store.write_bytes("a.bin", &[0u8; 500], &cancel).await.unwrap();
        std::fs::write(target_dir.path().join("existing.bin"), vec![0u8; 600]).unwrap();

        let err = MigrationCoordinator::new(&store)
            .migrate(&target_dir.path().to_string_lossy(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::QuotaExceeded {
                requested: 500,
                available: 400
            }
        ));
        assert!(!target_dir.path().join("a.bin").exists());
    }
}
