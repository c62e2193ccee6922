//! Storage operations
//!
//! `SecureFileStore` is the facade the UI talks to. Every operation resolves
//! its path(s) through the path guard before touching the disk, mutating
//! operations consult the quota guard first, then take the per-path lock
//! for the OS work. The OS work runs inside a usage-cache mutation: on
//! success the cache gets the exact delta, or is invalidated where the
//! delta is unknown; on failure after I/O started it is invalidated.

use log::{debug, info};
use parking_lot::Mutex;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, File};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::config::{QuotaConfig, StoreOptions};
use crate::error::StoreError;
use crate::error::handlers::log_failure;
use crate::quota::{QuotaGuard, QuotaInfo, UsageCache, UsageWalker};
use crate::storage::filesystem::{self, TreeItem};
use crate::storage::locks::PathLocks;
use crate::storage::permissions;
use crate::storage::results::{FileEntry, FileProperties, OpenedFile};
use crate::storage::validation::{NormalizedPath, PathGuard};
use crate::transfer::file_ops::{self, Progress};
use crate::transfer::retry::retry_io;
use crate::watch::{
    ChangeEvent, ChangeKind, ChangeNotifier, EventBus, StoreEvent, SubscriberId, Subscription,
    WatchHandle,
};

/// Default for [`StoreOptions::large_file_threshold`].
pub const LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 80 * 1024;

pub struct SecureFileStore {
    config: QuotaConfig,
    options: StoreOptions,
    paths: PathGuard,
    cache: Arc<UsageCache>,
    quota: QuotaGuard,
    locks: PathLocks,
    events: Arc<EventBus>,
    watcher: Mutex<Option<WatchHandle>>,
    shut_down: AtomicBool,
}

impl SecureFileStore {
    /// Creates the root if needed and canonicalizes it.
    pub fn new(config: QuotaConfig, options: StoreOptions) -> Result<Self, StoreError> {
        Self::build(config, options, None)
    }

    /// Like [`SecureFileStore::new`] with a custom usage walk.
    pub fn with_usage_walker(
        config: QuotaConfig,
        options: StoreOptions,
        walker: UsageWalker,
    ) -> Result<Self, StoreError> {
        Self::build(config, options, Some(walker))
    }

    fn build(
        config: QuotaConfig,
        options: StoreOptions,
        walker: Option<UsageWalker>,
    ) -> Result<Self, StoreError> {
        let requested = config.root_path().to_path_buf();
        std::fs::create_dir_all(&requested).map_err(|e| StoreError::from_io(&requested, e))?;
        let paths = PathGuard::new(&requested).map_err(|e| StoreError::from_io(&requested, e))?;
        let config = config.with_root(paths.root().to_path_buf());

        let cache = Arc::new(match walker {
            Some(walker) => UsageCache::with_walker(paths.root(), walker),
            None => UsageCache::new(paths.root()),
        });
        let events = Arc::new(EventBus::new(options.event_capacity));
        let quota = QuotaGuard::new(
            config.clone(),
            Arc::clone(&cache),
            Arc::clone(&events),
            options.cache_ttl,
        );

        info!(
            "Storage root: {} (quota {} bytes, enforce {})",
            paths.root().display(),
            config.max_bytes(),
            config.enforce()
        );

        Ok(Self {
            config,
            options,
            paths,
            cache,
            quota,
            locks: PathLocks::new(),
            events,
            watcher: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    pub fn path_guard(&self) -> &PathGuard {
        &self.paths
    }

    pub fn usage_cache(&self) -> &Arc<UsageCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.events.unsubscribe(id)
    }

    pub async fn quota_info(&self, cancel: &CancellationToken) -> Result<QuotaInfo, StoreError> {
        self.ensure_open()?;
        self.quota.info(cancel).await
    }

    /// Starts forwarding external changes under the root. Calling it again
    /// while a watcher runs is a no-op. Needs a running tokio runtime.
    pub fn start_watching(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            debug!("Watcher already running for {}", self.root().display());
            return Ok(());
        }
        let notifier = ChangeNotifier::new(
            self.root().to_path_buf(),
            Arc::clone(&self.cache),
            Arc::clone(&self.events),
            self.options.watch_backend,
            self.options.poll_interval,
        );
        *slot = Some(notifier.start()?);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Stops the watcher, drops the lock table and closes subscriber queues.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.watcher.lock().take() {
            handle.stop();
        }
        self.locks.clear();
        self.events.close();
        info!("Storage at {} shut down", self.root().display());
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_shut_down() {
            return Err(StoreError::ShutDown);
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> Result<NormalizedPath, StoreError> {
        Ok(self.paths.resolve(path)?)
    }

    fn resolve_below_root(&self, path: &str) -> Result<NormalizedPath, StoreError> {
        let resolved = self.resolve(path)?;
        if resolved.as_path() == self.root() {
            return Err(StoreError::PathMalformed(format!(
                "{path} refers to the storage root"
            )));
        }
        Ok(resolved)
    }

    fn publish(&self, event: ChangeEvent) {
        self.events.publish(StoreEvent::FileSystemChanged(event));
    }

    fn finish<T>(&self, operation: &str, path: &str, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(e) = &result {
            log_failure(operation, path, e);
        }
        result
    }

    // ─── Read-only operations ───

    /// Visible children of a directory, sorted by name. Hidden, system,
    /// unreadable and linked entries are left out.
    pub async fn list(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<FileEntry>, StoreError> {
        info!("list {path}");
        let result = self.list_inner(path, cancel).await;
        self.finish("list", path, result)
    }

    async fn list_inner(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<FileEntry>, StoreError> {
        self.ensure_open()?;
        let dir = self.resolve(path)?;
        let dir = dir.as_path();
        let meta = fs::metadata(dir)
            .await
            .map_err(|e| StoreError::from_io(dir, e))?;
        if !meta.is_dir() {
            return Err(StoreError::NotADirectory(dir.to_path_buf()));
        }

        let mut reader = fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::from_io(dir, e))?;
        let mut entries = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::OperationCancelled);
            }
            let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| StoreError::from_io(dir, e))?
            else {
                break;
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Skipping inaccessible {}: {e}", entry.path().display());
                    continue;
                }
            };
            if meta.file_type().is_symlink() || filesystem::is_hidden(&entry.file_name(), &meta) {
                continue;
            }
            entries.push(FileEntry::from_metadata(entry.path(), &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} ({} entries)", dir.display(), entries.len());
        Ok(entries)
    }

    /// `list` narrowed to files whose name ends with `.ext`, ignoring case.
    pub async fn list_by_extension(
        &self,
        path: &str,
        extension: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileEntry>, StoreError> {
        let suffix = format!(".{}", extension.trim_start_matches('.').to_lowercase());
        let entries = self.list(path, cancel).await?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_directory && e.name.to_lowercase().ends_with(&suffix))
            .collect())
    }

    /// Opens a file for reading. Files under the configured large-file
    /// threshold come back fully buffered; larger ones as an open stream.
    pub async fn open(&self, path: &str, cancel: &CancellationToken) -> Result<OpenedFile, StoreError> {
        info!("open {path}");
        let result = self.open_inner(path, cancel).await;
        self.finish("open", path, result)
    }

    async fn open_inner(&self, path: &str, cancel: &CancellationToken) -> Result<OpenedFile, StoreError> {
        self.ensure_open()?;
        let target = self.resolve(path)?;
        PathGuard::check_length(&target)?;
        let target = target.as_path();
        let meta = fs::metadata(target)
            .await
            .map_err(|e| StoreError::from_io(target, e))?;
        if meta.is_dir() {
            return Err(StoreError::NotAFile(target.to_path_buf()));
        }
        permissions::check_readable(&meta, target)?;
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }

        if meta.len() < self.options.large_file_threshold {
            let data = retry_io("read", || fs::read(target))
                .await
                .map_err(|e| StoreError::from_io(target, e))?;
            Ok(OpenedFile::Buffered(Cursor::new(data)))
        } else {
            let file = retry_io("open", || File::open(target))
                .await
                .map_err(|e| StoreError::from_io(target, e))?;
            Ok(OpenedFile::Stream {
                file,
                len: meta.len(),
            })
        }
    }

    /// Size, timestamps, read-only flag and a quota snapshot.
    pub async fn properties(&self, path: &str, cancel: &CancellationToken) -> Result<FileProperties, StoreError> {
        info!("properties {path}");
        let result = self.properties_inner(path, cancel).await;
        self.finish("properties", path, result)
    }

    async fn properties_inner(&self, path: &str, cancel: &CancellationToken) -> Result<FileProperties, StoreError> {
        self.ensure_open()?;
        let target = self.resolve(path)?.into_path_buf();
        let meta = fs::symlink_metadata(&target)
            .await
            .map_err(|e| StoreError::from_io(&target, e))?;
        let size_bytes = if meta.is_dir() {
            let root = target.clone();
            let token = cancel.clone();
            run_blocking(&target, move || filesystem::tree_size(&root, &token)).await?
        } else {
            meta.len()
        };
        let quota = self.quota.info(cancel).await?;
        Ok(FileProperties {
            is_directory: meta.is_dir(),
            size_bytes,
            created_at: meta.created().ok(),
            modified_at: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            read_only: permissions::is_read_only(&meta),
            quota,
            path: target,
        })
    }

    // ─── Mutating operations ───

    /// Creates or truncates `path` with the contents of `reader`.
    ///
    /// The quota check up front uses `length` when the caller knows it,
    /// otherwise `buffer_size` as a lower bound. The stream is also held to
    /// the space left under the quota: once it would reach the limit the
    /// write stops with `QuotaExceeded` and the file is removed (a previous
    /// version of it is already truncated by then). Parent directories are
    /// created. Returns the number of bytes written.
    pub async fn write<R>(
        &self,
        path: &str,
        reader: &mut R,
        length: Option<u64>,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        info!("write {path}");
        let result = self.write_inner(path, reader, length, buffer_size, cancel).await;
        self.finish("write", path, result)
    }

    /// [`SecureFileStore::write`] for an in-memory payload.
    pub async fn write_bytes(&self, path: &str, data: &[u8], cancel: &CancellationToken) -> Result<u64, StoreError> {
        let mut reader = data;
        self.write(path, &mut reader, Some(data.len() as u64), DEFAULT_BUFFER_SIZE, cancel)
            .await
    }

    async fn write_inner<R>(
        &self,
        path: &str,
        reader: &mut R,
        length: Option<u64>,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.ensure_open()?;
        let target = self.resolve_below_root(path)?;
        PathGuard::check_length(&target)?;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&buffer_size) {
            return Err(StoreError::InvalidBufferSize {
                size: buffer_size,
                min: MIN_BUFFER_SIZE,
                max: MAX_BUFFER_SIZE,
            });
        }
        let target = target.as_path();
        existing_file_size(target).await?;

        let required = length.unwrap_or(buffer_size as u64);
        self.quota.validate(required, cancel).await?;

        let _lock = self.locks.acquire(target, cancel).await?;
        let old_size = existing_file_size(target).await?;
        let limit = if self.config.enforce() {
            let current = self.quota.info(cancel).await?.current_usage_bytes;
            Some(self.config.max_bytes().saturating_sub(current) + old_size.unwrap_or(0))
        } else {
            None
        };
        let mutation = self.cache.begin_mutation();

        match file_ops::write_stream(reader, target, buffer_size, limit, cancel).await {
            Ok(written) => {
                let delta = written as i64 - old_size.unwrap_or(0) as i64;
                mutation.commit(delta);
                let kind = if old_size.is_some() {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Created
                };
                self.publish(ChangeEvent::new(kind, target));
                info!("Wrote {} ({written} bytes, delta {delta})", target.display());
                Ok(written)
            }
            Err(e) => {
                if matches!(e, StoreError::QuotaExceeded { .. }) {
                    if let Err(remove) = fs::remove_file(target).await {
                        debug!("Could not remove {}: {remove}", target.display());
                    }
                }
                mutation.discard();
                Err(e)
            }
        }
    }

    /// Creates `path` and any missing parents. Existing directories are left alone.
    pub async fn create_directory(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        info!("create_directory {path}");
        let result = self.create_directory_inner(path, cancel).await;
        self.finish("create_directory", path, result)
    }

    async fn create_directory_inner(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.ensure_open()?;
        let target = self.resolve(path)?;
        self.make_directory(target.as_path(), cancel).await
    }

    /// [`SecureFileStore::create_directory`] for a root-relative path taken
    /// from a directory walk. See [`PathGuard::rebase`].
    pub async fn create_walked_directory(&self, relative: &Path, cancel: &CancellationToken) -> Result<(), StoreError> {
        let label = relative.display().to_string();
        info!("create_directory {label}");
        let result = async {
            self.ensure_open()?;
            let target = self.paths.rebase(relative)?;
            self.make_directory(target.as_path(), cancel).await
        }
        .await;
        self.finish("create_directory", &label, result)
    }

    async fn make_directory(&self, target: &Path, cancel: &CancellationToken) -> Result<(), StoreError> {
        let _lock = self.locks.acquire(target, cancel).await?;
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        match fs::symlink_metadata(target).await {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(StoreError::AlreadyExists(target.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::from_io(target, e)),
        }
        retry_io("create_dir", || fs::create_dir_all(target))
            .await
            .map_err(|e| StoreError::from_io(target, e))?;
        self.publish(ChangeEvent::new(ChangeKind::Created, target));
        Ok(())
    }

    /// Removes a file, or a directory tree children-first.
    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        info!("delete {path}");
        let result = self.delete_inner(path, cancel).await;
        self.finish("delete", path, result)
    }

    async fn delete_inner(&self, path: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.ensure_open()?;
        let target = self.resolve_below_root(path)?.into_path_buf();
        let _lock = self.locks.acquire(&target, cancel).await?;
        let meta = fs::symlink_metadata(&target)
            .await
            .map_err(|e| StoreError::from_io(&target, e))?;
        let mutation = self.cache.begin_mutation();
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }

        let removed = if meta.is_dir() {
            let root = target.clone();
            let token = cancel.clone();
            let items =
                run_blocking(&target, move || filesystem::collect_tree(&root, true, &token)).await?;
            let size: u64 = items.iter().map(|i| i.size).sum();
            remove_tree(&target, &items, cancel).await?;
            size
        } else {
            retry_io("remove_file", || fs::remove_file(&target))
                .await
                .map_err(|e| StoreError::from_io(&target, e))?;
            meta.len()
        };

        mutation.commit(-(removed as i64));
        self.publish(ChangeEvent::new(ChangeKind::Deleted, &target));
        info!("Deleted {} ({removed} bytes)", target.display());
        Ok(())
    }

    /// Copies a file or directory tree. The quota is checked against the
    /// full source size before anything is written. `progress` receives the
    /// completed fraction after each chunk (file) or item (directory).
    pub async fn copy(
        &self,
        source: &str,
        destination: &str,
        progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        info!("copy {source} -> {destination}");
        let result = self.copy_inner(source, destination, progress, cancel).await;
        self.finish("copy", source, result)
    }

    async fn copy_inner(
        &self,
        source: &str,
        destination: &str,
        progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let src = self.resolve_below_root(source)?.into_path_buf();
        let dst = self.resolve_below_root(destination)?.into_path_buf();
        let meta = fs::symlink_metadata(&src)
            .await
            .map_err(|e| StoreError::from_io(&src, e))?;
        if dst.starts_with(&src) {
            return Err(StoreError::PathMalformed(format!(
                "cannot copy {source} into itself"
            )));
        }
        if fs::symlink_metadata(&dst).await.is_ok() {
            return Err(StoreError::AlreadyExists(dst));
        }

        let total = if meta.is_dir() {
            let root = src.clone();
            let token = cancel.clone();
            run_blocking(&src, move || filesystem::tree_size(&root, &token)).await?
        } else {
            meta.len()
        };
        self.quota.validate(total, cancel).await?;

        let _lock = self.locks.acquire(&dst, cancel).await?;
        let mutation = self.cache.begin_mutation();
        let result = if meta.is_dir() {
            copy_tree(&src, &dst, progress, cancel).await
        } else {
            file_ops::copy_file_chunked(&src, &dst, progress, cancel).await
        };

        match result {
            Ok(copied) => {
                mutation.commit(copied as i64);
                self.publish(ChangeEvent::new(ChangeKind::Created, &dst));
                Ok(copied)
            }
            Err(e) => {
                mutation.discard();
                Err(e)
            }
        }
    }

    /// Moves `old` to `new`. The destination must not exist.
    pub async fn rename(&self, old: &str, new: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        info!("rename {old} -> {new}");
        let result = self.rename_inner(old, new, cancel).await;
        self.finish("rename", old, result)
    }

    async fn rename_inner(&self, old: &str, new: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.ensure_open()?;
        let src = self.resolve_below_root(old)?.into_path_buf();
        let dst = self.resolve_below_root(new)?.into_path_buf();
        let (_first, _second) = self.locks.acquire_pair(&src, &dst, cancel).await?;
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        fs::symlink_metadata(&src)
            .await
            .map_err(|e| StoreError::from_io(&src, e))?;
        if src == dst {
            return Ok(());
        }
        if fs::symlink_metadata(&dst).await.is_ok() {
            return Err(StoreError::AlreadyExists(dst));
        }
        let created = missing_ancestors(&dst).await;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::from_io(parent, e))?;
        }

        let mutation = self.cache.begin_mutation();
        let outcome = retry_io("rename", || fs::rename(&src, &dst))
            .await
            .map_err(|e| StoreError::from_io(&src, e));
        // Size is unchanged but a rename may cross counted boundaries.
        mutation.discard();
        if outcome.is_err() {
            remove_empty_dirs(&created).await;
        }
        outcome?;
        self.publish(ChangeEvent::renamed(&src, &dst));
        Ok(())
    }

    /// Copies a file from outside this store to `destination`, a path
    /// relative to the root taken from a directory walk, with the same
    /// quota, locking and accounting as [`SecureFileStore::copy`].
    pub async fn import_file(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let label = source.display().to_string();
        let result = self.import_file_inner(source, destination, progress, cancel).await;
        self.finish("import", &label, result)
    }

    async fn import_file_inner(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let dst = self.paths.rebase(destination)?.into_path_buf();
        let meta = fs::symlink_metadata(source)
            .await
            .map_err(|e| StoreError::from_io(source, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotAFile(source.to_path_buf()));
        }
        self.quota.validate(meta.len(), cancel).await?;

        let _lock = self.locks.acquire(&dst, cancel).await?;
        let old_size = existing_file_size(&dst).await?;
        let mutation = self.cache.begin_mutation();
        match file_ops::copy_file_chunked(source, &dst, progress, cancel).await {
            Ok(copied) => {
                mutation.commit(copied as i64 - old_size.unwrap_or(0) as i64);
                self.publish(ChangeEvent::new(ChangeKind::Created, &dst));
                Ok(copied)
            }
            Err(e) => {
                mutation.discard();
                Err(e)
            }
        }
    }
}

impl Drop for SecureFileStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Size of an existing regular file, `None` if absent. Directories are rejected.
async fn existing_file_size(path: &Path) -> Result<Option<u64>, StoreError> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(StoreError::NotAFile(path.to_path_buf())),
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::from_io(path, e)),
    }
}

/// Ancestors of `path` that do not exist yet, deepest first.
async fn missing_ancestors(path: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if fs::symlink_metadata(dir).await.is_ok() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing
}

/// Removes directories in order, stopping at the first one that is not empty.
async fn remove_empty_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(e) = fs::remove_dir(dir).await {
            debug!("Leaving {}: {e}", dir.display());
            break;
        }
    }
}

async fn run_blocking<T, F>(path: &Path, work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::IoFailure {
            path: path.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })?
}

/// Deletes `items` (children first) and then `root`, each step retried.
async fn remove_tree(root: &Path, items: &[TreeItem], cancel: &CancellationToken) -> Result<(), StoreError> {
    for item in items {
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        let path = item.path.as_path();
        let removed = if item.is_dir {
            retry_io("remove_dir", || fs::remove_dir(path)).await
        } else {
            retry_io("remove_file", || fs::remove_file(path)).await
        };
        removed.map_err(|e| StoreError::from_io(path, e))?;
    }
    retry_io("remove_dir", || fs::remove_dir(root))
        .await
        .map_err(|e| StoreError::from_io(root, e))
}

/// Recreates `src` under `dst`, one item at a time. Links are skipped.
async fn copy_tree(
    src: &Path,
    dst: &Path,
    progress: Option<Progress<'_>>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError> {
    let root = src.to_path_buf();
    let token = cancel.clone();
    let items = run_blocking(src, move || filesystem::collect_tree(&root, false, &token)).await?;

    fs::create_dir_all(dst)
        .await
        .map_err(|e| StoreError::from_io(dst, e))?;

    let total = items.len() as u64;
    let mut copied = 0u64;
    for (done, item) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        let relative = item
            .path
            .strip_prefix(src)
            .map_err(|_| StoreError::PathOutsideRoot(item.path.display().to_string()))?;
        let target: PathBuf = dst.join(relative);
        if item.is_dir {
            fs::create_dir_all(&target)
                .await
                .map_err(|e| StoreError::from_io(&target, e))?;
        } else if item.is_file {
            copied += file_ops::copy_file_chunked(&item.path, &target, None, cancel).await?;
        }
        if let Some(report) = progress {
            report(file_ops::fraction(done as u64 + 1, total));
        }
    }
    if total == 0 {
        if let Some(report) = progress {
            report(1.0);
        }
    }
    Ok(copied)
}
