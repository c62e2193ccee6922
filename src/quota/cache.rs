//! Usage cache
//!
//! Memoizes the total byte count under the root. A hit is valid while it is
//! younger than the caller's TTL. Recomputation walks the tree without
//! holding the lock and publishes under a short exclusive lock; a walk that
//! overlapped a mutation, invalidation or delta is returned but not cached.

use log::debug;
use parking_lot::RwLock;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::storage::filesystem;

/// Computes the byte total of a tree. Swappable so the walk can be observed.
pub type UsageWalker =
    Arc<dyn Fn(&Path, &CancellationToken) -> Result<u64, StoreError> + Send + Sync>;

struct CacheState {
    cached_bytes: Option<u64>,
    last_checked: Instant,
    generation: u64,
    in_flight: u32,
}

impl CacheState {
    fn adjust(&mut self, delta: i64) {
        if let Some(bytes) = self.cached_bytes.as_mut() {
            *bytes = if delta < 0 {
                bytes.saturating_sub(delta.unsigned_abs())
            } else {
                bytes.saturating_add(delta as u64)
            };
        }
    }
}

pub struct UsageCache {
    root: PathBuf,
    state: RwLock<CacheState>,
    walker: UsageWalker,
}

impl UsageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_walker(root, Arc::new(filesystem::tree_size))
    }

    pub fn with_walker(root: impl Into<PathBuf>, walker: UsageWalker) -> Self {
        Self {
            root: root.into(),
            state: RwLock::new(CacheState {
                cached_bytes: None,
                last_checked: Instant::now(),
                generation: 0,
                in_flight: 0,
            }),
            walker,
        }
    }

    /// The cached value, if present and younger than `ttl`.
    pub fn cached(&self, ttl: Duration) -> Option<u64> {
        let state = self.state.read();
        match state.cached_bytes {
            Some(bytes) if state.last_checked.elapsed() < ttl => Some(bytes),
            _ => None,
        }
    }

    /// Total bytes under the root, walking the tree on a miss.
    pub async fn current_usage(
        &self,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        if let Some(bytes) = self.cached(ttl) {
            return Ok(bytes);
        }

        let (generation, quiet) = {
            let state = self.state.read();
            (state.generation, state.in_flight == 0)
        };
        let root = self.root.clone();
        let walker = Arc::clone(&self.walker);
        let token = cancel.clone();
        let bytes = tokio::task::spawn_blocking(move || walker(&root, &token))
            .await
            .map_err(|e| StoreError::IoFailure {
                path: self.root.clone(),
                source: io::Error::other(e.to_string()),
            })??;

        let mut state = self.state.write();
        if quiet && state.generation == generation {
            state.cached_bytes = Some(bytes);
            state.last_checked = Instant::now();
        } else {
            debug!("Usage walk of {} overlapped a mutation, not caching", self.root.display());
        }
        Ok(bytes)
    }

    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.cached_bytes = None;
        state.generation += 1;
    }

    /// Adjusts a cached value in place. No-op when nothing is cached.
    pub fn apply_delta(&self, delta: i64) {
        let mut state = self.state.write();
        state.generation += 1;
        state.adjust(delta);
    }

    /// Marks a mutation as running until the returned ticket is committed
    /// or dropped. Walks overlapping it are not cached.
    pub fn begin_mutation(&self) -> Mutation<'_> {
        let mut state = self.state.write();
        state.in_flight += 1;
        state.generation += 1;
        Mutation {
            cache: self,
            finished: false,
        }
    }

    fn end_mutation(&self, delta: Option<i64>) {
        let mut state = self.state.write();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.generation += 1;
        match delta {
            Some(delta) => state.adjust(delta),
            None => state.cached_bytes = None,
        }
    }
}

/// An in-progress mutation. Dropping it without [`Mutation::commit`]
/// invalidates the cache.
pub struct Mutation<'a> {
    cache: &'a UsageCache,
    finished: bool,
}

impl Mutation<'_> {
    /// Applies the exact size change of the finished mutation.
    pub fn commit(mut self, delta: i64) {
        self.finished = true;
        self.cache.end_mutation(Some(delta));
    }

    /// Ends the mutation with the size change unknown.
    pub fn discard(self) {}
}

impl Drop for Mutation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.end_mutation(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(300);

    fn counting_cache(bytes: u64) -> (UsageCache, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let walker: UsageWalker = Arc::new(move |_: &Path, _: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(bytes)
        });
        (UsageCache::with_walker("/unused", walker), calls)
    }

    #[tokio::test]
    async fn second_call_within_ttl_does_not_rewalk() {
        let (cache, calls) = counting_cache(4096);
        let cancel = CancellationToken::new();
        assert_eq!(cache.current_usage(TTL, &cancel).await.unwrap(), 4096);
        assert_eq!(cache.current_usage(TTL, &cancel).await.unwrap(), 4096);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expiry_and_invalidation_force_a_walk() {
        let (cache, calls) = counting_cache(10);
        let cancel = CancellationToken::new();
        cache.current_usage(TTL, &cancel).await.unwrap();
        cache.current_usage(Duration::ZERO, &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.invalidate();
        assert_eq!(cache.cached(TTL), None);
        cache.current_usage(TTL, &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delta_adjusts_without_walking() {
        let (cache, calls) = counting_cache(100);
        let cancel = CancellationToken::new();
        cache.current_usage(TTL, &cancel).await.unwrap();
        cache.apply_delta(200);
        assert_eq!(cache.current_usage(TTL, &cancel).await.unwrap(), 300);
        cache.apply_delta(-1000);
        assert_eq!(cache.cached(TTL), Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delta_on_empty_cache_is_ignored() {
        let (cache, _) = counting_cache(7);
        cache.apply_delta(50);
        assert_eq!(cache.cached(TTL), None);
    }

    #[tokio::test]
    async fn walk_overlapping_a_mutation_is_not_cached() {
        let (cache, calls) = counting_cache(100);
        let cancel = CancellationToken::new();
        let mutation = cache.begin_mutation();
        assert_eq!(cache.current_usage(TTL, &cancel).await.unwrap(), 100);
        assert_eq!(cache.cached(TTL), None);
        mutation.commit(50);

        cache.current_usage(TTL, &cancel).await.unwrap();
        let mutation = cache.begin_mutation();
        mutation.commit(50);
        assert_eq!(cache.cached(TTL), Some(150));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_mutation_invalidates() {
        let (cache, _) = counting_cache(100);
        cache.current_usage(TTL, &CancellationToken::new()).await.unwrap();
        drop(cache.begin_mutation());
        assert_eq!(cache.cached(TTL), None);
    }

    #[tokio::test]
    async fn missing_root_counts_as_zero() {
        let dir = TempDir::new().unwrap();
        let cache = UsageCache::new(dir.path().join("gone"));
        let usage = cache
            .current_usage(TTL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(usage, 0);
    }

    #[tokio::test]
    async fn walks_real_tree() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 120]).unwrap();
        std::fs::write(dir.path().join("sub/b.bin"), vec![0u8; 80]).unwrap();
        let cache = UsageCache::new(dir.path());
        let usage = cache
            .current_usage(TTL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(usage, 200);
    }

    #[tokio::test]
    async fn cancelled_walk_surfaces_cancellation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        let cache = UsageCache::new(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cache.current_usage(TTL, &cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::OperationCancelled));
    }
}
