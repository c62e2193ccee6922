//! Per-path lock table
//!
//! One async mutex per normalized path, created on first use and kept until
//! the table is cleared at shutdown. Holding the guard serializes mutating
//! operations against that exact path only.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

pub type PathLockGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct PathLocks {
    table: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock();
        Arc::clone(
            table
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Waits for exclusive access to `path`, giving up on cancellation. A
    /// free lock is always taken; callers check the token afterwards.
    pub async fn acquire(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathLockGuard, StoreError> {
        let lock = self.entry(path);
        tokio::select! {
            biased;
            guard = lock.lock_owned() => Ok(guard),
            _ = cancel.cancelled() => Err(StoreError::OperationCancelled),
        }
    }

    /// Locks two paths in a fixed order so opposing calls cannot deadlock.
    pub async fn acquire_pair(
        &self,
        a: &Path,
        b: &Path,
        cancel: &CancellationToken,
    ) -> Result<(PathLockGuard, Option<PathLockGuard>), StoreError> {
        if a == b {
            return Ok((self.acquire(a, cancel).await?, None));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.acquire(first, cancel).await?;
        let second = self.acquire(second, cancel).await?;
        Ok((first, Some(second)))
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.table.lock().clear();
    }
}
