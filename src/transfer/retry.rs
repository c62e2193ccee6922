//! Retry for transient I/O failures.
//!
//! Attempt `i` (0-indexed) that fails transiently sleeps `(i + 1) * 100ms`
//! before the next one. The final failure is returned without sleeping.
//! Non-transient errors are returned immediately.

use log::warn;
use std::future::Future;
use std::io;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Classifies errors that are safe to retry.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for io::Error {
    fn is_transient(&self) -> bool {
        if matches!(
            self.kind(),
            io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
                | io::ErrorKind::ResourceBusy
        ) {
            return true;
        }
        // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
        cfg!(windows) && matches!(self.raw_os_error(), Some(32) | Some(33))
    }
}

/// Runs `action` up to `max_attempts` times.
pub async fn retry<T, E, F, Fut>(operation: &str, max_attempts: usize, mut action: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let delay = BACKOFF_STEP * (attempt as u32 + 1);
                warn!(
                    "{operation}: transient failure (attempt {}/{}): {e}. Retrying in {delay:?}",
                    attempt + 1,
                    max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`retry`] with the default attempt count.
pub async fn retry_io<T, F, Fut>(operation: &str, action: F) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    retry(operation, DEFAULT_MAX_ATTEMPTS, action).await
}
