//! Module `file_ops`
//!
//! Chunked copy and streamed write primitives shared by the store and the
//! migration coordinator. Both poll the cancellation token before touching
//! the destination and between chunks, and leave whatever was already
//! written in place when cancelled.

use log::info;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::transfer::retry::retry_io;

/// Chunk size for file-to-file copies.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Fraction-complete callback, invoked on the operation's own task.
pub type Progress<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Creates (or truncates) `path`, creating parent directories first.
pub async fn create_for_write(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::from_io(parent, e))?;
    }
    retry_io("create", || File::create(path))
        .await
        .map_err(|e| StoreError::from_io(path, e))
}

/// Copies one file in [`COPY_CHUNK_SIZE`] chunks, reporting `copied / total`
/// after each chunk. Returns the number of bytes written.
pub async fn copy_file_chunked(
    source: &Path,
    destination: &Path,
    progress: Option<Progress<'_>>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError> {
    let mut reader = retry_io("open", || File::open(source))
        .await
        .map_err(|e| StoreError::from_io(source, e))?;
    let total = reader
        .metadata()
        .await
        .map_err(|e| StoreError::from_io(source, e))?
        .len();
    if cancel.is_cancelled() {
        return Err(StoreError::OperationCancelled);
    }
    let mut writer = create_for_write(destination).await?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| StoreError::from_io(source, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .await
            .map_err(|e| StoreError::from_io(destination, e))?;
        copied += n as u64;
        if let Some(report) = progress {
            report(fraction(copied, total));
        }
    }
    writer
        .flush()
        .await
        .map_err(|e| StoreError::from_io(destination, e))?;

    if copied == 0 {
        if let Some(report) = progress {
            report(1.0);
        }
    }
    info!(
        "Copied {} -> {} ({copied} bytes)",
        source.display(),
        destination.display()
    );
    Ok(copied)
}

/// Streams `reader` into `destination` through a `buffer_size` buffer.
///
/// With a `limit`, the write stops with `QuotaExceeded` before the total
/// would reach it; the chunk that crosses the limit is not written.
pub async fn write_stream<R>(
    reader: &mut R,
    destination: &Path,
    buffer_size: usize,
    limit: Option<u64>,
    cancel: &CancellationToken,
) -> Result<u64, StoreError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(StoreError::OperationCancelled);
    }
    let mut writer = create_for_write(destination).await?;
    let mut buffer = vec![0u8; buffer_size];
    let mut written = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::OperationCancelled);
        }
        let n = reader
            .read(&mut buffer)
            .await
            .map_err(|e| StoreError::from_io(destination, e))?;
        if n == 0 {
            break;
        }
        if let Some(limit) = limit {
            if written + n as u64 >= limit {
                return Err(StoreError::QuotaExceeded {
                    requested: written + n as u64,
                    available: limit,
                });
            }
        }
        writer
            .write_all(&buffer[..n])
            .await
            .map_err(|e| StoreError::from_io(destination, e))?;
        written += n as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| StoreError::from_io(destination, e))?;
    Ok(written)
}

pub(crate) fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}
