//! Transfer module
//!
//! Chunked copies, streamed writes and the retry policy wrapped around the
//! individual OS calls they make.

pub mod file_ops;
pub mod retry;

// Re-export key types and functions
pub use file_ops::{COPY_CHUNK_SIZE, Progress, copy_file_chunked, write_stream};
pub use retry::{DEFAULT_MAX_ATTEMPTS, Transient, retry, retry_io};
