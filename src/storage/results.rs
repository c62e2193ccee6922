//! Storage result types
//!
//! Defines result structures returned by storage operations.

use std::fs::Metadata;
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};

use crate::quota::QuotaInfo;

/// One node returned by a listing. Built fresh per call.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    /// Absolute, normalized host path.
    pub path: PathBuf,
    pub is_directory: bool,
    /// Zero for directories.
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

impl FileEntry {
    pub(crate) fn from_metadata(path: PathBuf, meta: &Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_directory = meta.is_dir();
        Self {
            name,
            path,
            is_directory,
            size_bytes: if is_directory { 0 } else { meta.len() },
            modified_at: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// Result of a properties query.
#[derive(Debug, Clone, PartialEq)]
pub struct FileProperties {
    pub path: PathBuf,
    pub is_directory: bool,
    /// File length, or the recursive total for a directory.
    pub size_bytes: u64,
    /// Not every platform records creation time.
    pub created_at: Option<SystemTime>,
    pub modified_at: SystemTime,
    pub read_only: bool,
    pub quota: QuotaInfo,
}

/// Contents returned by `open`. Small files are read fully into memory;
/// large ones are handed back as an open file.
#[derive(Debug)]
pub enum OpenedFile {
    Buffered(Cursor<Vec<u8>>),
    Stream { file: File, len: u64 },
}

impl OpenedFile {
    pub fn len(&self) -> u64 {
        match self {
            OpenedFile::Buffered(data) => data.get_ref().len() as u64,
            OpenedFile::Stream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self, OpenedFile::Buffered(_))
    }

    /// The whole contents, when buffered.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OpenedFile::Buffered(data) => Some(data.get_ref().as_slice()),
            OpenedFile::Stream { .. } => None,
        }
    }
}

impl AsyncRead for OpenedFile {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OpenedFile::Buffered(data) => Pin::new(data).poll_read(cx, buf),
            OpenedFile::Stream { file, .. } => Pin::new(file).poll_read(cx, buf),
        }
    }
}
