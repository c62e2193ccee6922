//! Migration result types

/// Result of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub files_copied: u64,
    pub directories_created: u64,
    pub bytes_copied: u64,
    /// Source and destination were the same directory.
    pub skipped: bool,
}
