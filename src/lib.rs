pub mod config;
pub mod error;
pub mod migrate;
pub mod provider;
pub mod quota;
pub mod storage;
pub mod transfer;
pub mod watch;

pub use config::{QuotaConfig, StoreOptions, StoreSettings, WatchBackend};
pub use error::{PathError, QuotaError, StoreError};
pub use migrate::{MigrationCoordinator, MigrationReport};
pub use provider::{FilePathProvider, MemoryPathProvider, PathProvider};
pub use quota::QuotaInfo;
pub use storage::{FileEntry, FileProperties, OpenedFile, SecureFileStore};
pub use watch::{ChangeEvent, ChangeKind, StoreEvent, Subscription};
