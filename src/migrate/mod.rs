//! Root migration
//!
//! Copies a store's whole tree to a new root without cutting over.

pub mod operations;
pub mod results;

pub use operations::MigrationCoordinator;
pub use results::MigrationReport;
