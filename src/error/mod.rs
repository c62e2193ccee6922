//! Error handling
//!
//! Defines error types and handling for the storage facade.

pub mod handlers;
pub mod types;

pub use types::*;
