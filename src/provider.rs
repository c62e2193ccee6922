//! Root path persistence
//!
//! A store is built from whatever root the provider reports at startup and
//! never asks again. Changing the root takes effect for the next store.

use log::{debug, info};
use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub trait PathProvider: Send + Sync {
    /// The custom root if one was set, otherwise the default.
    fn get_root_path(&self) -> String;

    fn set_root_path(&self, path: &str) -> Result<(), StoreError>;

    fn has_custom_path(&self) -> bool;

    fn reset_to_default(&self) -> Result<(), StoreError>;
}

fn check_root(path: &str) -> Result<&str, StoreError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidConfig("root path cannot be empty".into()));
    }
    if trimmed.contains(['\n', '\r', '\0']) {
        return Err(StoreError::PathMalformed(trimmed.to_string()));
    }
    Ok(trimmed)
}

/// Keeps the custom root in memory only.
pub struct MemoryPathProvider {
    default_root: String,
    custom: RwLock<Option<String>>,
}

impl MemoryPathProvider {
    pub fn new(default_root: impl Into<String>) -> Self {
        Self {
            default_root: default_root.into(),
            custom: RwLock::new(None),
        }
    }
}

impl PathProvider for MemoryPathProvider {
    fn get_root_path(&self) -> String {
        self.custom
            .read()
            .clone()
            .unwrap_or_else(|| self.default_root.clone())
    }

    fn set_root_path(&self, path: &str) -> Result<(), StoreError> {
        let path = check_root(path)?;
        *self.custom.write() = Some(path.to_string());
        Ok(())
    }

    fn has_custom_path(&self) -> bool {
        self.custom.read().is_some()
    }

    fn reset_to_default(&self) -> Result<(), StoreError> {
        *self.custom.write() = None;
        Ok(())
    }
}

/// Persists the custom root as a single line in a state file.
pub struct FilePathProvider {
    default_root: String,
    state_file: PathBuf,
}

impl FilePathProvider {
    pub fn new(default_root: impl Into<String>, state_file: impl Into<PathBuf>) -> Self {
        Self {
            default_root: default_root.into(),
            state_file: state_file.into(),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn read_custom(&self) -> Option<String> {
        match fs::read_to_string(&self.state_file) {
            Ok(contents) => {
                let line = contents.lines().next().unwrap_or("").trim();
                (!line.is_empty()).then(|| line.to_string())
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Could not read {}: {e}", self.state_file.display());
                }
                None
            }
        }
    }
}

impl PathProvider for FilePathProvider {
    fn get_root_path(&self) -> String {
        self.read_custom()
            .unwrap_or_else(|| self.default_root.clone())
    }

    fn set_root_path(&self, path: &str) -> Result<(), StoreError> {
        let path = check_root(path)?;
        if let Some(parent) = self.state_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::from_io(parent, e))?;
        }
        fs::write(&self.state_file, format!("{path}\n"))
            .map_err(|e| StoreError::from_io(&self.state_file, e))?;
        info!("Storage root set to {path}");
        Ok(())
    }

    fn has_custom_path(&self) -> bool {
        self.read_custom().is_some()
    }

    fn reset_to_default(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.state_file) {
            Ok(()) => {
                info!("Storage root reset to {}", self.default_root);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from_io(&self.state_file, e)),
        }
    }
}
