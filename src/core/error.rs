//! Error types for the live-reload engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::resolver::ModuleId;

/// Errors reported by an extension host's lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Extension '{0}' is not loaded")]
    NotLoaded(ModuleId),

    #[error("Extension '{0}' is already loaded")]
    AlreadyLoaded(ModuleId),

    #[error("Failed to load extension '{module}': {reason}")]
    LoadFailed { module: ModuleId, reason: String },
}

/// Errors raised while handling a single file change.
#[derive(Error, Debug)]
pub enum HotError {
    /// A changed path did not resolve to a module source unit.
    #[error("Module '{module}' does not resolve to a source file (expected {path})")]
    Resolution { module: ModuleId, path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("File watch error: {0}")]
    Watch(String),
}

impl From<notify::Error> for HotError {
    fn from(e: notify::Error) -> Self {
        HotError::Watch(e.to_string())
    }
}
