//! Hotcog - live reload for Lua extension modules
//!
//! Watches a source tree and keeps a set of loaded extensions in sync with
//! the files on disk: new extensions are loaded, edited ones reloaded and
//! deleted ones unloaded, without restarting the host process.

pub mod config;
pub mod core;

// Re-export commonly used types
pub use config::{Config, HotReloadConfig};
pub use crate::core::daemon::Daemon;
pub use crate::core::{
    ChangeKind, DispatchOutcome, Dispatcher, ExtensionHost, HandlerOverrides, HostError, HotEvent,
    ModuleId, PathResolver,
};
