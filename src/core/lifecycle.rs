use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::error::HostError;
use crate::core::resolver::ModuleId;
use crate::core::watcher::ChangeKind;

/// Lifecycle operations the host application exposes to the reload engine.
///
/// The host owns the registry of loaded extensions; the engine only asks it
/// to transition a module and reacts to [`HostError::NotLoaded`].
#[async_trait]
pub trait ExtensionHost: Send {
    /// Load a module that is not yet registered.
    async fn load_extension(&mut self, module: &ModuleId) -> Result<(), HostError>;

    /// Re-execute a registered module. Fails with `NotLoaded` if it never loaded.
    async fn reload_extension(&mut self, module: &ModuleId) -> Result<(), HostError>;

    /// Tear down a registered module. Fails with `NotLoaded` if it never loaded.
    async fn unload_extension(&mut self, module: &ModuleId) -> Result<(), HostError>;
}

/// Transition performed for one dispatched change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Loaded,
    Reloaded,
    Unloaded,
    NoOp,
}

/// Drives per-module `unloaded`/`loaded` transitions against the host.
pub struct LifecycleDriver<H: ExtensionHost> {
    host: Arc<Mutex<H>>,
}

impl<H: ExtensionHost> Clone for LifecycleDriver<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
        }
    }
}

impl<H: ExtensionHost> LifecycleDriver<H> {
    pub fn new(host: Arc<Mutex<H>>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<Mutex<H>> {
        &self.host
    }

    /// Perform at most one lifecycle operation for a change.
    ///
    /// `is_extension` is ignored for deletions. An `added` change for a module
    /// that is already loaded is passed straight to the host; whatever the
    /// host's load reports is returned unchanged.
    pub async fn drive(
        &self,
        kind: ChangeKind,
        module: &ModuleId,
        is_extension: bool,
    ) -> Result<Transition, HostError> {
        let mut host = self.host.lock().await;

        match kind {
            ChangeKind::Added if is_extension => {
                host.load_extension(module).await?;
                info!("➕ Loaded extension: {}", module);
                Ok(Transition::Loaded)
            }
            ChangeKind::Modified if is_extension => match host.reload_extension(module).await {
                Ok(()) => {
                    info!("🔄 Reloaded extension: {}", module);
                    Ok(Transition::Reloaded)
                }
                Err(HostError::NotLoaded(_)) => {
                    debug!("{} was not loaded, loading instead of reloading", module);
                    host.load_extension(module).await?;
                    info!("➕ Loaded extension: {}", module);
                    Ok(Transition::Loaded)
                }
                Err(e) => Err(e),
            },
            ChangeKind::Added | ChangeKind::Modified => {
                debug!("⏭️ {} is not an extension, nothing to do", module);
                Ok(Transition::NoOp)
            }
            ChangeKind::Deleted => match host.unload_extension(module).await {
                Ok(()) => {
                    info!("🗑️ Unloaded extension: {}", module);
                    Ok(Transition::Unloaded)
                }
                Err(HostError::NotLoaded(_)) => {
                    debug!("{} was not loaded, nothing to unload", module);
                    Ok(Transition::NoOp)
                }
                Err(e) => Err(e),
            },
        }
    }
}
