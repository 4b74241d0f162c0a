use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::classifier::ExtensionClassifier;
use crate::core::dispatcher::{Dispatcher, HandlerOverrides};
use crate::core::event_handler::{BusErrorSink, EventBus, HotEvent};
use crate::core::extension_manager::ExtensionManager;
use crate::core::hot_reload::HotReloader;
use crate::core::lifecycle::{ExtensionHost, LifecycleDriver};
use crate::core::resolver::PathResolver;

pub struct Daemon {
    config: Config,
    extension_manager: Arc<Mutex<ExtensionManager>>,
    events: broadcast::Receiver<HotEvent>,
    hot_reloader: Option<HotReloader>,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_overrides(config, HandlerOverrides::new()).await
    }

    /// Build the daemon with host-supplied handlers replacing default policy.
    pub async fn with_overrides(config: Config, overrides: HandlerOverrides) -> Result<Self> {
        let hr = &config.hot_reload;

        let resolver = PathResolver::from_current_dir(hr.source_suffix.as_str())?;
        info!("📂 Resolving modules relative to {:?}", resolver.base());
        let classifier = ExtensionClassifier::new(resolver.clone(), &hr.entry_point);

        info!("🔧 Initializing extension manager");
        let mut extension_manager = ExtensionManager::new(resolver.clone(), hr.entry_point.as_str())?;

        if hr.load_on_startup {
            let dir = resolver.base().join(&hr.extensions_path);
            if dir.is_dir() {
                extension_manager.load_extensions_from(&dir, &classifier).await?;
            } else {
                warn!("⚠️ Extensions path {:?} does not exist, nothing loaded", dir);
            }
        }
        let extension_manager = Arc::new(Mutex::new(extension_manager));

        info!("📡 Setting up event bus");
        let bus = EventBus::default();
        let events = bus.subscribe();

        let dispatcher = Dispatcher::new(
            resolver,
            classifier,
            LifecycleDriver::new(Arc::clone(&extension_manager)),
            bus.clone(),
        )
        .with_overrides(overrides)
        .with_error_sink(Arc::new(BusErrorSink::new(bus)));

        let hot_reloader = HotReloader::start(hr, dispatcher)?;

        Ok(Self {
            config,
            extension_manager,
            events,
            hot_reloader: Some(hot_reloader),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn extension_manager(&self) -> &Arc<Mutex<ExtensionManager>> {
        &self.extension_manager
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("🚀 Starting hotcog daemon");
        {
            let em = self.extension_manager.lock().await;
            info!("✅ {} extensions loaded", em.get_extension_count());
        }

        info!("🔄 Starting event loop");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Ok(event) => Self::log_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("⚠️ Event log lagged, skipped {} notifications", skipped);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Event bus closed");
                            break;
                        }
                    }
                }

                // Handle shutdown signal
                _ = signal::ctrl_c() => {
                    info!("🛑 Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("👋 Shutting down hotcog");
        Ok(())
    }

    /// Stop watching and tear down every loaded extension.
    pub async fn shutdown(&mut self) {
        if let Some(reloader) = self.hot_reloader.take() {
            reloader.close().await;
        }

        let mut em = self.extension_manager.lock().await;
        for module in em.get_loaded_extensions() {
            if let Err(e) = em.unload_extension(&module).await {
                warn!("⚠️ Failed to unload '{}': {}", module, e);
            }
        }
    }

    fn log_event(event: &HotEvent) {
        match event {
            HotEvent::FileAdded { module, handle } => {
                info!("📁 {} added (extension: {})", module, handle.is_extension);
            }
            HotEvent::FileModified { module, handle } => {
                info!("📝 {} modified (extension: {})", module, handle.is_extension);
            }
            HotEvent::FileDeleted { module } => info!("🗑️ {} deleted", module),
            HotEvent::Error {
                kind,
                path,
                message,
            } => warn!("⚠️ Failed to handle {} of {:?}: {}", kind, path, message),
        }
    }
}
