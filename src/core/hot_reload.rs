use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::config::HotReloadConfig;
use crate::core::dispatcher::Dispatcher;
use crate::core::lifecycle::ExtensionHost;
use crate::core::watcher::{ChangeBatch, FileWatcher, WatchFilter};

/// Feed every change of every batch to the dispatcher, in order.
///
/// Runs until the stream ends. Per-file failures never end the loop since
/// [`Dispatcher::dispatch`] swallows them.
pub async fn watch_loop<H, S>(mut batches: S, dispatcher: Dispatcher<H>)
where
    H: ExtensionHost,
    S: Stream<Item = ChangeBatch> + Unpin,
{
    while let Some(batch) = batches.next().await {
        debug!("📦 Processing batch of {} changes", batch.len());
        for change in batch {
            dispatcher.dispatch(change.kind, &change.path).await;
        }
    }
    debug!("🔍 Change stream ended");
}

/// Background watch task owned by the host for its whole lifetime.
pub struct HotReloader {
    task: JoinHandle<()>,
    watcher: FileWatcher,
}

impl HotReloader {
    /// Subscribe to the configured watch root and spawn the watch loop.
    pub fn start<H>(config: &HotReloadConfig, dispatcher: Dispatcher<H>) -> Result<Self>
    where
        H: ExtensionHost + 'static,
    {
        info!("🔥 Starting hot reload");

        let root = Self::watch_root(config, &dispatcher)?;
        let filter = WatchFilter::new(config.ignore_dirs.clone())?;
        let (watcher, batches) =
            FileWatcher::subscribe(&root, filter, Duration::from_millis(config.debounce_ms))?;

        let task = tokio::spawn(watch_loop(batches, dispatcher));

        info!("✅ Hot reload started, watching {:?}", root);
        Ok(Self { task, watcher })
    }

    fn watch_root<H: ExtensionHost>(
        config: &HotReloadConfig,
        dispatcher: &Dispatcher<H>,
    ) -> Result<PathBuf> {
        let root: PathBuf = dispatcher
            .resolver()
            .base()
            .join(&config.watch_root)
            .components()
            .collect();
        if !root.is_dir() {
            anyhow::bail!("Watch root {:?} is not a directory", root);
        }
        Ok(root)
    }

    pub fn root(&self) -> &std::path::Path {
        self.watcher.root()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the watch task and wait for it to stop.
    pub async fn close(self) {
        info!("🛑 Stopping hot reload");
        self.task.abort();

        match self.task.await {
            Ok(()) => debug!("Watch loop had already finished"),
            Err(e) if e.is_cancelled() => debug!("Watch loop cancelled"),
            Err(e) => error!("❌ Watch loop panicked: {}", e),
        }
    }
}
