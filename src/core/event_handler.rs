use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::classifier::ModuleHandle;
use crate::core::resolver::ModuleId;
use crate::core::watcher::ChangeKind;

/// Notifications broadcast after a change has been handled.
#[derive(Debug, Clone)]
pub enum HotEvent {
    FileAdded { module: ModuleId, handle: ModuleHandle },
    FileModified { module: ModuleId, handle: ModuleHandle },
    FileDeleted { module: ModuleId },
    /// A change could not be handled; the watch loop carried on.
    Error {
        kind: ChangeKind,
        path: PathBuf,
        message: String,
    },
}

impl HotEvent {
    /// Event name listeners subscribe to, e.g. `file_added`.
    pub fn name(&self) -> &'static str {
        match self {
            HotEvent::FileAdded { .. } => ChangeKind::Added.handler_name(),
            HotEvent::FileModified { .. } => ChangeKind::Modified.handler_name(),
            HotEvent::FileDeleted { .. } => ChangeKind::Deleted.handler_name(),
            HotEvent::Error { .. } => "error",
        }
    }
}

/// Fire-and-forget notification bus shared by the host and the reload engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HotEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HotEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event; having no listeners is not an error.
    pub fn emit(&self, event: HotEvent) {
        trace!("📨 Emitting {}", event.name());
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Host capability receiving failures caught at the dispatch boundary.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn on_error(&self, kind: ChangeKind, path: &std::path::Path, error: &anyhow::Error);
}

/// Error sink that republishes failures on the event bus.
pub struct BusErrorSink {
    bus: EventBus,
}

impl BusErrorSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ErrorSink for BusErrorSink {
    async fn on_error(&self, kind: ChangeKind, path: &std::path::Path, error: &anyhow::Error) {
        self.bus.emit(HotEvent::Error {
            kind,
            path: path.to_path_buf(),
            message: format!("{:#}", error),
        });
    }
}
