//! Per-change dispatch: override lookup, default lifecycle policy and
//! failure isolation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

use crate::core::classifier::ExtensionClassifier;
use crate::core::event_handler::{ErrorSink, EventBus, HotEvent};
use crate::core::lifecycle::{ExtensionHost, LifecycleDriver, Transition};
use crate::core::resolver::PathResolver;
use crate::core::watcher::ChangeKind;

/// Host-supplied handler that fully replaces default processing for one kind.
#[async_trait]
pub trait FileHandler: Send + Sync {
    async fn handle(&self, path: &Path) -> Result<()>;
}

/// Typed override table, keyed by change kind.
#[derive(Clone, Default)]
pub struct HandlerOverrides {
    handlers: HashMap<ChangeKind, Arc<dyn FileHandler>>,
}

impl HandlerOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`, replacing any previous one.
    pub fn set(&mut self, kind: ChangeKind, handler: Arc<dyn FileHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn clear(&mut self, kind: ChangeKind) {
        self.handlers.remove(&kind);
    }

    pub fn get(&self, kind: ChangeKind) -> Option<&Arc<dyn FileHandler>> {
        self.handlers.get(&kind)
    }
}

/// What happened to one dispatched change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a source file; nothing was resolved or emitted.
    Ignored,
    /// An override handler ran instead of the default policy.
    Overridden,
    Handled(Transition),
    /// Handling failed; the error was reported and swallowed.
    Failed,
}

pub struct Dispatcher<H: ExtensionHost> {
    resolver: PathResolver,
    classifier: ExtensionClassifier,
    driver: LifecycleDriver<H>,
    overrides: HandlerOverrides,
    bus: EventBus,
    error_sink: Option<Arc<dyn ErrorSink>>,
}

impl<H: ExtensionHost> Dispatcher<H> {
    pub fn new(
        resolver: PathResolver,
        classifier: ExtensionClassifier,
        driver: LifecycleDriver<H>,
        bus: EventBus,
    ) -> Self {
        Self {
            resolver,
            classifier,
            driver,
            overrides: HandlerOverrides::new(),
            bus,
            error_sink: None,
        }
    }

    pub fn with_overrides(mut self, overrides: HandlerOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn overrides_mut(&mut self) -> &mut HandlerOverrides {
        &mut self.overrides
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Handle one change. Never fails: errors are reported and swallowed so
    /// the caller can keep consuming the watch stream.
    pub async fn dispatch(&self, kind: ChangeKind, path: &Path) -> DispatchOutcome {
        if !self.resolver.is_source(path) {
            return DispatchOutcome::Ignored;
        }

        let result = match self.overrides.get(kind) {
            Some(handler) => {
                debug!("🎯 Using {} override for {}", kind.handler_name(), path.display());
                handler
                    .handle(path)
                    .await
                    .map(|()| DispatchOutcome::Overridden)
            }
            None => self
                .handle_default(kind, path)
                .await
                .map(DispatchOutcome::Handled),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(sink) = &self.error_sink {
                    sink.on_error(kind, path, &e).await;
                }
                error!(
                    "❌ {} handler failed for {}: {:?}",
                    kind.handler_name(),
                    path.display(),
                    e
                );
                DispatchOutcome::Failed
            }
        }
    }

    async fn handle_default(&self, kind: ChangeKind, path: &Path) -> Result<Transition> {
        let module = self.resolver.resolve(path);

        match kind {
            ChangeKind::Added | ChangeKind::Modified => {
                let handle = self.classifier.classify(&module).await?;
                let transition = self
                    .driver
                    .drive(kind, &module, handle.is_extension)
                    .await
                    .with_context(|| format!("{} {}", kind, module))?;

                let event = if kind == ChangeKind::Added {
                    HotEvent::FileAdded { module, handle }
                } else {
                    HotEvent::FileModified { module, handle }
                };
                self.bus.emit(event);
                Ok(transition)
            }
            ChangeKind::Deleted => {
                let transition = self
                    .driver
                    .drive(kind, &module, false)
                    .await
                    .with_context(|| format!("{} {}", kind, module))?;

                self.bus.emit(HotEvent::FileDeleted { module });
                Ok(transition)
            }
        }
    }
}
