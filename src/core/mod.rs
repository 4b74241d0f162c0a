pub mod classifier;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod event_handler;
pub mod extension_manager;
pub mod hot_reload;
pub mod lifecycle;
pub mod resolver;
pub mod watcher;

pub use classifier::{ExtensionClassifier, ModuleHandle};
pub use daemon::Daemon;
pub use dispatcher::{DispatchOutcome, Dispatcher, FileHandler, HandlerOverrides};
pub use error::{HostError, HotError};
pub use event_handler::{BusErrorSink, ErrorSink, EventBus, HotEvent};
pub use extension_manager::ExtensionManager;
pub use hot_reload::{watch_loop, HotReloader};
pub use lifecycle::{ExtensionHost, LifecycleDriver, Transition};
pub use resolver::{ModuleId, PathResolver};
pub use watcher::{
    ChangeBatch, ChangeBatcher, ChangeKind, FileChange, FileWatcher, KnownFiles, WatchFilter,
};
