//! Container monitoring core: lifecycle event relay, incremental log error
//! scanning, and the interactive chat console.

pub mod console;
pub mod coordinator;
pub mod error;
pub mod event_watcher;
pub mod log_tail;
pub mod memory;
pub mod model;
pub mod notifier;
pub mod render;
pub mod runtime;
pub mod text;

pub use console::{Command, Console, ConsoleConfig, SessionStore, ViewerSession};
pub use coordinator::{Coordinator, InboundUpdate, MonitorConfig};
pub use error::RuntimeError;
pub use event_watcher::EventWatcher;
pub use log_tail::{LogTailScanner, MarkerStore};
pub use model::{
    short_id, ChatId, Entity, EntityDetail, EventKind, EventSubject, LifecycleEvent, MessageId,
    Phase,
};
pub use notifier::{Button, Controls, NoticeSink, Notifier};
pub use runtime::{EventFeed, EventFeedSender, RuntimeClient};
