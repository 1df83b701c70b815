use crate::error::RuntimeError;
use crate::model::{Entity, EntityDetail, LifecycleEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Live lifecycle feed. Events and transport errors arrive on independent
/// channels; both close when the underlying subscription ends.
#[derive(Debug)]
pub struct EventFeed {
    pub events: mpsc::Receiver<LifecycleEvent>,
    pub errors: mpsc::Receiver<RuntimeError>,
}

impl EventFeed {
    pub fn channel(capacity: usize) -> (EventFeedSender, EventFeed) {
        let (event_tx, events) = mpsc::channel(capacity);
        let (error_tx, errors) = mpsc::channel(capacity);
        (
            EventFeedSender {
                events: event_tx,
                errors: error_tx,
            },
            EventFeed { events, errors },
        )
    }
}

/// Producer half of an [`EventFeed`], held by runtime adapters.
#[derive(Debug, Clone)]
pub struct EventFeedSender {
    pub events: mpsc::Sender<LifecycleEvent>,
    pub errors: mpsc::Sender<RuntimeError>,
}

/// Boundary to the container runtime on the observed host.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn list_entities(&self, include_stopped: bool) -> Result<Vec<Entity>, RuntimeError>;

    async fn inspect_entity(&self, id: &str) -> Result<EntityDetail, RuntimeError>;

    /// Combined stdout/stderr of the last `tail_lines` lines.
    async fn fetch_recent_log(&self, id: &str, tail_lines: usize) -> Result<Vec<u8>, RuntimeError>;

    async fn start_entity(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_entity(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn restart_entity(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn subscribe_events(&self) -> EventFeed;
}
