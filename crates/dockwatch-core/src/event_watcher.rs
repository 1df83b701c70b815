use crate::model::{short_id, EventKind, EventSubject, LifecycleEvent};
use crate::notifier::NoticeSink;
use crate::render::Notice;
use crate::runtime::RuntimeClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_EVENT_BACKOFF: Duration = Duration::from_secs(10);

/// Maps a raw lifecycle event to the notice it warrants, if any.
pub fn classify(event: &LifecycleEvent) -> Option<Notice> {
    if event.subject != EventSubject::Entity {
        return None;
    }
    let short_id = short_id(&event.entity_id).to_string();
    let name = event.display_name().to_string();
    match &event.kind {
        EventKind::Start => Some(Notice::Started { short_id, name }),
        EventKind::Die | EventKind::OomKill => Some(Notice::Stopped {
            short_id,
            name,
            status: event.kind.as_str().to_string(),
        }),
        EventKind::Other(_) => None,
    }
}

/// Follows the runtime event feed and relays start/stop transitions.
pub struct EventWatcher {
    runtime: Arc<dyn RuntimeClient>,
    sink: NoticeSink,
    backoff: Duration,
}

impl EventWatcher {
    pub fn new(runtime: Arc<dyn RuntimeClient>, sink: NoticeSink, backoff: Duration) -> Self {
        Self {
            runtime,
            sink,
            backoff,
        }
    }

    /// Runs until `shutdown` turns true. Feed errors and closed feeds are
    /// logged and retried after the backoff; nothing else ends the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(event = "event_watcher_start", backoff_ms = self.backoff.as_millis() as u64);
        'subscribe: while !*shutdown.borrow() {
            let mut feed = self.runtime.subscribe_events().await;
            let mut events_open = true;
            let mut errors_open = true;
            while events_open || errors_open {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'subscribe;
                        }
                    }
                    event = feed.events.recv(), if events_open => match event {
                        Some(event) => self.handle(&event).await,
                        None => events_open = false,
                    },
                    error = feed.errors.recv(), if errors_open => match error {
                        Some(err) => {
                            warn!(event = "event_feed_error", error = %err);
                            if !self.pause(&mut shutdown).await {
                                break 'subscribe;
                            }
                        }
                        None => errors_open = false,
                    },
                }
            }
            warn!(event = "event_feed_closed");
            if !self.pause(&mut shutdown).await {
                break;
            }
        }
        info!(event = "event_watcher_stop");
    }

    async fn handle(&self, event: &LifecycleEvent) {
        match classify(event) {
            Some(notice) => {
                info!(
                    event = "entity_transition",
                    entity_id = %short_id(&event.entity_id),
                    name = %event.display_name(),
                    kind = %event.kind
                );
                self.sink.deliver(&notice).await;
            }
            None => {
                debug!(event = "event_ignored", kind = %event.kind);
            }
        }
    }

    /// Sleeps for the backoff. Returns false when shutdown arrived first.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.backoff) => true,
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        }
    }
}
