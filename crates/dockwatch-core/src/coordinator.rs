use crate::console::{
    Command, Console, ConsoleConfig, SessionStore, ACTION_TIMEOUT, PAGE_SIZE,
};
use crate::event_watcher::{EventWatcher, DEFAULT_EVENT_BACKOFF};
use crate::log_tail::{
    LogTailScanner, MarkerStore, ScanConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_TAIL_LINES, MAX_REPORTED_LINES,
};
use crate::model::{ChatId, MessageId};
use crate::notifier::{NoticeSink, Notifier};
use crate::runtime::RuntimeClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const VIEWER_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub chat_id: ChatId,
    pub poll_interval: Duration,
    pub tail_lines: usize,
    pub fetch_timeout: Duration,
    pub max_reported: usize,
    pub event_backoff: Duration,
    pub page_size: usize,
    pub action_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            chat_id: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tail_lines: DEFAULT_TAIL_LINES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_reported: MAX_REPORTED_LINES,
            event_backoff: DEFAULT_EVENT_BACKOFF,
            page_size: PAGE_SIZE,
            action_timeout: ACTION_TIMEOUT,
        }
    }
}

impl MonitorConfig {
    pub fn for_chat(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            ..Self::default()
        }
    }

    pub fn scan(&self) -> ScanConfig {
        ScanConfig {
            interval: self.poll_interval,
            tail_lines: self.tail_lines,
            fetch_timeout: self.fetch_timeout,
            max_reported: self.max_reported,
        }
    }

    pub fn console(&self) -> ConsoleConfig {
        ConsoleConfig {
            page_size: self.page_size,
            action_timeout: self.action_timeout,
        }
    }
}

/// Viewer input as delivered by the chat backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundUpdate {
    Command {
        chat_id: ChatId,
        name: String,
    },
    Callback {
        chat_id: ChatId,
        message_id: MessageId,
        interaction_id: String,
        data: String,
    },
}

impl InboundUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            InboundUpdate::Command { chat_id, .. } | InboundUpdate::Callback { chat_id, .. } => {
                *chat_id
            }
        }
    }
}

/// Owns the shared monitoring state and runs the long-lived tasks.
pub struct Coordinator {
    runtime: Arc<dyn RuntimeClient>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    sessions: Arc<SessionStore>,
    markers: Arc<MarkerStore>,
}

impl Coordinator {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            runtime,
            notifier,
            config,
            sessions: Arc::new(SessionStore::new()),
            markers: Arc::new(MarkerStore::new()),
        }
    }

    fn sink(&self) -> NoticeSink {
        NoticeSink::new(self.notifier.clone(), self.config.chat_id)
    }

    pub fn event_watcher(&self) -> EventWatcher {
        EventWatcher::new(self.runtime.clone(), self.sink(), self.config.event_backoff)
    }

    pub fn scanner(&self) -> Arc<LogTailScanner> {
        Arc::new(LogTailScanner::new(
            self.runtime.clone(),
            self.sink(),
            self.config.scan(),
            self.markers.clone(),
        ))
    }

    pub fn console(&self) -> Arc<Console> {
        Arc::new(Console::new(
            self.runtime.clone(),
            self.notifier.clone(),
            self.sessions.clone(),
            self.config.console(),
        ))
    }

    /// Runs the event watcher, the log scanner and the update dispatcher
    /// until `shutdown` turns true.
    pub async fn run(
        &self,
        updates: mpsc::Receiver<InboundUpdate>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!(event = "coordinator_start", chat_id = self.config.chat_id);
        let watcher = tokio::spawn(self.event_watcher().run(shutdown.clone()));
        let scanner = tokio::spawn(self.scanner().run(shutdown.clone()));
        let dispatcher = tokio::spawn(dispatch(
            self.console(),
            self.config.chat_id,
            updates,
            shutdown,
        ));

        for (name, handle) in [
            ("event_watcher", watcher),
            ("log_scanner", scanner),
            ("dispatcher", dispatcher),
        ] {
            if let Err(err) = handle.await {
                warn!(event = "coordinator_task_failed", task = name, error = %err);
            }
        }
        info!(event = "coordinator_stop");
    }
}

/// Routes updates from the operator chat to one worker per viewer so a
/// viewer's updates run in order while viewers never wait on each other.
pub async fn dispatch(
    console: Arc<Console>,
    operator_chat: ChatId,
    mut updates: mpsc::Receiver<InboundUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut workers: HashMap<ChatId, (mpsc::Sender<InboundUpdate>, JoinHandle<()>)> =
        HashMap::new();
    loop {
        let update = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            update = updates.recv() => match update {
                Some(update) => update,
                None => {
                    debug!(event = "dispatcher_updates_closed");
                    break;
                }
            },
        };

        let chat_id = update.chat_id();
        if chat_id != operator_chat {
            warn!(event = "update_unauthorized", chat_id = chat_id);
            if let InboundUpdate::Callback { interaction_id, .. } = &update {
                console.acknowledge(interaction_id).await;
            }
            continue;
        }
        if workers.get(&chat_id).map_or(true, |(tx, _)| tx.is_closed()) {
            let (tx, rx) = mpsc::channel(VIEWER_QUEUE);
            let handle = tokio::spawn(viewer_worker(console.clone(), chat_id, rx));
            workers.insert(chat_id, (tx, handle));
        }
        if let Some((tx, _)) = workers.get(&chat_id) {
            if tx.send(update).await.is_err() {
                warn!(event = "viewer_worker_gone", chat_id = chat_id);
            }
        }
    }

    for (chat_id, (tx, handle)) in workers {
        drop(tx);
        if let Err(err) = handle.await {
            warn!(event = "viewer_worker_failed", chat_id = chat_id, error = %err);
        }
    }
}

async fn viewer_worker(
    console: Arc<Console>,
    chat_id: ChatId,
    mut updates: mpsc::Receiver<InboundUpdate>,
) {
    while let Some(update) = updates.recv().await {
        match update {
            InboundUpdate::Command { name, .. } => match name.parse::<Command>() {
                Ok(command) => console.handle_command(chat_id, command).await,
                Err(_) => debug!(event = "command_ignored", chat_id = chat_id, command = %name),
            },
            InboundUpdate::Callback {
                message_id,
                interaction_id,
                data,
                ..
            } => {
                console
                    .handle_callback(chat_id, message_id, &interaction_id, &data)
                    .await
            }
        }
    }
}
