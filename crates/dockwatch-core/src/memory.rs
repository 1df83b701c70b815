//! In-memory runtime and notifier. They back the crate's own tests and let
//! the engines run without a container daemon or chat backend.

use crate::error::RuntimeError;
use crate::model::{ChatId, Entity, EntityDetail, MessageId, Phase};
use crate::notifier::{Controls, Notifier};
use crate::runtime::{EventFeed, EventFeedSender, RuntimeClient};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const FEED_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List { include_stopped: bool },
    Inspect(String),
    FetchLog { id: String, tail_lines: usize },
    Start(String),
    Stop { id: String, timeout: Duration },
    Restart { id: String, timeout: Duration },
    Subscribe,
}

#[derive(Default)]
struct MemoryRuntimeState {
    entities: Vec<Entity>,
    logs: HashMap<String, Vec<u8>>,
    log_failures: HashMap<String, RuntimeError>,
    log_delays: HashMap<String, Duration>,
    action_failures: HashMap<String, RuntimeError>,
    list_failure: Option<RuntimeError>,
    scripted_feeds: VecDeque<EventFeed>,
    idle_feeds: Vec<EventFeedSender>,
    calls: Vec<RuntimeCall>,
}

#[derive(Default)]
pub struct MemoryRuntime {
    state: Mutex<MemoryRuntimeState>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: Vec<Entity>) -> Self {
        let runtime = Self::new();
        runtime.set_entities(entities);
        runtime
    }

    pub fn set_entities(&self, entities: Vec<Entity>) {
        lock(&self.state).entities = entities;
    }

    pub fn set_log(&self, id: &str, log: impl Into<Vec<u8>>) {
        lock(&self.state).logs.insert(id.to_string(), log.into());
    }

    pub fn append_log(&self, id: &str, log: impl AsRef<[u8]>) {
        lock(&self.state)
            .logs
            .entry(id.to_string())
            .or_default()
            .extend_from_slice(log.as_ref());
    }

    pub fn fail_log(&self, id: &str, error: RuntimeError) {
        lock(&self.state).log_failures.insert(id.to_string(), error);
    }

    pub fn delay_log(&self, id: &str, delay: Duration) {
        lock(&self.state).log_delays.insert(id.to_string(), delay);
    }

    pub fn fail_action(&self, id: &str, error: RuntimeError) {
        lock(&self.state).action_failures.insert(id.to_string(), error);
    }

    pub fn fail_listing(&self, error: Option<RuntimeError>) {
        lock(&self.state).list_failure = error;
    }

    /// Queues a feed for the next `subscribe_events` call and returns its
    /// producer half.
    pub fn script_feed(&self) -> EventFeedSender {
        let (sender, feed) = EventFeed::channel(FEED_CAPACITY);
        lock(&self.state).scripted_feeds.push_back(feed);
        sender
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.state).calls.clone()
    }

    pub fn phase_of(&self, id: &str) -> Option<Phase> {
        lock(&self.state)
            .entities
            .iter()
            .find(|entity| entity.id == id)
            .map(|entity| entity.phase)
    }

    fn record(&self, call: RuntimeCall) {
        lock(&self.state).calls.push(call);
    }

    fn transition(&self, id: &str, phase: Phase) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.action_failures.get(id) {
            return Err(error.clone());
        }
        match state.entities.iter_mut().find(|entity| entity.id == id) {
            Some(entity) => {
                entity.phase = phase;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl RuntimeClient for MemoryRuntime {
    async fn list_entities(&self, include_stopped: bool) -> Result<Vec<Entity>, RuntimeError> {
        self.record(RuntimeCall::List { include_stopped });
        let state = lock(&self.state);
        if let Some(error) = &state.list_failure {
            return Err(error.clone());
        }
        Ok(state
            .entities
            .iter()
            .filter(|entity| include_stopped || entity.phase.is_running())
            .cloned()
            .collect())
    }

    async fn inspect_entity(&self, id: &str) -> Result<EntityDetail, RuntimeError> {
        self.record(RuntimeCall::Inspect(id.to_string()));
        let state = lock(&self.state);
        state
            .entities
            .iter()
            .find(|entity| entity.id == id)
            .map(|entity| EntityDetail {
                id: entity.id.clone(),
                name: entity.name.clone(),
                phase: entity.phase,
                image: entity.image.clone(),
                created: entity.created,
                exit_code: None,
            })
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn fetch_recent_log(&self, id: &str, tail_lines: usize) -> Result<Vec<u8>, RuntimeError> {
        self.record(RuntimeCall::FetchLog {
            id: id.to_string(),
            tail_lines,
        });
        let delay = lock(&self.state).log_delays.get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = lock(&self.state);
        if let Some(error) = state.log_failures.get(id) {
            return Err(error.clone());
        }
        let log = state.logs.get(id).cloned().unwrap_or_default();
        Ok(tail(&log, tail_lines))
    }

    async fn start_entity(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Start(id.to_string()));
        self.transition(id, Phase::Running)
    }

    async fn stop_entity(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Stop {
            id: id.to_string(),
            timeout,
        });
        self.transition(id, Phase::Stopped)
    }

    async fn restart_entity(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Restart {
            id: id.to_string(),
            timeout,
        });
        self.transition(id, Phase::Running)
    }

    async fn subscribe_events(&self) -> EventFeed {
        self.record(RuntimeCall::Subscribe);
        let mut state = lock(&self.state);
        if let Some(feed) = state.scripted_feeds.pop_front() {
            return feed;
        }
        let (sender, feed) = EventFeed::channel(FEED_CAPACITY);
        state.idle_feeds.push(sender);
        feed
    }
}

/// Keeps the last `lines` newline-terminated lines, like a runtime tail.
fn tail(log: &[u8], lines: usize) -> Vec<u8> {
    if lines == 0 {
        return Vec::new();
    }
    let body = log.strip_suffix(b"\n").unwrap_or(log);
    let mut seen = 0;
    for (idx, byte) in body.iter().enumerate().rev() {
        if *byte == b'\n' {
            seen += 1;
            if seen == lines {
                return log[idx + 1..].to_vec();
            }
        }
    }
    log.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        controls: Option<Controls>,
    },
    Edited {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        controls: Option<Controls>,
    },
    Acknowledged {
        interaction_id: String,
        text: String,
    },
    Deleted {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

impl Delivery {
    pub fn text(&self) -> Option<&str> {
        match self {
            Delivery::Sent { text, .. } | Delivery::Edited { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn controls(&self) -> Option<&Controls> {
        match self {
            Delivery::Sent { controls, .. } | Delivery::Edited { controls, .. } => {
                controls.as_ref()
            }
            _ => None,
        }
    }
}

/// Records every delivery and hands out sequential message ids from 1.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
    last_message_id: AtomicI64,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.deliveries).clone()
    }

    pub fn last(&self) -> Option<Delivery> {
        lock(&self.deliveries).last().cloned()
    }

    /// Texts of plain sends, in order. Passive notices arrive this way.
    pub fn sent_texts(&self) -> Vec<String> {
        lock(&self.deliveries)
            .iter()
            .filter_map(|delivery| match delivery {
                Delivery::Sent { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Waits until at least `count` deliveries were recorded or `limit`
    /// elapses, returning whether the count was reached.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if lock(&self.deliveries).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn push(&self, delivery: Delivery) {
        lock(&self.deliveries).push(delivery);
    }

    fn next_message_id(&self) -> MessageId {
        self.last_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> MessageId {
        let message_id = self.next_message_id();
        self.push(Delivery::Sent {
            chat_id,
            message_id,
            text: text.to_string(),
            controls: None,
        });
        message_id
    }

    async fn send_text_with_controls(
        &self,
        chat_id: ChatId,
        text: &str,
        controls: &Controls,
    ) -> MessageId {
        let message_id = self.next_message_id();
        self.push(Delivery::Sent {
            chat_id,
            message_id,
            text: text.to_string(),
            controls: Some(controls.clone()),
        });
        message_id
    }

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) {
        self.push(Delivery::Edited {
            chat_id,
            message_id,
            text: text.to_string(),
            controls: None,
        });
    }

    async fn edit_text_with_controls(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        controls: &Controls,
    ) {
        self.push(Delivery::Edited {
            chat_id,
            message_id,
            text: text.to_string(),
            controls: Some(controls.clone()),
        });
    }

    async fn acknowledge_interaction(&self, interaction_id: &str, text: &str) {
        self.push(Delivery::Acknowledged {
            interaction_id: interaction_id.to_string(),
            text: text.to_string(),
        });
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) {
        self.push(Delivery::Deleted {
            chat_id,
            message_id,
        });
    }
}
