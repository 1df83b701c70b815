use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of leading identifier characters shown to operators and carried in
/// callback payloads.
pub const SHORT_ID_LEN: usize = 12;

pub type ChatId = i64;

/// Platform-assigned message id. `0` means no message has been sent.
pub type MessageId = i64;

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Created,
    Running,
    Stopped,
    Errored,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Created
    }
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
            Phase::Errored => "errored",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }

    pub fn icon(&self) -> &'static str {
        if self.is_running() {
            "🟢"
        } else {
            "🔴"
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "created" => Ok(Phase::Created),
            "running" => Ok(Phase::Running),
            "stopped" => Ok(Phase::Stopped),
            "errored" | "error" => Ok(Phase::Errored),
            other => Err(format!("Unknown phase: {other}")),
        }
    }
}

/// A monitored workload as listed by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub phase: Phase,
    pub created: DateTime<Utc>,
    pub image: String,
}

impl Entity {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityDetail {
    pub id: String,
    pub name: String,
    pub phase: Phase,
    pub image: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Die,
    OomKill,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Start => "start",
            EventKind::Die => "die",
            EventKind::OomKill => "oom",
            EventKind::Other(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for EventKind {
    fn from(raw: &str) -> Self {
        match raw {
            "start" => EventKind::Start,
            "die" => EventKind::Die,
            "oom" => EventKind::OomKill,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a lifecycle event is about. Only entity events are ever reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSubject {
    Entity,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub entity_id: String,
    pub subject: EventSubject,
    pub kind: EventKind,
    pub attributes: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn display_name(&self) -> &str {
        self.attributes
            .get("name")
            .map(String::as_str)
            .unwrap_or_default()
    }
}
