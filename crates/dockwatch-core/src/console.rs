//! Interactive console: per-viewer list/detail/action views driven by chat
//! commands and button presses.

use crate::error::RuntimeError;
use crate::model::{short_id, ChatId, Entity, MessageId};
use crate::notifier::{Button, Controls, Notifier};
use crate::render;
use crate::runtime::RuntimeClient;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PAGE_SIZE: usize = 6;
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(10);
const BUTTONS_PER_ROW: usize = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fresh list message at page 0.
    List,
    /// List re-entered at the remembered page.
    Check,
    /// One-shot summary of every entity.
    Status,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let name = input.trim().trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "list" => Ok(Command::List),
            "check" => Ok(Command::Check),
            "status" => Ok(Command::Status),
            other => Err(format!("Unknown command: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Prev,
    Next,
    Back,
}

impl Navigation {
    fn as_str(&self) -> &'static str {
        match self {
            Navigation::Prev => "prev",
            Navigation::Next => "next",
            Navigation::Back => "back",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Button payloads. Entity references carry only the short identifier, which
/// is resolved through the viewer's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    Select(String),
    Page(Navigation),
    Act(Action, String),
}

impl CallbackData {
    pub fn encode(&self) -> String {
        match self {
            CallbackData::Select(short_id) => format!("sel:{short_id}"),
            CallbackData::Page(nav) => format!("page:{}", nav.as_str()),
            CallbackData::Act(action, short_id) => format!("act:{}:{short_id}", action.as_str()),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        match (parts.next()?, parts.next()?, parts.next()) {
            ("sel", short_id, None) if !short_id.is_empty() => {
                Some(CallbackData::Select(short_id.to_string()))
            }
            ("page", "prev", None) => Some(CallbackData::Page(Navigation::Prev)),
            ("page", "next", None) => Some(CallbackData::Page(Navigation::Next)),
            ("page", "back", None) => Some(CallbackData::Page(Navigation::Back)),
            ("act", action, Some(short_id)) if !short_id.is_empty() => {
                let action = match action {
                    "start" => Action::Start,
                    "stop" => Action::Stop,
                    "restart" => Action::Restart,
                    _ => return None,
                };
                Some(CallbackData::Act(action, short_id.to_string()))
            }
            _ => None,
        }
    }
}

/// One page of a listing. `first`/`last` are 1-based for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub total_pages: usize,
    pub start: usize,
    pub end: usize,
    pub total: usize,
}

impl Page {
    /// Clamps `requested` into the available pages. An empty listing has a
    /// single empty page.
    pub fn locate(total: usize, requested: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let total_pages = total.div_ceil(page_size).max(1);
        let index = requested.min(total_pages - 1);
        let start = (index * page_size).min(total);
        let end = (start + page_size).min(total);
        Self {
            index,
            total_pages,
            start,
            end,
            total,
        }
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.total_pages
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Idle,
    Listing,
    Detail(String),
}

#[derive(Debug, Clone, Default)]
pub struct ViewerSession {
    pub page: usize,
    /// Tracked interactive message, `0` when none.
    pub message_id: MessageId,
    /// Short id to full id, for the entities on the last rendered page only.
    pub short_ids: HashMap<String, String>,
    pub view: View,
}

impl ViewerSession {
    pub fn resolve(&self, short: &str) -> Option<&str> {
        self.short_ids.get(short).map(String::as_str)
    }

    fn remap(&mut self, shown: &[Entity]) {
        self.short_ids = shown
            .iter()
            .map(|entity| (entity.short_id().to_string(), entity.id.clone()))
            .collect();
    }
}

/// Sessions keyed by viewer. The outer lock only guards lookup; each
/// session has its own lock held for a whole handler run.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<ViewerSession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, chat_id: ChatId) -> Arc<tokio::sync::Mutex<ViewerSession>> {
        lock(&self.sessions).entry(chat_id).or_default().clone()
    }

    pub async fn snapshot(&self, chat_id: ChatId) -> Option<ViewerSession> {
        let session = lock(&self.sessions).get(&chat_id).cloned()?;
        let guard = session.lock().await;
        Some(guard.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub page_size: usize,
    pub action_timeout: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            action_timeout: ACTION_TIMEOUT,
        }
    }
}

pub struct Console {
    runtime: Arc<dyn RuntimeClient>,
    notifier: Arc<dyn Notifier>,
    sessions: Arc<SessionStore>,
    config: ConsoleConfig,
}

impl Console {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        notifier: Arc<dyn Notifier>,
        sessions: Arc<SessionStore>,
        config: ConsoleConfig,
    ) -> Self {
        Self {
            runtime,
            notifier,
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Clears the client-side pending state of a button press.
    pub async fn acknowledge(&self, interaction_id: &str) {
        self.notifier.acknowledge_interaction(interaction_id, "").await;
    }

    pub async fn handle_command(&self, chat_id: ChatId, command: Command) {
        let session = self.sessions.session(chat_id);
        let mut session = session.lock().await;
        debug!(event = "console_command", chat_id = chat_id, command = ?command);
        match command {
            Command::List => {
                if session.message_id != 0 {
                    self.notifier.delete_message(chat_id, session.message_id).await;
                }
                session.message_id = 0;
                session.page = 0;
                self.show_list(chat_id, &mut session).await;
            }
            Command::Check => self.show_list(chat_id, &mut session).await,
            Command::Status => self.show_status(chat_id).await,
        }
    }

    pub async fn handle_callback(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        interaction_id: &str,
        data: &str,
    ) {
        self.acknowledge(interaction_id).await;
        let Some(callback) = CallbackData::parse(data) else {
            warn!(event = "console_callback_unknown", chat_id = chat_id, data = %data);
            return;
        };

        let session = self.sessions.session(chat_id);
        let mut session = session.lock().await;
        if message_id != 0 {
            session.message_id = message_id;
        }
        debug!(event = "console_callback", chat_id = chat_id, data = %data);
        match callback {
            CallbackData::Select(short) => {
                self.show_detail(chat_id, &mut session, &short, None).await;
            }
            CallbackData::Page(nav) => {
                session.page = match nav {
                    Navigation::Prev => session.page.saturating_sub(1),
                    Navigation::Next => session.page + 1,
                    Navigation::Back => 0,
                };
                self.show_list(chat_id, &mut session).await;
            }
            CallbackData::Act(action, short) => {
                self.run_action(chat_id, &mut session, action, &short).await;
            }
        }
    }

    async fn show_list(&self, chat_id: ChatId, session: &mut ViewerSession) {
        let entities = match self.runtime.list_entities(true).await {
            Ok(entities) => entities,
            Err(err) => {
                warn!(event = "console_list_failed", chat_id = chat_id, error = %err);
                self.edit_or_send(chat_id, session, &render::error("Failed to fetch containers"), None)
                    .await;
                return;
            }
        };

        let page = Page::locate(entities.len(), session.page, self.config.page_size);
        session.page = page.index;
        let shown = &entities[page.start..page.end];
        session.remap(shown);
        session.view = View::Listing;

        if shown.is_empty() {
            self.edit_or_send(chat_id, session, &render::empty_list(), None).await;
            return;
        }

        let mut controls = Controls::default();
        for pair in shown.chunks(BUTTONS_PER_ROW) {
            controls.push_row(
                pair.iter()
                    .map(|entity| {
                        Button::new(
                            render::list_button_label(entity),
                            CallbackData::Select(entity.short_id().to_string()).encode(),
                        )
                    })
                    .collect(),
            );
        }
        let mut nav = Vec::new();
        if page.has_prev() {
            nav.push(Button::new("⬅", CallbackData::Page(Navigation::Prev).encode()));
        }
        if page.has_next() {
            nav.push(Button::new("➡", CallbackData::Page(Navigation::Next).encode()));
        }
        controls.push_row(nav);

        let text = render::list_header(page.start + 1, page.end, page.total);
        self.edit_or_send(chat_id, session, &text, Some(&controls)).await;
    }

    async fn show_detail(
        &self,
        chat_id: ChatId,
        session: &mut ViewerSession,
        short: &str,
        banner: Option<String>,
    ) {
        let Some(full_id) = session.resolve(short).map(str::to_string) else {
            debug!(event = "console_short_id_unknown", chat_id = chat_id, short_id = %short);
            self.edit_or_send(chat_id, session, &render::error("Container not found"), None)
                .await;
            return;
        };

        let detail = match self.runtime.inspect_entity(&full_id).await {
            Ok(detail) => detail,
            Err(err) => {
                warn!(event = "console_inspect_failed", chat_id = chat_id, entity_id = %short, error = %err);
                let message = if err.is_not_found() {
                    "Container not found".to_string()
                } else {
                    format!("Failed to inspect container: {err}")
                };
                self.edit_or_send(chat_id, session, &render::error(&message), None)
                    .await;
                return;
            }
        };

        let mut controls = Controls::default();
        controls.push_row(vec![
            Button::new("▶️ Start", CallbackData::Act(Action::Start, short.to_string()).encode()),
            Button::new("⏹️ Stop", CallbackData::Act(Action::Stop, short.to_string()).encode()),
        ]);
        controls.push_row(vec![
            Button::new(
                "🔄 Restart",
                CallbackData::Act(Action::Restart, short.to_string()).encode(),
            ),
            Button::new("↩️ Back", CallbackData::Page(Navigation::Back).encode()),
        ]);

        let body = render::detail(&detail);
        let text = match banner {
            Some(banner) => format!("{banner}\n\n{body}"),
            None => body,
        };
        session.view = View::Detail(short.to_string());
        self.edit_or_send(chat_id, session, &text, Some(&controls)).await;
    }

    async fn run_action(
        &self,
        chat_id: ChatId,
        session: &mut ViewerSession,
        action: Action,
        short: &str,
    ) {
        let Some(full_id) = session.resolve(short).map(str::to_string) else {
            debug!(event = "console_short_id_unknown", chat_id = chat_id, short_id = %short);
            self.edit_or_send(chat_id, session, &render::error("Container not found"), None)
                .await;
            return;
        };

        let timeout = self.config.action_timeout;
        let outcome: Result<(), RuntimeError> = match action {
            Action::Start => self.runtime.start_entity(&full_id).await,
            Action::Stop => self.runtime.stop_entity(&full_id, timeout).await,
            Action::Restart => self.runtime.restart_entity(&full_id, timeout).await,
        };
        let banner = match outcome {
            Ok(()) => {
                info!(event = "console_action", chat_id = chat_id, entity_id = %short_id(&full_id), action = %action);
                render::action_succeeded(action.as_str(), short)
            }
            Err(err) => {
                warn!(
                    event = "console_action_failed",
                    chat_id = chat_id,
                    entity_id = %short_id(&full_id),
                    action = %action,
                    error = %err
                );
                render::action_failed(action.as_str(), &err.to_string())
            }
        };
        self.show_detail(chat_id, session, short, Some(banner)).await;
    }

    async fn show_status(&self, chat_id: ChatId) {
        let text = match self.runtime.list_entities(true).await {
            Ok(entities) => render::status_summary(&entities),
            Err(err) => {
                warn!(event = "console_status_failed", chat_id = chat_id, error = %err);
                render::error(&format!("Error retrieving container list: {err}"))
            }
        };
        self.notifier.send_text(chat_id, &text).await;
    }

    /// Edits the tracked message in place, or sends a new one and tracks it.
    async fn edit_or_send(
        &self,
        chat_id: ChatId,
        session: &mut ViewerSession,
        text: &str,
        controls: Option<&Controls>,
    ) {
        if session.message_id != 0 {
            match controls {
                Some(controls) => {
                    self.notifier
                        .edit_text_with_controls(chat_id, session.message_id, text, controls)
                        .await
                }
                None => self.notifier.edit_text(chat_id, session.message_id, text).await,
            }
            return;
        }
        session.message_id = match controls {
            Some(controls) => {
                self.notifier
                    .send_text_with_controls(chat_id, text, controls)
                    .await
            }
            None => self.notifier.send_text(chat_id, text).await,
        };
    }
}
