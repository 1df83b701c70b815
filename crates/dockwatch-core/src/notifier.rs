use crate::model::{ChatId, MessageId};
use crate::render::Notice;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Button {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Interactive controls attached to a message, laid out in rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controls {
    pub rows: Vec<Vec<Button>>,
}

impl Controls {
    pub fn push_row(&mut self, row: Vec<Button>) {
        if !row.is_empty() {
            self.rows.push(row);
        }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    pub fn payloads(&self) -> Vec<&str> {
        self.buttons().map(|button| button.payload.as_str()).collect()
    }
}

/// Delivery boundary to the chat platform.
///
/// Implementations log and swallow every delivery failure; the send
/// operations return `0` when no message was created.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> MessageId;

    async fn send_text_with_controls(
        &self,
        chat_id: ChatId,
        text: &str,
        controls: &Controls,
    ) -> MessageId;

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str);

    async fn edit_text_with_controls(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        controls: &Controls,
    );

    async fn acknowledge_interaction(&self, interaction_id: &str, text: &str);

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId);
}

/// Renders passive notices and delivers them to the operator chat.
#[derive(Clone)]
pub struct NoticeSink {
    notifier: Arc<dyn Notifier>,
    chat_id: ChatId,
}

impl NoticeSink {
    pub fn new(notifier: Arc<dyn Notifier>, chat_id: ChatId) -> Self {
        Self { notifier, chat_id }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub async fn deliver(&self, notice: &Notice) -> MessageId {
        let message_id = self.notifier.send_text(self.chat_id, &notice.render()).await;
        debug!(event = "notice_delivered", chat_id = self.chat_id, message_id = message_id);
        message_id
    }
}
