use crate::api::{InlineKeyboardButton, InlineKeyboardMarkup, TelegramClient, TelegramError};
use async_trait::async_trait;
use dockwatch_core::{ChatId, Controls, MessageId, Notifier};
use std::sync::Arc;
use tracing::{debug, warn};

pub fn keyboard(controls: &Controls) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: controls
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| InlineKeyboardButton {
                        text: button.label.clone(),
                        callback_data: button.payload.clone(),
                    })
                    .collect()
            })
            .collect(),
    }
}

fn report(op: &'static str, chat_id: Option<ChatId>, err: &TelegramError) {
    if err.is_not_modified() {
        debug!(event = "telegram_not_modified", op = op);
        return;
    }
    warn!(
        event = "telegram_delivery_failed",
        op = op,
        chat_id = chat_id.unwrap_or_default(),
        error = %err
    );
}

/// Chat delivery over the Bot API. Failures are logged and dropped.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Arc<TelegramClient>,
}

impl TelegramNotifier {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }

    async fn send(&self, chat_id: ChatId, text: &str, controls: Option<&Controls>) -> MessageId {
        let markup = controls.map(keyboard);
        match self.client.send_message(chat_id, text, markup.as_ref()).await {
            Ok(message) => message.message_id,
            Err(err) => {
                report("send_message", Some(chat_id), &err);
                0
            }
        }
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        controls: Option<&Controls>,
    ) {
        let markup = controls.map(keyboard);
        if let Err(err) = self
            .client
            .edit_message_text(chat_id, message_id, text, markup.as_ref())
            .await
        {
            report("edit_message_text", Some(chat_id), &err);
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> MessageId {
        self.send(chat_id, text, None).await
    }

    async fn send_text_with_controls(
        &self,
        chat_id: ChatId,
        text: &str,
        controls: &Controls,
    ) -> MessageId {
        self.send(chat_id, text, Some(controls)).await
    }

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) {
        self.edit(chat_id, message_id, text, None).await
    }

    async fn edit_text_with_controls(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        controls: &Controls,
    ) {
        self.edit(chat_id, message_id, text, Some(controls)).await
    }

    async fn acknowledge_interaction(&self, interaction_id: &str, text: &str) {
        if let Err(err) = self.client.answer_callback_query(interaction_id, text).await {
            report("answer_callback_query", None, &err);
        }
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) {
        if let Err(err) = self.client.delete_message(chat_id, message_id).await {
            report("delete_message", Some(chat_id), &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockwatch_core::Button;

    #[test]
    fn controls_become_inline_keyboard_rows() {
        let mut controls = Controls::default();
        controls.push_row(vec![
            Button::new("🟢 web", "sel:aaaaaaaaaaaa"),
            Button::new("🔴 db", "sel:bbbbbbbbbbbb"),
        ]);
        controls.push_row(vec![Button::new("➡", "page:next")]);

        let markup = keyboard(&controls);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0][1].text, "🔴 db");
        assert_eq!(markup.inline_keyboard[1][0].callback_data, "page:next");
    }
}
