use crate::api::{Message, TelegramClient, Update};
use dockwatch_core::InboundUpdate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Command name of a bot command message, without the slash or an
/// `@botname` suffix.
pub fn command_name(message: &Message) -> Option<String> {
    let text = message.text.as_deref()?;
    let is_command = message
        .entities
        .iter()
        .any(|entity| entity.kind == "bot_command" && entity.offset == 0);
    if !is_command && !text.starts_with('/') {
        return None;
    }
    let token = text.split_whitespace().next()?.strip_prefix('/')?;
    let name = token.split('@').next().unwrap_or(token);
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

/// Converts a raw update into viewer input. Plain chat messages and
/// callbacks detached from a message are dropped.
pub fn inbound(update: Update) -> Option<InboundUpdate> {
    if let Some(query) = update.callback_query {
        let message = query.message?;
        return Some(InboundUpdate::Callback {
            chat_id: message.chat.id,
            message_id: message.message_id,
            interaction_id: query.id,
            data: query.data.unwrap_or_default(),
        });
    }
    let message = update.message?;
    let name = command_name(&message)?;
    Some(InboundUpdate::Command {
        chat_id: message.chat.id,
        name,
    })
}

/// Long-polls `getUpdates` and forwards viewer input.
pub struct TelegramPoller {
    client: Arc<TelegramClient>,
    poll_timeout: Duration,
    backoff: Duration,
    offset: i64,
}

impl TelegramPoller {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self {
            client,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            backoff: DEFAULT_POLL_BACKOFF,
            offset: 0,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(
        mut self,
        updates: mpsc::Sender<InboundUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(event = "telegram_poller_start", poll_timeout_s = self.poll_timeout.as_secs());
        loop {
            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                batch = self.client.get_updates(self.offset, self.poll_timeout) => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(event = "telegram_poll_failed", error = %err);
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => continue,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            for update in batch {
                self.offset = self.offset.max(update.update_id + 1);
                let update_id = update.update_id;
                if let Some(query) = update
                    .callback_query
                    .as_ref()
                    .filter(|query| query.message.is_none())
                {
                    if let Err(err) = self.client.answer_callback_query(&query.id, "").await {
                        warn!(event = "telegram_callback_ack_failed", update_id = update_id, error = %err);
                    }
                }
                let Some(input) = inbound(update) else {
                    debug!(event = "telegram_update_ignored", update_id = update_id);
                    continue;
                };
                if updates.send(input).await.is_err() {
                    info!(event = "telegram_poller_receiver_closed");
                    return;
                }
            }
        }
        info!(event = "telegram_poller_stop");
    }
}
