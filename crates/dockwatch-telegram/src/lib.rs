//! Telegram Bot API backend: outbound notifier and inbound update poller.

pub mod api;
pub mod notifier;
pub mod poller;

pub use api::{TelegramClient, TelegramError, User, DEFAULT_API_URL};
pub use notifier::TelegramNotifier;
pub use poller::TelegramPoller;
