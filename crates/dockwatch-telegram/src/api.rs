use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Slack on top of the long-poll timeout before the HTTP call gives up.
const POLL_SLACK: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bot api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("bot api returned no result for {0}")]
    MissingResult(String),
}

impl TelegramError {
    /// Edits that leave the message unchanged are rejected by the API.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, TelegramError::Api { description, .. } if description.contains("message is not modified"))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// Minimal Bot API client over JSON POST calls.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str, api_url: &str) -> Result<Self, TelegramError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<R, TelegramError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(params)
            .timeout(timeout)
            .send()
            .await?;
        let body: ApiResponse<R> = response.json().await?;
        if !body.ok {
            return Err(TelegramError::Api {
                code: body.error_code.unwrap_or_default(),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result
            .ok_or_else(|| TelegramError::MissingResult(method.to_string()))
    }

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({}), REQUEST_TIMEOUT).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TelegramError> {
        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = json!(keyboard);
        }
        self.call("sendMessage", &params, REQUEST_TIMEOUT).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let mut params = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = json!(keyboard);
        }
        // The result is the edited message or `true`.
        let _: Value = self.call("editMessageText", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, id: &str, text: &str) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": id, "text": text }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let params = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &params, poll_timeout + POLL_SLACK)
            .await
    }
}
