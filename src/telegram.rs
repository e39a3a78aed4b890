//! Telegram Bot API client: the notification sink and the source of bot
//! command updates.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::secrets::telegram_method_url;
use crate::error::{Error, Result};
use crate::model::ChatId;
use crate::sink::{Delivery, NotificationSink};

const API_BASE: &str = "https://api.telegram.org";

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<Option<T>> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(Error::Sink(format!(
                "{method} rejected: {}",
                self.description.unwrap_or_else(|| "no description".to_string())
            )))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

pub struct TelegramClient {
    http: reqwest::Client,
    token: SecretString,
    base: String,
}

impl TelegramClient {
    /// `timeout` must exceed the long-poll wait passed to
    /// [`TelegramClient::get_updates`].
    pub fn new(token: SecretString, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            token,
            base: API_BASE.to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        telegram_method_url(&self.base, &self.token, method)
    }

    /// Send a plain-text message to one chat.
    pub async fn send_message(&self, chat: ChatId, text: &str) -> Result<()> {
        let chat_id = chat.0.to_string();
        let response: ApiResponse<serde_json::Value> = self
            .http
            .post(self.url("sendMessage"))
            .form(&[("chat_id", chat_id.as_str()), ("text", text)])
            .send()
            .await
            .map_err(strip_url)?
            .json()
            .await
            .map_err(strip_url)?;
        response.into_result("sendMessage").map(|_| ())
    }

    /// Long-poll for updates with ids at or above `offset`.
    pub async fn get_updates(&self, offset: i64, wait: Duration) -> Result<Vec<Update>> {
        let response: ApiResponse<Vec<Update>> = self
            .http
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", wait.as_secs().to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await
            .map_err(strip_url)?
            .json()
            .await
            .map_err(strip_url)?;
        Ok(response.into_result("getUpdates")?.unwrap_or_default())
    }
}

/// reqwest errors carry the request URL, which embeds the bot token.
fn strip_url(err: reqwest::Error) -> Error {
    Error::Http(err.without_url())
}

#[async_trait]
impl NotificationSink for TelegramClient {
    async fn deliver(&self, message: &str, destinations: &[ChatId]) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(destinations.len());
        for &chat in destinations {
            match self.send_message(chat, message).await {
                Ok(()) => deliveries.push(Delivery::ok(chat)),
                Err(e) => {
                    warn!(%chat, error = %e, "telegram delivery failed");
                    deliveries.push(Delivery::failed(chat, e.to_string()));
                }
            }
        }
        deliveries
    }
}
