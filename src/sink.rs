//! Notification sink: delivers formatted messages to chats.

use async_trait::async_trait;

use crate::model::ChatId;

/// Outcome of delivering one message to one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub chat: ChatId,
    pub result: Result<(), String>,
}

impl Delivery {
    pub fn ok(chat: ChatId) -> Self {
        Self {
            chat,
            result: Ok(()),
        }
    }

    pub fn failed(chat: ChatId, reason: impl Into<String>) -> Self {
        Self {
            chat,
            result: Err(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send `message` to every chat in `destinations`. One result per chat,
    /// in the same order.
    async fn deliver(&self, message: &str, destinations: &[ChatId]) -> Vec<Delivery>;
}
