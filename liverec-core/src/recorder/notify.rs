//! Outbound session notifications.

use async_trait::async_trait;
use liverec_providers::TelegramClient;
use tracing::{info, warn};

use crate::error::Result;

/// Fire-and-forget text notifications. Delivery failures are logged by the
/// implementation and never reach the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Sends to one Telegram chat
pub struct TelegramNotifier {
    client: TelegramClient,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        Ok(Self {
            client: TelegramClient::new(bot_token, chat_id)?,
        })
    }

    #[must_use]
    pub fn from_client(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        match self.client.send_message(text).await {
            Ok(()) => info!(text, "Notification sent"),
            Err(e) => warn!(text, error = %e, "Failed to send notification"),
        }
    }
}

/// Used when no Telegram chat is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!(text, "Notification (no channel configured)");
    }
}
