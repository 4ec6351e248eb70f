//! Telegram Bot HTTP Client

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{check_response, json_with_limit, ProviderClientError};

/// Default Bot API host
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct SendMessageResp {
    ok: bool,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    description: String,
}

/// Telegram Bot HTTP Client
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    bot_token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramClient {
    /// Create a client bound to one bot and one chat
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, ProviderClientError> {
        let bot_token = bot_token.into();
        let chat_id = chat_id.into();
        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(ProviderClientError::InvalidConfig(
                "telegram bot token and chat id are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderClientError::Network(e.to_string()))?;

        Ok(Self {
            client,
            bot_token,
            chat_id,
            api_base: TELEGRAM_API_BASE.to_string(),
        })
    }

    /// Point the client at a different Bot API host
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a plain-text message to the configured chat
    pub async fn send_message(&self, text: &str) -> Result<(), ProviderClientError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let req = self
            .client
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)]);

        let resp = check_response(req.send().await?)?;
        let json: SendMessageResp = json_with_limit(resp).await?;
        if !json.ok {
            return Err(ProviderClientError::Api {
                code: json.error_code,
                message: json.description,
            });
        }

        tracing::debug!(chat_id = %self.chat_id, "Telegram message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_requires_token_and_chat() {
        assert!(TelegramClient::new("", "123").is_err());
        assert!(TelegramClient::new("token", "").is_err());
        assert!(TelegramClient::new("token", "123").is_ok());
    }

    #[tokio::test]
    async fn test_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendMessage"))
            .and(body_string_contains("chat_id=42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TelegramClient::new("token", "42").unwrap().with_api_base(server.uri());
        client.send_message("recording started").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_message_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::new("token", "42").unwrap().with_api_base(server.uri());
        let err = client.send_message("hi").await.unwrap_err();
        assert!(matches!(err, ProviderClientError::Api { code: 403, .. }));
    }
}
