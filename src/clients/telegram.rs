//! Minimal Telegram Bot API client: long polling and HTML replies

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::clients::traits::ReportSink;
use crate::config::TelegramConfig;
use crate::engine::InboundMessage;
use crate::error::{Result, StockError};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

impl Update {
    /// Only plain messages are of interest; edits, reactions and the like map to None
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let message = self.message?;
        let sender_id = message
            .from
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| format!("chat:{}", message.chat.id));
        Some(InboundMessage {
            sender_id,
            chat_id: message.chat.id,
            topic_id: message.message_thread_id,
            message_id: message.message_id,
            text: message.text,
            received_at: DateTime::<Utc>::from_timestamp(message.date, 0)
                .unwrap_or_else(Utc::now),
        })
    }
}

pub struct TelegramClient {
    client: Client,
    base: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| StockError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", config.api_base.trim().trim_end_matches('/'), token),
        })
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let resp = self
            .client
            .get(format!("{}/getUpdates", self.base))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await?;
        unwrap_envelope(resp, "getUpdates").await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        topic_id: Option<i64>,
        reply_to: Option<i64>,
        text: &str,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(topic) = topic_id {
            body["message_thread_id"] = json!(topic);
        }
        if let Some(message_id) = reply_to {
            body["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base))
            .json(&body)
            .send()
            .await?;
        let _: Value = unwrap_envelope(resp, "sendMessage").await?;
        Ok(())
    }
}

async fn unwrap_envelope<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    method: &str,
) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await?;
    let envelope: Envelope<T> =
        serde_json::from_str(&text).map_err(|e| StockError::MalformedResponse {
            message: format!(
                "telegram {} returned {} with unparsable body: {}",
                method, status, e
            ),
        })?;
    if !envelope.ok {
        return Err(StockError::Transport {
            message: format!(
                "telegram {} failed with {}: {}",
                method,
                status,
                envelope.description.unwrap_or_default()
            ),
        });
    }
    envelope.result.ok_or_else(|| StockError::MalformedResponse {
        message: format!("telegram {} response missing result", method),
    })
}

/// Fixed chat/topic the scheduled report is pushed to
pub struct TelegramDestination {
    client: std::sync::Arc<TelegramClient>,
    chat_id: i64,
    topic_id: Option<i64>,
}

impl TelegramDestination {
    pub fn new(
        client: std::sync::Arc<TelegramClient>,
        chat_id: i64,
        topic_id: Option<i64>,
    ) -> Self {
        Self {
            client,
            chat_id,
            topic_id,
        }
    }
}

#[async_trait]
impl ReportSink for TelegramDestination {
    async fn push_report(&self, text: &str) -> Result<()> {
        self.client
            .send_message(self.chat_id, self.topic_id, None, text)
            .await
    }
}
