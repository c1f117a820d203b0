//! Telegram Bot API sink (`POST /bot<token>/sendMessage`).
//!
//! 429 responses are retried after `parameters.retry_after`.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Action, Notification, NotificationSink};
use crate::config::TelegramConfig;
use crate::constants::{TELEGRAM_CHUNK_CHARS, TELEGRAM_MAX_RATE_LIMIT_RETRIES};
use crate::error::{Result, WatchError};
use crate::metrics;

#[derive(Clone)]
pub struct TelegramSink {
    client: Client,
    endpoint: String,
    default_chat: Option<String>,
}

impl TelegramSink {
    /// `None` when no bot token is configured.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        let Some(token) = config.bot_token.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Some(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", config.api_base.trim_end_matches('/'), token),
            default_chat: config.chat_id.clone(),
        }))
    }

    async fn deliver(&self, chat_id: &str, notification: &Notification) -> Result<()> {
        let chunks = chunk_text(&notification.text, TELEGRAM_CHUNK_CHARS);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let mut payload = json!({
                "chat_id": chat_id,
                "text": chunk,
                "disable_web_page_preview": true,
            });
            if i == last && !notification.actions.is_empty() {
                payload["reply_markup"] = inline_keyboard(&notification.actions);
            }
            self.send_with_retry(&payload).await?;
        }
        Ok(())
    }

    async fn send_with_retry(&self, payload: &Value) -> Result<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let response = self.client.post(&self.endpoint).json(payload).send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let body: Value = response.json().await.unwrap_or_default();
                let retry_after = body
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);
                if attempts >= TELEGRAM_MAX_RATE_LIMIT_RETRIES {
                    return Err(WatchError::Notify(format!(
                        "Telegram rate limit exceeded after {} attempts (last retry_after {:?})",
                        attempts, retry_after
                    )));
                }
                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited, waiting {:?} (attempt {}/{})",
                    wait, attempts, TELEGRAM_MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Notify(format!("Telegram sendMessage failed: {} - {}", status, body)));
        }
    }
}

impl NotificationSink for TelegramSink {
    fn notify(&self, notification: Notification) {
        let Some(chat_id) = notification.target.clone().or_else(|| self.default_chat.clone()) else {
            warn!(monitor = %notification.monitor_id, "No Telegram chat for notification; dropped");
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; Telegram notification dropped");
            return;
        };
        let sink = self.clone();
        handle.spawn(async move {
            match sink.deliver(&chat_id, &notification).await {
                Ok(()) => metrics::notify::sent(notification.kind.as_str()),
                Err(e) => warn!(monitor = %notification.monitor_id, "Telegram delivery failed: {}", e),
            }
        });
    }
}

fn inline_keyboard(rows: &[Vec<Action>]) -> Value {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|action| match action {
                    Action::Url { label, url } => json!({ "text": label, "url": url }),
                    Action::Callback { label, data } => json!({ "text": label, "callback_data": data }),
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Split on line boundaries into pieces of at most `limit` characters.
pub(crate) fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current = piece.iter().collect();
                current_len = piece.len();
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
