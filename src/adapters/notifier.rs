//! Operator notifications over Telegram and Lark webhooks.
//!
//! Delivery is fire-and-forget: a failed notification is logged and the
//! trading loop moves on.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
struct TelegramChannel {
    bot_token: String,
    chat_id: String,
}

pub struct Notifier {
    http: Client,
    telegram: Option<TelegramChannel>,
    lark_token: Option<String>,
}

impl Notifier {
    /// Build from the environment: `TELEGRAM_BOT_TOKEN` + `TELEGRAM_CHAT_ID`
    /// for Telegram, `LARK_TOKEN` for Lark. Channels without credentials are
    /// simply disabled.
    pub fn from_env() -> Self {
        let telegram = match (
            std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            std::env::var("TELEGRAM_CHAT_ID").ok(),
        ) {
            (Some(bot_token), Some(chat_id))
                if !bot_token.trim().is_empty() && !chat_id.trim().is_empty() =>
            {
                Some(TelegramChannel { bot_token, chat_id })
            }
            _ => None,
        };
        let lark_token =
            std::env::var("LARK_TOKEN").ok().filter(|t| !t.trim().is_empty());

        if telegram.is_none() && lark_token.is_none() {
            debug!("No notification channels configured");
        }

        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            telegram,
            lark_token,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.telegram.is_some() || self.lark_token.is_some()
    }

    /// Send `text` to every configured channel without blocking the caller.
    pub fn notify(&self, text: &str) {
        if let Some(telegram) = self.telegram.clone() {
            let http = self.http.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                let url = format!(
                    "https://api.telegram.org/bot{}/sendMessage",
                    telegram.bot_token
                );
                let body = json!({ "chat_id": telegram.chat_id, "text": text });
                match http.post(&url).json(&body).send().await {
                    Ok(response) if !response.status().is_success() => {
                        warn!("Telegram notification rejected: {}", response.status());
                    }
                    Err(e) => warn!("Telegram notification failed: {}", e),
                    _ => {}
                }
            });
        }

        if let Some(token) = self.lark_token.clone() {
            let http = self.http.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                let url = format!("https://open.larksuite.com/open-apis/bot/v2/hook/{}", token);
                let body = json!({ "msg_type": "text", "content": { "text": text } });
                match http.post(&url).json(&body).send().await {
                    Ok(response) if !response.status().is_success() => {
                        warn!("Lark notification rejected: {}", response.status());
                    }
                    Err(e) => warn!("Lark notification failed: {}", e),
                    _ => {}
                }
            });
        }
    }
}
