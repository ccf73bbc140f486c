//! Telegram Bot API transport
//!
//! Thin HTTP client over the Bot API surface the desk actually uses:
//! sendMessage, editMessageText, answerCallbackQuery, sendPhoto, and a
//! getUpdates long-poll loop that turns updates into controller events.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::error::{Error, Result};

use super::{ChatTransport, Keyboard};

/// Inbound event delivered to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A chat message: slash command or free text
    Message {
        uid: i64,
        username: String,
        text: String,
    },
    /// An inline-button press
    Callback {
        uid: i64,
        callback_id: String,
        message_id: i64,
        data: String,
    },
}

fn keyboard_json(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.tag }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramTransport {
    http: reqwest::Client,
    base: String,
    denylist: HashSet<i64>,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(Error::MissingEnvVar("BOT_TOKEN".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.bot_token),
            denylist: config.denylist_chat_ids.iter().copied().collect(),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let envelope: ApiEnvelope<T> = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !envelope.ok {
            return Err(Error::Transport(format!(
                "{} failed: {}",
                method, envelope.description
            )));
        }
        envelope
            .result
            .ok_or_else(|| Error::Transport(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(
        &self,
        uid: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<Option<i64>> {
        if self.denylist.contains(&uid) {
            return Ok(None);
        }

        let mut body = json!({
            "chat_id": uid,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = keyboard_json(&kb);
        }

        match self.call::<SentMessage>("sendMessage", body).await {
            Ok(sent) => Ok(Some(sent.message_id)),
            Err(e) => {
                // Delivery failures must not abort the calling handler
                warn!("sendMessage to {} failed: {}", uid, e);
                Ok(None)
            }
        }
    }

    async fn edit_message(
        &self,
        uid: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        if self.denylist.contains(&uid) {
            return Ok(());
        }

        let mut body = json!({
            "chat_id": uid,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = keyboard_json(&kb);
        }

        self.call::<Value>("editMessageText", body).await.map(|_| ())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.call::<Value>(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_id }),
        )
        .await
        .map(|_| ())
    }

    async fn send_photo(&self, uid: i64, path: &str, caption: &str) -> Result<()> {
        if self.denylist.contains(&uid) {
            return Ok(());
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Banner {} not sent: {}", path, e);
                return Ok(());
            }
        };

        let form = reqwest::multipart::Form::new()
            .text("chat_id", uid.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name("banner.png"),
            );

        let result = self
            .http
            .post(format!("{}/sendPhoto", self.base))
            .multipart(form)
            .send()
            .await;

        if let Err(e) = result {
            warn!("sendPhoto to {} failed: {}", uid, e);
        }
        Ok(())
    }
}

// ============ Update polling ============

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct CallbackQuery {
    id: String,
    from: CallbackFrom,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Deserialize)]
struct CallbackFrom {
    id: i64,
}

/// getUpdates long-poll loop
pub struct UpdatePoller {
    http: reqwest::Client,
    base: String,
    poll_timeout_secs: u64,
    offset: i64,
}

impl UpdatePoller {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(Error::MissingEnvVar("BOT_TOKEN".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.bot_token),
            poll_timeout_secs: config.poll_timeout_secs,
            offset: 0,
        })
    }

    /// Block on getUpdates and translate the batch into events
    pub async fn poll(&mut self) -> Result<Vec<InboundEvent>> {
        let envelope: ApiEnvelope<Vec<Update>> = self
            .http
            .post(format!("{}/getUpdates", self.base))
            .json(&json!({
                "timeout": self.poll_timeout_secs,
                "offset": self.offset,
                "allowed_updates": ["message", "callback_query"],
            }))
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !envelope.ok {
            return Err(Error::Transport(format!(
                "getUpdates failed: {}",
                envelope.description
            )));
        }

        let updates = envelope.result.unwrap_or_default();
        let mut events = Vec::with_capacity(updates.len());

        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);

            if let Some(message) = update.message {
                if let Some(text) = message.text {
                    events.push(InboundEvent::Message {
                        uid: message.chat.id,
                        username: message
                            .from
                            .and_then(|u| u.username)
                            .unwrap_or_default(),
                        text,
                    });
                }
            } else if let Some(query) = update.callback_query {
                let (uid, message_id) = match &query.message {
                    Some(m) => (m.chat.id, m.message_id),
                    None => (query.from.id, 0),
                };
                events.push(InboundEvent::Callback {
                    uid,
                    callback_id: query.id,
                    message_id,
                    data: query.data.unwrap_or_default(),
                });
            }
        }

        Ok(events)
    }
}
