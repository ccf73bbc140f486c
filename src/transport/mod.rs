//! Chat transport - send/edit abstraction over the chat platform
//!
//! The controller only knows this trait; the Telegram implementation
//! lives in `telegram.rs`. Sends to denylisted chats are suppressed at
//! this layer.

pub mod telegram;

use async_trait::async_trait;

use crate::error::Result;

pub use telegram::{InboundEvent, TelegramTransport, UpdatePoller};

/// One inline button: label + exact-match callback tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub tag: String,
}

impl Button {
    pub fn new(label: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tag: tag.into(),
        }
    }
}

/// Inline keyboard, rows of buttons
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    /// Single-button keyboard
    pub fn single(label: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            rows: vec![vec![Button::new(label, tag)]],
        }
    }
}

/// Outbound chat surface consumed by the controller
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message; returns the message id when delivered, None when
    /// suppressed or the platform refused it
    async fn send_message(
        &self,
        uid: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<Option<i64>>;

    /// Edit a previously sent message in place
    async fn edit_message(
        &self,
        uid: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()>;

    /// Acknowledge a button press
    async fn answer_callback(&self, callback_id: &str) -> Result<()>;

    /// Send a banner image; missing files are skipped silently
    async fn send_photo(&self, uid: i64, path: &str, caption: &str) -> Result<()>;
}
