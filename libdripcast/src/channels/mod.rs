//! Destination channel abstraction and implementations
//!
//! The dispatcher never talks to a messaging API directly. It shapes each post
//! into one or more outgoing payloads and hands them to a [`Channel`], which
//! owns the single configured destination.
//!
//! # Examples
//!
//! ```no_run
//! use libdripcast::channels::{Channel, OutgoingText};
//! use libdripcast::channels::mock::MockChannel;
//!
//! # async fn example() -> libdripcast::Result<()> {
//! let channel = MockChannel::success("test");
//! let sent = channel.send_text(&OutgoingText::plain("Hello, channel!")).await?;
//! println!("Sent message {}", sent.message_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::ops::RangeInclusive;

use crate::error::Result;
use crate::types::{AlbumItem, LinkButton, MediaKind};

pub mod mock;
pub mod telegram;

/// Location of a message that was delivered to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// An inline control under a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Url { text: String, url: String },
    Callback { text: String, data: String },
}

/// Rows of inline controls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    /// A single row of link buttons, or `None` when there are no buttons
    pub fn links(buttons: &[LinkButton]) -> Option<Self> {
        if buttons.is_empty() {
            return None;
        }
        Some(Self {
            rows: vec![buttons
                .iter()
                .map(|b| Button::Url {
                    text: b.text.clone(),
                    url: b.url.clone(),
                })
                .collect()],
        })
    }

    pub fn row(buttons: Vec<Button>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }

    /// Bot API `InlineKeyboardMarkup` representation
    pub fn to_json(&self) -> Value {
        let rows: Vec<Vec<Value>> = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| match button {
                        Button::Url { text, url } => json!({"text": text, "url": url}),
                        Button::Callback { text, data } => {
                            json!({"text": text, "callback_data": data})
                        }
                    })
                    .collect()
            })
            .collect();
        json!({ "inline_keyboard": rows })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingText {
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub silent: bool,
}

impl OutgoingText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
            silent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    /// Opaque reference to previously uploaded content
    pub file: String,
    pub caption: String,
    pub keyboard: Option<Keyboard>,
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingAlbum {
    pub items: Vec<AlbumItem>,
    /// Attached to the first item
    pub caption: String,
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingPoll {
    pub question: String,
    pub options: Vec<String>,
    pub anonymous: bool,
    pub allows_multiple_answers: bool,
    pub silent: bool,
}

/// Destination trait for the single configured target
///
/// Every send goes to the one destination the implementation was built for.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Lowercase identifier used in logs (e.g. "telegram")
    fn name(&self) -> &str;

    /// Largest callback payload an inline control may carry, `None` for no limit
    fn max_callback_bytes(&self) -> Option<usize> {
        None
    }

    /// Allowed number of poll options
    fn poll_option_limits(&self) -> RangeInclusive<usize> {
        2..=10
    }

    async fn send_text(&self, message: &OutgoingText) -> Result<MessageRef>;

    async fn send_media(&self, media: &OutgoingMedia) -> Result<MessageRef>;

    /// Send a grouped media message; returns one reference per item
    async fn send_album(&self, album: &OutgoingAlbum) -> Result<Vec<MessageRef>>;

    async fn send_poll(&self, poll: &OutgoingPoll) -> Result<MessageRef>;

    /// Replace content, caption and controls of a previously sent media message
    async fn edit_media(&self, target: &MessageRef, media: &OutgoingMedia) -> Result<()>;
}
