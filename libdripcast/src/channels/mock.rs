//! Mock channel implementation for testing
//!
//! This module provides a configurable mock destination that records every
//! call it receives and can simulate failures from a given call onward. It is
//! available to all builds so integration tests can verify dispatch behavior
//! without a bot token or network access.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::channels::{
    Channel, MessageRef, OutgoingAlbum, OutgoingMedia, OutgoingPoll, OutgoingText,
};
use crate::error::{ChannelError, Result};

/// A single recorded outbound call
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCall {
    Text(OutgoingText),
    Media(OutgoingMedia),
    Album(OutgoingAlbum),
    Poll(OutgoingPoll),
    EditMedia(MessageRef, OutgoingMedia),
}

/// Configuration for mock channel behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Channel name (e.g., "mock")
    pub name: String,

    /// Chat id reported in returned message references
    pub chat_id: i64,

    /// Zero-based index of the first call that fails; `None` never fails
    pub fail_from_call: Option<usize>,

    /// Error message returned by failing calls
    pub error: String,

    /// Callback payload limit to advertise
    pub max_callback_bytes: Option<usize>,

    /// Calls that have been made (for verification)
    pub calls: Arc<Mutex<Vec<ChannelCall>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            chat_id: -100,
            fail_from_call: None,
            error: "Mock sending failed".to_string(),
            max_callback_bytes: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock channel for testing
pub struct MockChannel {
    config: MockConfig,
}

impl MockChannel {
    /// Create a new mock channel with the given configuration
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock channel that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock channel whose calls fail starting with call `index`
    pub fn failing_from(name: &str, index: usize, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            fail_from_call: Some(index),
            error: error.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock channel advertising a callback payload limit
    pub fn with_callback_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            max_callback_bytes: Some(limit),
            ..Default::default()
        })
    }

    /// All calls recorded so far, successful or not
    pub fn calls(&self) -> Vec<ChannelCall> {
        self.config.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.config.calls.lock().unwrap().len()
    }

    /// Shared handle to the call log, usable after the channel is moved
    pub fn call_log(&self) -> Arc<Mutex<Vec<ChannelCall>>> {
        self.config.calls.clone()
    }

    fn record(&self, call: ChannelCall) -> Result<MessageRef> {
        let mut calls = self.config.calls.lock().unwrap();
        let index = calls.len();
        calls.push(call);

        match self.config.fail_from_call {
            Some(first) if index >= first => {
                Err(ChannelError::Sending(self.config.error.clone()).into())
            }
            _ => Ok(MessageRef {
                chat_id: self.config.chat_id,
                message_id: index as i64 + 1,
            }),
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn max_callback_bytes(&self) -> Option<usize> {
        self.config.max_callback_bytes
    }

    async fn send_text(&self, message: &OutgoingText) -> Result<MessageRef> {
        self.record(ChannelCall::Text(message.clone()))
    }

    async fn send_media(&self, media: &OutgoingMedia) -> Result<MessageRef> {
        self.record(ChannelCall::Media(media.clone()))
    }

    async fn send_album(&self, album: &OutgoingAlbum) -> Result<Vec<MessageRef>> {
        let first = self.record(ChannelCall::Album(album.clone()))?;
        Ok((0..album.items.len() as i64)
            .map(|offset| MessageRef {
                chat_id: first.chat_id,
                message_id: first.message_id + offset,
            })
            .collect())
    }

    async fn send_poll(&self, poll: &OutgoingPoll) -> Result<MessageRef> {
        self.record(ChannelCall::Poll(poll.clone()))
    }

    async fn edit_media(&self, target: &MessageRef, media: &OutgoingMedia) -> Result<()> {
        self.record(ChannelCall::EditMedia(*target, media.clone()))
            .map(|_| ())
    }
}
