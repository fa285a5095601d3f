//! Service facade for Dripcast
//!
//! `DripcastService` wires the queue, the dispatcher and the media recorder
//! together and exposes the operations the bot daemon and the operator CLI
//! need. Replies to operator commands are produced here so every front end
//! answers with the same text.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libdripcast::channels::mock::MockChannel;
//! use libdripcast::service::DripcastService;
//! use libdripcast::Config;
//!
//! # async fn example() -> libdripcast::Result<()> {
//! let config = Config::load()?;
//! let service = DripcastService::from_config(&config, Arc::new(MockChannel::success("mock"))).await?;
//!
//! println!("{}", service.status().await);
//! println!("{}", service.command_next(chrono::Utc::now()).await);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::capture::{extract_attachment, MediaRecorder, NO_ATTACHMENT_REPLY};
use crate::channels::telegram::Message;
use crate::channels::{Channel, MessageRef};
use crate::config::Config;
use crate::dispatch::{DeliveryReport, Dispatcher};
use crate::error::Result;
use crate::queue::PostQueue;
use crate::source::{GoogleSheets, TabularSource};

pub const POSTED_REPLY: &str = "Posted.";
pub const EMPTY_REPLY: &str = "No posts in the queue.";

/// Result of one posting attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Sent(DeliveryReport),
    /// The queue had nothing to deliver
    Empty,
}

/// Connect the configured spreadsheet, if any
pub fn connect_sheets(config: &Config) -> Option<Arc<dyn TabularSource>> {
    GoogleSheets::connect(&config.source).map(|sheets| Arc::new(sheets) as Arc<dyn TabularSource>)
}

/// Main service facade
pub struct DripcastService {
    queue: PostQueue,
    dispatcher: Dispatcher,
    recorder: MediaRecorder,
    admin_ids: Vec<u64>,
}

impl DripcastService {
    pub fn new(
        queue: PostQueue,
        dispatcher: Dispatcher,
        recorder: MediaRecorder,
        admin_ids: Vec<u64>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            recorder,
            admin_ids,
        }
    }

    /// Build every component from configuration and load the post list
    ///
    /// # Errors
    ///
    /// Returns an error if the configured timezone is invalid.
    pub async fn from_config(config: &Config, channel: Arc<dyn Channel>) -> Result<Self> {
        let sheets = connect_sheets(config);
        let queue = PostQueue::from_config(config, sheets.clone())?;
        let recorder = MediaRecorder::new(
            sheets,
            config.source.media_tab.clone(),
            config.storage.media_csv_path(),
        );

        let service = Self::new(
            queue,
            Dispatcher::new(channel),
            recorder,
            config.channel.admin_ids.clone(),
        );
        service.queue.reload().await;
        Ok(service)
    }

    pub fn queue(&self) -> &PostQueue {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Whether `user_id` may run operator commands; an empty list admits everyone
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.is_empty() || self.admin_ids.contains(&user_id)
    }

    /// Select and deliver the next post
    pub async fn post_next(&self, now: DateTime<Utc>) -> Result<PostOutcome> {
        match self.queue.next_post(now).await? {
            Some(post) => Ok(PostOutcome::Sent(self.dispatcher.deliver(&post).await?)),
            None => Ok(PostOutcome::Empty),
        }
    }

    /// Unattended daily run: like [`DripcastService::post_next`], but an empty
    /// queue is reported to the destination
    pub async fn scheduled_run(&self, now: DateTime<Utc>) -> Result<PostOutcome> {
        let outcome = self.post_next(now).await?;
        if outcome == PostOutcome::Empty {
            self.dispatcher.notice_empty().await?;
        }
        Ok(outcome)
    }

    /// Reply to the `/next` command
    pub async fn command_next(&self, now: DateTime<Utc>) -> String {
        match self.post_next(now).await {
            Ok(PostOutcome::Sent(DeliveryReport::Delivered { .. })) => POSTED_REPLY.to_string(),
            Ok(PostOutcome::Sent(DeliveryReport::Skipped { reason })) => {
                format!("Skipped: {}.", reason)
            }
            Ok(PostOutcome::Sent(DeliveryReport::Rejected { kind })) => {
                format!("Not posted: invalid {} post.", kind)
            }
            Ok(PostOutcome::Empty) => EMPTY_REPLY.to_string(),
            Err(e) => {
                error!(error = %e, "Manual post failed");
                e.to_string()
            }
        }
    }

    /// Reply to the `/status` command
    pub async fn status(&self) -> String {
        let count = self.queue.len().await;
        let mode = if self.queue.options().random_order {
            "random".to_string()
        } else if count > 0 {
            format!("sequential, next #{}", self.queue.cursor() % count as u64 + 1)
        } else {
            "sequential".to_string()
        };
        format!("Bot is running. Posts in queue: {}\nMode: {}", count, mode)
    }

    /// Reply to the `/reload` command
    pub async fn reload(&self) -> String {
        format!("Reloaded: {} posts.", self.queue.reload().await)
    }

    /// Handle a carousel navigation callback
    pub async fn navigate(&self, target: &MessageRef, payload: &str) -> Result<bool> {
        self.dispatcher.navigate(target, payload).await
    }

    /// Record an uploaded attachment and produce the reply for the uploader
    pub async fn capture(&self, message: &Message, now: DateTime<Utc>) -> String {
        match extract_attachment(message) {
            Some(media) => {
                let outcome = self.recorder.record(&media, now).await;
                info!(kind = %media.kind, ?outcome, "Attachment captured");
                media.reply()
            }
            None => NO_ATTACHMENT_REPLY.to_string(),
        }
    }
}
