//! Post dispatcher
//!
//! Turns a [`Post`] into the channel calls for its content kind. Authoring
//! mistakes (an unknown kind, a poll with an unusable option count) are not
//! silently dropped: a visible notice goes to the destination and the report
//! says the post was rejected. Transport failures are returned as errors.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::carousel::{self, NavPayload};
use crate::channels::{
    Button, Channel, Keyboard, MessageRef, OutgoingAlbum, OutgoingMedia, OutgoingPoll,
    OutgoingText,
};
use crate::error::Result;
use crate::types::{AlbumItem, MediaKind, Post, PostContent, Slide};

pub const EMPTY_QUEUE_NOTICE: &str = "⚠️ No posts in the queue.";

const BACK_LABEL: &str = "◀";
const FORWARD_LABEL: &str = "▶";

/// Outcome of a delivery attempt that reached the channel without a transport error
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryReport {
    /// Content sent; one reference per message created
    Delivered { messages: Vec<MessageRef> },
    /// Nothing to send (empty album or carousel)
    Skipped { reason: String },
    /// Authoring error surfaced to the channel as a notice
    Rejected { kind: String },
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryReport::Delivered { .. })
    }
}

pub struct Dispatcher {
    channel: Arc<dyn Channel>,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Deliver one post to the destination
    pub async fn deliver(&self, post: &Post) -> Result<DeliveryReport> {
        let silent = post.disable_notification;
        let report = match &post.content {
            PostContent::Text => {
                let sent = self
                    .channel
                    .send_text(&OutgoingText {
                        text: post.text.clone(),
                        keyboard: Keyboard::links(&post.buttons),
                        silent,
                    })
                    .await?;
                delivered(vec![sent])
            }

            PostContent::Media { kind, file } => {
                let sent = self
                    .channel
                    .send_media(&OutgoingMedia {
                        kind: *kind,
                        file: file.clone(),
                        caption: post.text.clone(),
                        keyboard: Keyboard::links(&post.buttons),
                        silent,
                    })
                    .await?;
                delivered(vec![sent])
            }

            PostContent::Album(items) => self.deliver_album(post, items).await?,

            PostContent::Poll { options } => {
                if let Some(report) = self.check_poll_options("poll", options).await? {
                    return Ok(report);
                }
                let sent = self.channel.send_poll(&poll(post, options)).await?;
                delivered(vec![sent])
            }

            PostContent::ImagePoll { media, options } => {
                if let Some(report) = self.check_poll_options("image_poll", options).await? {
                    return Ok(report);
                }
                let photo = self
                    .channel
                    .send_media(&OutgoingMedia {
                        kind: MediaKind::Photo,
                        file: media.clone(),
                        caption: post.text.clone(),
                        keyboard: Keyboard::links(&post.buttons),
                        silent,
                    })
                    .await?;
                // The photo stays if the poll fails
                let question = self.channel.send_poll(&poll(post, options)).await?;
                delivered(vec![photo, question])
            }

            PostContent::Carousel { slides } => self.deliver_carousel(post, slides).await?,

            PostContent::Unrecognized { kind } => {
                warn!(kind = %kind, "Post has an unknown type");
                self.channel
                    .send_text(&OutgoingText::plain(format!("⚠️ Unknown post type: {}", kind)))
                    .await?;
                DeliveryReport::Rejected { kind: kind.clone() }
            }
        };

        match &report {
            DeliveryReport::Delivered { messages } => info!(
                channel = self.channel.name(),
                kind = post.kind(),
                messages = messages.len(),
                "Post delivered"
            ),
            DeliveryReport::Skipped { reason } => {
                warn!(kind = post.kind(), reason = %reason, "Post skipped")
            }
            DeliveryReport::Rejected { .. } => {}
        }
        Ok(report)
    }

    async fn deliver_album(&self, post: &Post, items: &[AlbumItem]) -> Result<DeliveryReport> {
        if items.is_empty() {
            return Ok(DeliveryReport::Skipped {
                reason: "album has no photo or video items".to_string(),
            });
        }
        if !post.buttons.is_empty() {
            debug!("Albums cannot carry buttons, ignoring them");
        }

        let messages = self
            .channel
            .send_album(&OutgoingAlbum {
                items: items.to_vec(),
                caption: post.text.clone(),
                silent: post.disable_notification,
            })
            .await?;
        Ok(delivered(messages))
    }

    async fn deliver_carousel(&self, post: &Post, slides: &[Slide]) -> Result<DeliveryReport> {
        let Some(frame) = carousel::render(slides, 0) else {
            return Ok(DeliveryReport::Skipped {
                reason: "carousel has no slides".to_string(),
            });
        };

        let forward = NavPayload::new(slides.to_vec(), frame.forward as i64).encode();
        let keyboard = self.nav_keyboard(vec![(FORWARD_LABEL, forward)]);

        let sent = self
            .channel
            .send_media(&OutgoingMedia {
                kind: MediaKind::Photo,
                file: frame.slide.media.clone(),
                caption: carousel::caption(&post.text, &frame.slide.text),
                keyboard,
                silent: post.disable_notification,
            })
            .await?;
        Ok(delivered(vec![sent]))
    }

    /// Show another slide of a previously sent carousel
    ///
    /// Returns `false` when `payload` is not a valid carousel payload; the
    /// message is left untouched in that case.
    pub async fn navigate(&self, target: &MessageRef, payload: &str) -> Result<bool> {
        let Some(nav) = carousel::parse_payload(payload) else {
            warn!(payload_len = payload.len(), "Ignoring invalid carousel payload");
            return Ok(false);
        };
        let Some(frame) = carousel::render(&nav.slides, nav.index) else {
            return Ok(false);
        };

        let back = NavPayload::new(nav.slides.clone(), frame.back as i64).encode();
        let forward = NavPayload::new(nav.slides.clone(), frame.forward as i64).encode();
        let keyboard = self.nav_keyboard(vec![(BACK_LABEL, back), (FORWARD_LABEL, forward)]);

        self.channel
            .edit_media(
                target,
                &OutgoingMedia {
                    kind: MediaKind::Photo,
                    file: frame.slide.media,
                    caption: frame.slide.text,
                    keyboard,
                    silent: false,
                },
            )
            .await?;

        debug!(message_id = target.message_id, index = frame.index, "Carousel navigated");
        Ok(true)
    }

    /// Tell the destination there is nothing to post
    pub async fn notice_empty(&self) -> Result<MessageRef> {
        warn!("No posts in the queue");
        self.channel
            .send_text(&OutgoingText::plain(EMPTY_QUEUE_NOTICE))
            .await
    }

    /// Navigation row, or `None` when a payload exceeds the channel's callback limit
    fn nav_keyboard(&self, controls: Vec<(&str, String)>) -> Option<Keyboard> {
        if let Some(limit) = self.channel.max_callback_bytes() {
            if let Some(size) = controls.iter().map(|(_, data)| data.len()).find(|len| *len > limit) {
                warn!(
                    size,
                    limit,
                    "Carousel payload too large for navigation controls, sending without them"
                );
                return None;
            }
        }

        Some(Keyboard::row(
            controls
                .into_iter()
                .map(|(label, data)| Button::Callback {
                    text: label.to_string(),
                    data,
                })
                .collect(),
        ))
    }

    /// `Some(Rejected)` after notifying the channel when the option count is unusable
    async fn check_poll_options(
        &self,
        kind: &str,
        options: &[String],
    ) -> Result<Option<DeliveryReport>> {
        let limits = self.channel.poll_option_limits();
        if limits.contains(&options.len()) {
            return Ok(None);
        }

        warn!(kind, options = options.len(), "Poll has an unusable number of options");
        self.channel
            .send_text(&OutgoingText::plain(format!(
                "⚠️ Poll needs {} to {} options, got {}",
                limits.start(),
                limits.end(),
                options.len()
            )))
            .await?;
        Ok(Some(DeliveryReport::Rejected {
            kind: kind.to_string(),
        }))
    }
}

fn delivered(messages: Vec<MessageRef>) -> DeliveryReport {
    DeliveryReport::Delivered { messages }
}

fn poll(post: &Post, options: &[String]) -> OutgoingPoll {
    OutgoingPoll {
        question: post.text.clone(),
        options: options.to_vec(),
        anonymous: true,
        allows_multiple_answers: post.allow_multiple_answers,
        silent: post.disable_notification,
    }
}
