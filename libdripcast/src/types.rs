//! Core types for Dripcast
//!
//! A [`Post`] is built from a loosely typed [`RawPost`] (a spreadsheet row or
//! an entry of the local JSON list) and carries its kind-specific payload as a
//! closed [`PostContent`] union, so every consumer matches on it exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Kinds of a single media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    Document,
}

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::Photo,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::Voice,
        MediaKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "voice" => Some(Self::Voice),
            "document" => Some(Self::Document),
            _ => None,
        }
    }

    /// Whether the kind may appear inside an album
    pub fn is_album_member(&self) -> bool {
        matches!(self, Self::Photo | Self::Video)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A URL button rendered under a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

/// One page of a carousel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    #[serde(default)]
    pub media: String,
    #[serde(default)]
    pub text: String,
}

/// One entry of an album
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumItem {
    pub kind: MediaKind,
    pub file: String,
}

/// Kind-specific payload of a post
#[derive(Debug, Clone, PartialEq)]
pub enum PostContent {
    Text,
    Media { kind: MediaKind, file: String },
    Album(Vec<AlbumItem>),
    Poll { options: Vec<String> },
    ImagePoll { media: String, options: Vec<String> },
    Carousel { slides: Vec<Slide> },
    /// Authoring mistake; surfaced to the channel instead of dropped
    Unrecognized { kind: String },
}

/// One deliverable unit of content
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawPost")]
pub struct Post {
    pub text: String,
    pub content: PostContent,
    pub buttons: Vec<LinkButton>,
    /// Raw `datetime` cell; parsed against the configured timezone at selection time
    pub scheduled_at: Option<String>,
    pub allow_multiple_answers: bool,
    pub disable_notification: bool,
}

impl Post {
    /// Create a plain text post
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_content(text, PostContent::Text)
    }

    pub fn with_content(text: impl Into<String>, content: PostContent) -> Self {
        Self {
            text: text.into(),
            content,
            buttons: Vec::new(),
            scheduled_at: None,
            allow_multiple_answers: false,
            disable_notification: false,
        }
    }

    /// The kind tag as written by authors
    pub fn kind(&self) -> &str {
        match &self.content {
            PostContent::Text => "text",
            PostContent::Media { kind, .. } => kind.as_str(),
            PostContent::Album(_) => "album",
            PostContent::Poll { .. } => "poll",
            PostContent::ImagePoll { .. } => "image_poll",
            PostContent::Carousel { .. } => "carousel",
            PostContent::Unrecognized { kind } => kind.as_str(),
        }
    }

    /// Stable identity of a post, used to remember consumed scheduled posts
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.scheduled_at.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Flat, loosely typed post record as authored
///
/// Structured fields accept either their JSON form or, as spreadsheet cells
/// deliver them, a string: `options` as `a;b;c`, `media`/`slides`/`buttons`
/// as embedded JSON text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPost {
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<Value>,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub buttons: Option<Value>,
    #[serde(default, rename = "datetime", alias = "scheduled_at")]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub slides: Option<Value>,
    #[serde(default)]
    pub allow_multiple_answers: Option<bool>,
    #[serde(default)]
    pub disable_notification: Option<bool>,
}

impl RawPost {
    /// Whether the record carries the required non-empty text
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

impl From<RawPost> for Post {
    fn from(raw: RawPost) -> Self {
        let kind = raw
            .kind
            .as_deref()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "text".to_string());

        let media_ref = || raw.media.as_ref().and_then(single_media).unwrap_or_default();
        let options = || raw.options.as_ref().map(parse_options).unwrap_or_default();

        let content = match kind.as_str() {
            "text" => PostContent::Text,
            "album" => PostContent::Album(
                raw.media.as_ref().map(parse_album).unwrap_or_default(),
            ),
            "poll" => PostContent::Poll { options: options() },
            "image_poll" => PostContent::ImagePoll {
                media: media_ref(),
                options: options(),
            },
            "carousel" => PostContent::Carousel {
                slides: raw
                    .slides
                    .as_ref()
                    .map(|v| parse_json_list(v, "slides"))
                    .unwrap_or_default(),
            },
            other => match MediaKind::parse(other) {
                Some(media_kind) => PostContent::Media {
                    kind: media_kind,
                    file: media_ref(),
                },
                None => PostContent::Unrecognized {
                    kind: other.to_string(),
                },
            },
        };

        Post {
            text: raw.text.unwrap_or_default(),
            content,
            buttons: raw
                .buttons
                .as_ref()
                .map(|v| parse_json_list(v, "buttons"))
                .unwrap_or_default(),
            scheduled_at: raw.scheduled_at.filter(|s| !s.trim().is_empty()),
            allow_multiple_answers: raw.allow_multiple_answers.unwrap_or(false),
            disable_notification: raw.disable_notification.unwrap_or(false),
        }
    }
}

fn single_media(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn parse_options(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(';')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode a list that may arrive either as JSON or as JSON embedded in a string
fn parse_json_list<T: serde::de::DeserializeOwned>(value: &Value, field: &str) -> Vec<T> {
    let parsed = match value {
        Value::String(s) if s.trim().is_empty() => return Vec::new(),
        Value::String(s) => serde_json::from_str(s),
        Value::Null => return Vec::new(),
        other => serde_json::from_value(other.clone()),
    };

    parsed.unwrap_or_else(|e| {
        warn!(field, error = %e, "ignoring malformed list in post record");
        Vec::new()
    })
}

/// Album entries without a recognized photo/video sub-kind are dropped
fn parse_album(value: &Value) -> Vec<AlbumItem> {
    let entries: Vec<Value> = parse_json_list(value, "media");

    entries
        .iter()
        .filter_map(|entry| {
            let kind = entry
                .get("type")
                .or_else(|| entry.get("kind"))
                .and_then(Value::as_str)
                .and_then(MediaKind::parse)
                .filter(MediaKind::is_album_member)?;
            let file = entry.get("file").and_then(Value::as_str)?;
            Some(AlbumItem {
                kind,
                file: file.to_string(),
            })
        })
        .collect()
}
