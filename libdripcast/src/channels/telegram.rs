//! Telegram Bot API client and channel
//!
//! [`TelegramClient`] wraps the JSON Bot API over `reqwest`: outbound sends,
//! message edits, long polling for updates and callback acknowledgements.
//! [`TelegramChannel`] binds a client to the configured destination chat and
//! implements [`Channel`] for the dispatcher.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::channels::{
    Channel, Keyboard, MessageRef, OutgoingAlbum, OutgoingMedia, OutgoingPoll, OutgoingText,
};
use crate::config::Config;
use crate::error::{ChannelError, ConfigError, Result};
use crate::types::MediaKind;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects `callback_data` longer than this
pub const MAX_CALLBACK_BYTES: usize = 64;

// ============================================================================
// Inbound update types (only the fields Dripcast reads)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<FileRef>>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub audio: Option<FileRef>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub document: Option<FileRef>,
}

impl Message {
    pub fn location(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Any uploaded file: a photo size, video, audio, voice note or document
#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

// ============================================================================
// Client
// ============================================================================

/// Thin JSON client for the Bot API
pub struct TelegramClient {
    token: SecretString,
    api_base: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl TelegramClient {
    /// Create a client against the public Bot API endpoint
    pub fn new(token: SecretString, timeout: Duration) -> Result<Self> {
        Self::with_api_base(token, DEFAULT_API_BASE, timeout)
    }

    /// Create a client against a custom endpoint (local Bot API server, tests)
    pub fn with_api_base(token: SecretString, api_base: &str, timeout: Duration) -> Result<Self> {
        if token.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingField("channel.bot_token".to_string()).into());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base,
            self.token.expose_secret(),
            method
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke a Bot API method and decode its `result`
    pub async fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<T> {
        self.call_with_timeout(method, payload, self.timeout).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<T> {
        debug!(method, "calling Telegram Bot API");

        let response = self
            .client
            .post(self.api_url(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChannelError::Network(format!("{} failed: {}", method, e.without_url())))?;

        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            ChannelError::Sending(format!(
                "{} returned an unreadable response: {}",
                method,
                e.without_url()
            ))
        })?;

        if body.ok {
            return body
                .result
                .ok_or_else(|| ChannelError::Sending(format!("{} returned no result", method)).into());
        }

        let description = body
            .description
            .unwrap_or_else(|| "unknown error".to_string());
        let error = match body.error_code {
            Some(401) => ChannelError::Authentication(description),
            Some(429) => {
                let retry = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(|s| format!(" (retry after {}s)", s))
                    .unwrap_or_default();
                ChannelError::RateLimit(format!("{}{}", description, retry))
            }
            _ => ChannelError::Sending(format!("{}: {}", method, description)),
        };
        Err(error.into())
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, poll_timeout: Duration) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call_with_timeout("getUpdates", &payload, self.timeout + poll_timeout)
            .await
    }

    /// Reply to a user in the chat they wrote from
    pub async fn send_reply(&self, chat_id: i64, reply_to: Option<i64>, text: &str) -> Result<()> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(message_id) = reply_to {
            payload["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        self.call::<Value>("sendMessage", &payload).await.map(|_| ())
    }

    pub async fn answer_callback(&self, callback_query_id: &str) -> Result<()> {
        self.call::<Value>(
            "answerCallbackQuery",
            &json!({ "callback_query_id": callback_query_id }),
        )
        .await
        .map(|_| ())
    }
}

// ============================================================================
// Channel
// ============================================================================

/// The configured destination chat, reached through a [`TelegramClient`]
pub struct TelegramChannel {
    client: Arc<TelegramClient>,
    target: Value,
}

impl TelegramChannel {
    /// Bind a client to a destination given as numeric id or `@username`
    pub fn new(client: Arc<TelegramClient>, target: &str) -> Result<Self> {
        Ok(Self {
            client,
            target: parse_target(target)?,
        })
    }

    /// Client and destination from configuration
    ///
    /// Fails when the bot token or the destination is missing or invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (token, chat) = config.require_channel()?;
        let api_base = config
            .channel
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE);
        let client = TelegramClient::with_api_base(
            SecretString::from(token.expose_secret().to_string()),
            api_base,
            config.channel.timeout(),
        )?;
        Self::new(Arc::new(client), chat)
    }

    pub fn client(&self) -> &Arc<TelegramClient> {
        &self.client
    }

    async fn send_one(&self, method: &str, payload: Value) -> Result<MessageRef> {
        let message: Message = self.client.call(method, &payload).await?;
        Ok(message.location())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn max_callback_bytes(&self) -> Option<usize> {
        Some(MAX_CALLBACK_BYTES)
    }

    async fn send_text(&self, message: &OutgoingText) -> Result<MessageRef> {
        self.send_one("sendMessage", text_payload(&self.target, message))
            .await
    }

    async fn send_media(&self, media: &OutgoingMedia) -> Result<MessageRef> {
        self.send_one(media_method(media.kind), media_payload(&self.target, media))
            .await
    }

    async fn send_album(&self, album: &OutgoingAlbum) -> Result<Vec<MessageRef>> {
        let messages: Vec<Message> = self
            .client
            .call("sendMediaGroup", &album_payload(&self.target, album))
            .await?;
        Ok(messages.iter().map(Message::location).collect())
    }

    async fn send_poll(&self, poll: &OutgoingPoll) -> Result<MessageRef> {
        self.send_one("sendPoll", poll_payload(&self.target, poll))
            .await
    }

    async fn edit_media(&self, target: &MessageRef, media: &OutgoingMedia) -> Result<()> {
        let mut payload = json!({
            "chat_id": target.chat_id,
            "message_id": target.message_id,
            "media": input_media(media.kind, &media.file, &media.caption),
        });
        if let Some(keyboard) = &media.keyboard {
            payload["reply_markup"] = keyboard.to_json();
        }

        // Returns the edited Message, or `true` for inline messages
        self.client
            .call::<Value>("editMessageMedia", &payload)
            .await
            .map(|_| ())
    }
}

fn parse_target(target: &str) -> Result<Value> {
    let target = target.trim();
    if let Ok(id) = target.parse::<i64>() {
        return Ok(json!(id));
    }
    if target.starts_with('@') && target.len() > 1 {
        return Ok(json!(target));
    }
    Err(ConfigError::InvalidValue {
        field: "channel.target_chat_id".to_string(),
        reason: format!("expected a numeric chat id or @username, got '{}'", target),
    }
    .into())
}

fn media_method(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "sendPhoto",
        MediaKind::Video => "sendVideo",
        MediaKind::Audio => "sendAudio",
        MediaKind::Voice => "sendVoice",
        MediaKind::Document => "sendDocument",
    }
}

fn text_payload(chat: &Value, message: &OutgoingText) -> Value {
    let mut payload = json!({
        "chat_id": chat,
        "text": message.text,
        "disable_notification": message.silent,
    });
    if let Some(keyboard) = &message.keyboard {
        payload["reply_markup"] = keyboard.to_json();
    }
    payload
}

fn media_payload(chat: &Value, media: &OutgoingMedia) -> Value {
    let mut payload = json!({
        "chat_id": chat,
        "disable_notification": media.silent,
    });
    payload[media.kind.as_str()] = json!(media.file);
    if !media.caption.is_empty() {
        payload["caption"] = json!(media.caption);
    }
    if let Some(keyboard) = &media.keyboard {
        payload["reply_markup"] = keyboard.to_json();
    }
    payload
}

fn input_media(kind: MediaKind, file: &str, caption: &str) -> Value {
    let mut item = json!({ "type": kind.as_str(), "media": file });
    if !caption.is_empty() {
        item["caption"] = json!(caption);
    }
    item
}

fn album_payload(chat: &Value, album: &OutgoingAlbum) -> Value {
    let media: Vec<Value> = album
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let caption = if i == 0 { album.caption.as_str() } else { "" };
            input_media(item.kind, &item.file, caption)
        })
        .collect();

    json!({
        "chat_id": chat,
        "media": media,
        "disable_notification": album.silent,
    })
}

fn poll_payload(chat: &Value, poll: &OutgoingPoll) -> Value {
    let options: Vec<Value> = poll.options.iter().map(|o| json!({ "text": o })).collect();
    json!({
        "chat_id": chat,
        "question": poll.question,
        "options": options,
        "is_anonymous": poll.anonymous,
        "allows_multiple_answers": poll.allows_multiple_answers,
        "disable_notification": poll.silent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Button;
    use crate::error::DripcastError;
    use crate::types::AlbumItem;

    fn token() -> SecretString {
        SecretString::from("123:ABC".to_string())
    }

    #[test]
    fn test_api_url() {
        let client =
            TelegramClient::with_api_base(token(), "http://localhost:8081/", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            client.api_url("getMe"),
            "http://localhost:8081/bot123:ABC/getMe"
        );
    }

    #[test]
    fn test_from_config_uses_channel_timeout() {
        let mut config = Config::default();
        config.channel.bot_token = Some(token());
        config.channel.target_chat_id = Some("-100500".to_string());
        config.channel.timeout = "45s".to_string();
        config.source.timeout = "2s".to_string();

        let channel = TelegramChannel::from_config(&config).unwrap();
        assert_eq!(channel.client().timeout(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_api_errors_map_to_channel_errors() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:ABC/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: message text is empty"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:ABC/getMe"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let client =
            TelegramClient::with_api_base(token(), &server.uri(), Duration::from_secs(5)).unwrap();

        let err = client
            .call::<Value>("sendMessage", &json!({"chat_id": 1, "text": ""}))
            .await
            .unwrap_err();
        match err {
            DripcastError::Channel(ChannelError::Sending(message)) => {
                assert_eq!(message, "sendMessage: Bad Request: message text is empty")
            }
            other => panic!("Expected a sending error, got {:?}", other),
        }

        let err = client.call::<Value>("getMe", &json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            DripcastError::Channel(ChannelError::Authentication(_))
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_client_rejects_empty_token() {
        let result = TelegramClient::new(SecretString::from(" ".to_string()), Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("-1001234").unwrap(), json!(-1001234));
        assert_eq!(parse_target(" @my_channel ").unwrap(), json!("@my_channel"));
        assert!(parse_target("my_channel").is_err());
        assert!(parse_target("@").is_err());
    }

    #[test]
    fn test_media_payload_uses_kind_field() {
        let media = OutgoingMedia {
            kind: MediaKind::Voice,
            file: "AwAD".into(),
            caption: String::new(),
            keyboard: None,
            silent: true,
        };
        let payload = media_payload(&json!(-1), &media);
        assert_eq!(payload["voice"], "AwAD");
        assert_eq!(payload["disable_notification"], true);
        assert!(payload.get("caption").is_none());
        assert!(payload.get("reply_markup").is_none());
        assert_eq!(media_method(MediaKind::Voice), "sendVoice");
    }

    #[test]
    fn test_album_payload_captions_first_item_only() {
        let album = OutgoingAlbum {
            items: vec![
                AlbumItem {
                    kind: MediaKind::Photo,
                    file: "p".into(),
                },
                AlbumItem {
                    kind: MediaKind::Video,
                    file: "v".into(),
                },
            ],
            caption: "Gallery".into(),
            silent: false,
        };
        let payload = album_payload(&json!("@chan"), &album);
        let media = payload["media"].as_array().unwrap();
        assert_eq!(media[0], json!({"type": "photo", "media": "p", "caption": "Gallery"}));
        assert_eq!(media[1], json!({"type": "video", "media": "v"}));
    }

    #[test]
    fn test_poll_payload() {
        let poll = OutgoingPoll {
            question: "Tea or coffee?".into(),
            options: vec!["Tea".into(), "Coffee".into()],
            anonymous: true,
            allows_multiple_answers: false,
            silent: false,
        };
        let payload = poll_payload(&json!(1), &poll);
        assert_eq!(payload["options"], json!([{"text": "Tea"}, {"text": "Coffee"}]));
        assert_eq!(payload["is_anonymous"], true);
    }

    #[test]
    fn test_text_payload_with_keyboard() {
        let message = OutgoingText {
            text: "hi".into(),
            keyboard: Some(Keyboard::row(vec![Button::Url {
                text: "Go".into(),
                url: "https://example.com".into(),
            }])),
            silent: false,
        };
        let payload = text_payload(&json!(1), &message);
        assert_eq!(
            payload["reply_markup"]["inline_keyboard"][0][0]["url"],
            "https://example.com"
        );
    }

    #[test]
    fn test_update_deserialization() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "chat": {"id": 42, "type": "private"},
                "from": {"id": 7, "is_bot": false, "first_name": "A"},
                "date": 0,
                "photo": [
                    {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90},
                    {"file_id": "large", "file_unique_id": "l", "width": 800, "height": 800}
                ]
            }
        }))
        .unwrap();

        let message = update.message.unwrap();
        assert_eq!(message.location(), MessageRef { chat_id: 42, message_id: 5 });
        assert_eq!(message.photo.unwrap().last().unwrap().file_id, "large");
    }
}
