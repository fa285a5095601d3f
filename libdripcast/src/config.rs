//! Configuration management for Dripcast
//!
//! Configuration is read from a TOML file and then overlaid with the
//! environment variables a hosted deployment usually provides (`BOT_TOKEN`,
//! `TARGET_CHAT_ID`, `TZ`, ...). Every section has defaults, so an
//! environment-only deployment works without any file at all.

use chrono::NaiveTime;
use chrono_tz::Tz;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::schedule::parse_post_time;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Destination channel and operator access
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub bot_token: Option<SecretString>,
    /// Numeric chat id (`-100...`) or public `@channel` username
    pub target_chat_id: Option<String>,
    /// User ids allowed to run operator commands; empty allows everyone
    pub admin_ids: Vec<u64>,
    /// Bot API endpoint, for a self-hosted Bot API server
    pub api_base: Option<String>,
    /// Upper bound for one Bot API call, uploads included (humantime format)
    ///
    /// Long polls get the poll timeout on top of this.
    pub timeout: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            target_chat_id: None,
            admin_ids: Vec::new(),
            api_base: None,
            timeout: "30s".to_string(),
        }
    }
}

impl ChannelConfig {
    /// Parsed Bot API timeout, falling back to 30 seconds on a bad value
    pub fn timeout(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily posting time as `HH:MM`
    pub post_time: String,
    /// IANA timezone name used for the daily trigger and for `datetime` cells
    pub timezone: String,
    pub random_order: bool,
    /// Deliver due scheduled posts only once instead of on every trigger
    pub consume_due: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            post_time: "09:00".to_string(),
            timezone: "UTC".to_string(),
            random_order: false,
            consume_due: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub spreadsheet_id: Option<String>,
    pub posts_tab: String,
    pub media_tab: String,
    /// Service-account key as inline JSON
    pub credentials_json: Option<SecretString>,
    /// Path to a service-account JSON key file
    pub credentials_file: Option<String>,
    /// Pre-issued OAuth access token, used when no service account is set
    pub access_token: Option<SecretString>,
    pub api_base: String,
    /// Upper bound for every remote call (humantime format, e.g. "10s")
    pub timeout: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            posts_tab: "Posts".to_string(),
            media_tab: "Media".to_string(),
            credentials_json: None,
            credentials_file: None,
            access_token: None,
            api_base: "https://sheets.googleapis.com/v4".to_string(),
            timeout: "10s".to_string(),
        }
    }
}

impl SourceConfig {
    /// Parsed request timeout, falling back to 10 seconds on a bad value
    pub fn timeout(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials_file
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(expand_path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub posts_file: String,
    pub state_file: String,
    pub media_csv: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            posts_file: "posts.json".to_string(),
            state_file: "state.json".to_string(),
            media_csv: "media_store.csv".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn posts_path(&self) -> PathBuf {
        expand_path(&self.posts_file)
    }

    pub fn state_path(&self) -> PathBuf {
        expand_path(&self.state_file)
    }

    pub fn media_csv_path(&self) -> PathBuf {
        expand_path(&self.media_csv)
    }
}

impl Config {
    /// Load configuration from the default location, then apply environment overrides
    ///
    /// A missing file at the default location is not an error; a missing file
    /// named explicitly through `DRIPCAST_CONFIG` is.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("DRIPCAST_CONFIG").is_ok();
        let config_path = resolve_config_path()?;

        let mut config = if explicit || config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Overlay the conventional deployment environment variables
    ///
    /// Values are trimmed; empty values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = env_value("BOT_TOKEN") {
            self.channel.bot_token = Some(SecretString::from(token));
        }
        if let Some(chat) = env_value("TARGET_CHAT_ID") {
            self.channel.target_chat_id = Some(chat);
        }
        if let Some(admins) = env_value("ADMIN_IDS") {
            self.channel.admin_ids = parse_admin_ids(&admins);
        }
        if let Some(id) = env_value("SPREADSHEET_ID") {
            self.source.spreadsheet_id = Some(id);
        }
        if let Some(json) = env_value("GOOGLE_CREDENTIALS") {
            self.source.credentials_json = Some(SecretString::from(json));
        }
        if let Some(path) = env_value("CREDENTIALS_FILE") {
            self.source.credentials_file = Some(path);
        }
        if let Some(token) = env_value("GOOGLE_ACCESS_TOKEN") {
            self.source.access_token = Some(SecretString::from(token));
        }
        if let Some(time) = env_value("POST_TIME") {
            self.schedule.post_time = time;
        }
        if let Some(tz) = env_value("TZ") {
            self.schedule.timezone = tz;
        }
        if let Some(random) = env_value("RANDOM_ORDER") {
            self.schedule.random_order = random.eq_ignore_ascii_case("true");
        }
        if let Some(path) = env_value("POSTS_FILE") {
            self.storage.posts_file = path;
        }
        if let Some(path) = env_value("STATE_FILE") {
            self.storage.state_file = path;
        }
    }

    /// Check the values every binary depends on
    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        self.post_time()?;
        Ok(())
    }

    /// Bot token and destination, both required for anything that sends
    pub fn require_channel(&self) -> Result<(&SecretString, &str)> {
        let token = self
            .channel
            .bot_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("channel.bot_token".to_string()))?;
        let chat = self
            .channel
            .target_chat_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConfigError::MissingField("channel.target_chat_id".to_string()))?;
        Ok((token, chat))
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(|e| {
                ConfigError::InvalidValue {
                    field: "schedule.timezone".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    pub fn post_time(&self) -> Result<NaiveTime> {
        parse_post_time(&self.schedule.post_time)
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("DRIPCAST_CONFIG") {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("dripcast").join("config.toml"))
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a comma or whitespace separated list of numeric user ids
///
/// Entries that are not numbers are ignored.
pub fn parse_admin_ids(raw: &str) -> Vec<u64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
