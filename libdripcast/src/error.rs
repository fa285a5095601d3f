//! Error types for Dripcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DripcastError>;

#[derive(Error, Debug)]
pub enum DripcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DripcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DripcastError::InvalidInput(_) => 3,
            DripcastError::Config(_) => 2,
            DripcastError::Channel(ChannelError::Authentication(_)) => 2,
            DripcastError::Channel(_) => 1,
            DripcastError::Source(_) => 1,
            DripcastError::Store(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Failures of the remote tabular source.
///
/// These never reach the destination channel; callers degrade to the local
/// fallback instead.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Sheets authentication failed: {0}")]
    Auth(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Sending failed: {0}")]
    Sending(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = DripcastError::InvalidInput("Bad cursor".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = DripcastError::Config(ConfigError::MissingField(
            "channel.target_chat_id".to_string(),
        ));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = DripcastError::Channel(ChannelError::Authentication(
            "Unauthorized".to_string(),
        ));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let sending = DripcastError::Channel(ChannelError::Sending("boom".to_string()));
        assert_eq!(sending.exit_code(), 1);

        let source = DripcastError::Source(SourceError::Unavailable("no sheet".to_string()));
        assert_eq!(source.exit_code(), 1);

        let auth = DripcastError::Source(SourceError::Auth("token endpoint returned 400".to_string()));
        assert_eq!(auth.exit_code(), 1);

        let store = DripcastError::Store(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )));
        assert_eq!(store.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = DripcastError::Channel(ChannelError::Sending(
            "chat not found".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Channel error: Sending failed: chat not found"
        );

        let error = DripcastError::Config(ConfigError::InvalidValue {
            field: "schedule.post_time".to_string(),
            reason: "expected HH:MM".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid value for schedule.post_time: expected HH:MM"
        );
    }

    #[test]
    fn test_error_conversion_from_store_error() {
        let store_error = StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "test",
        ));
        let error: DripcastError = store_error.into();

        match error {
            DripcastError::Store(_) => {}
            _ => panic!("Expected DripcastError::Store"),
        }
    }

    #[test]
    fn test_channel_error_clone() {
        let original = ChannelError::Network("Connection reset".to_string());
        let cloned = original.clone();
        assert_eq!(original.to_string(), cloned.to_string());
    }
}
