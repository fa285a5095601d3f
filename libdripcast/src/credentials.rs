//! Google Sheets credentials
//!
//! Sheets requests carry a bearer token taken either from configuration as a
//! pre-issued access token, or minted from a service-account key. A key signs
//! a short-lived RS256 assertion that is exchanged at the key's `token_uri`
//! for an access token. The token is cached and refreshed one minute before
//! it expires.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{Result, SourceError};

/// OAuth scope requested for the Sheets API
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a service-account JSON key that token minting needs
#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    private_key: SecretString,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SourceError::Auth(format!("invalid service account key: {}", e)).into())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SourceError::Auth(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Sign the assertion presented to the token endpoint
    pub(crate) fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: SHEETS_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())
            .map_err(|e| SourceError::Auth(format!("invalid private key: {}", e)))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| SourceError::Auth(format!("cannot sign assertion: {}", e)).into())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Access tokens minted from a service-account key
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::Http)?;

        Ok(Self {
            key,
            client,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    pub async fn access_token(&self) -> Result<SecretString> {
        self.access_token_at(Utc::now()).await
    }

    /// Cached token, exchanged anew when missing or about to expire
    ///
    /// The lock is held across the exchange so concurrent callers share one
    /// request.
    pub async fn access_token_at(&self, now: DateTime<Utc>) -> Result<SecretString> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.fresh_at(now)) {
            return Ok(SecretString::from(token.token.expose_secret().to_string()));
        }

        let fresh = self.exchange(now).await?;
        let token = SecretString::from(fresh.token.expose_secret().to_string());
        *cached = Some(fresh);
        Ok(token)
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let assertion = self.key.assertion(now)?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            ))
            .into());
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.without_url().to_string()))?;
        debug!(
            client_email = %self.key.client_email,
            expires_in = body.expires_in,
            "Obtained Sheets access token"
        );

        Ok(CachedToken {
            token: SecretString::from(body.access_token),
            expires_at: now + ChronoDuration::seconds(body.expires_in),
        })
    }
}

/// How Sheets requests authenticate
pub enum SheetsAuth {
    /// Pre-issued OAuth access token, used as is
    Token(SecretString),
    ServiceAccount(ServiceAccountAuth),
}

impl SheetsAuth {
    /// Pick credentials from configuration
    ///
    /// Order: inline service-account JSON, then a key file, then a plain
    /// access token. A key that cannot be read or parsed is logged and the
    /// next option is tried.
    pub fn from_config(config: &SourceConfig) -> Option<Self> {
        if let Some(json) = config.credentials_json.as_ref() {
            match ServiceAccountKey::from_json(json.expose_secret()) {
                Ok(key) => return Self::service_account(key, config.timeout()),
                Err(e) => warn!(error = %e, "Ignoring inline service account credentials"),
            }
        }

        if let Some(path) = config.credentials_path() {
            if path.exists() {
                match ServiceAccountKey::from_file(&path) {
                    Ok(key) => return Self::service_account(key, config.timeout()),
                    Err(e) => warn!(error = %e, "Ignoring service account key file"),
                }
            } else {
                info!(path = %path.display(), "Service account key file not found");
            }
        }

        config
            .access_token
            .as_ref()
            .map(|token| SheetsAuth::Token(SecretString::from(token.expose_secret().to_string())))
    }

    fn service_account(key: ServiceAccountKey, timeout: Duration) -> Option<Self> {
        match ServiceAccountAuth::new(key, timeout) {
            Ok(auth) => {
                info!(client_email = %auth.client_email(), "Using service account for Google Sheets");
                Some(SheetsAuth::ServiceAccount(auth))
            }
            Err(e) => {
                warn!(error = %e, "Service account client unavailable");
                None
            }
        }
    }

    /// Bearer token for the next request
    pub async fn bearer(&self) -> Result<SecretString> {
        match self {
            SheetsAuth::Token(token) => Ok(SecretString::from(token.expose_secret().to_string())),
            SheetsAuth::ServiceAccount(auth) => auth.access_token().await,
        }
    }
}
