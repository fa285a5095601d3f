//! Content source adapters
//!
//! Posts come from a spreadsheet tab when one is reachable and from a local
//! JSON file otherwise. Neither adapter returns an error to its caller: an
//! unavailable sheet, a missing file or a malformed row all degrade to fewer
//! (or zero) posts, and the reason is logged.

use async_trait::async_trait;
use reqwest::Url;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::credentials::SheetsAuth;
use crate::error::{Result, SourceError};
use crate::types::{Post, RawPost};

/// One data row keyed by the tab's header row
pub type Row = HashMap<String, String>;

/// A remote store of named tables with a header row
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Read every data row of `tab`; cells missing at the end of a row are empty
    async fn read_rows(&self, tab: &str) -> Result<Vec<Row>>;

    /// Create `tab` with `header` as its first row if it does not exist yet
    async fn ensure_tab(&self, tab: &str, header: &[&str]) -> Result<()>;

    /// Append one row of values to `tab`
    async fn append_row(&self, tab: &str, values: &[String]) -> Result<()>;
}

// ============================================================================
// Google Sheets
// ============================================================================

/// Google Sheets v4 REST client bound to one spreadsheet
pub struct GoogleSheets {
    api_base: Url,
    spreadsheet_id: String,
    auth: SheetsAuth,
    client: reqwest::Client,
}

impl GoogleSheets {
    /// Connect-or-none: returns `None` when the spreadsheet id or usable
    /// credentials are not configured, so callers fall back to local storage
    pub fn connect(config: &SourceConfig) -> Option<Self> {
        let Some(spreadsheet_id) = config.spreadsheet_id.as_deref().filter(|s| !s.is_empty())
        else {
            info!("No spreadsheet configured, using local files only");
            return None;
        };
        let Some(auth) = SheetsAuth::from_config(config) else {
            warn!("Spreadsheet configured but no credentials set, Google Sheets access disabled");
            return None;
        };

        match Self::new(&config.api_base, spreadsheet_id, auth, config.timeout()) {
            Ok(sheets) => Some(sheets),
            Err(e) => {
                warn!(error = %e, "Google Sheets client unavailable");
                None
            }
        }
    }

    pub fn new(
        api_base: &str,
        spreadsheet_id: &str,
        auth: SheetsAuth,
        timeout: Duration,
    ) -> Result<Self> {
        let api_base = Url::parse(api_base)
            .map_err(|e| SourceError::Unavailable(format!("invalid API base '{}': {}", api_base, e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::Http)?;

        Ok(Self {
            api_base,
            spreadsheet_id: spreadsheet_id.to_string(),
            auth,
            client,
        })
    }

    /// Build `<base>/spreadsheets/<id><suffix>/<segments...>`
    fn url(&self, id_suffix: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SourceError::Unavailable("API base cannot be a base URL".to_string()))?;
            path.pop_if_empty();
            path.push("spreadsheets");
            path.push(&format!("{}{}", self.spreadsheet_id, id_suffix));
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.auth.bearer().await?;
        let response = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| SourceError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!(
                "Sheets API returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            ))
            .into());
        }

        Ok(response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.without_url().to_string()))?)
    }

    async fn tab_titles(&self) -> Result<Vec<String>> {
        let mut url = self.url("", &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let body = self.send(self.client.get(url)).await?;

        Ok(body["sheets"]
            .as_array()
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| s["properties"]["title"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl TabularSource for GoogleSheets {
    async fn read_rows(&self, tab: &str) -> Result<Vec<Row>> {
        let url = self.url("", &["values", tab])?;
        let body = self.send(self.client.get(url)).await?;
        rows_from_values(&body)
    }

    async fn ensure_tab(&self, tab: &str, header: &[&str]) -> Result<()> {
        if self.tab_titles().await?.iter().any(|t| t == tab) {
            return Ok(());
        }

        info!(tab, "Creating missing sheet tab");
        let url = self.url(":batchUpdate", &[])?;
        let request = json!({
            "requests": [{ "addSheet": { "properties": { "title": tab } } }]
        });
        self.send(self.client.post(url).json(&request)).await?;

        let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
        self.append_row(tab, &header).await
    }

    async fn append_row(&self, tab: &str, values: &[String]) -> Result<()> {
        let mut url = self.url("", &["values", &format!("{}!A1:append", tab)])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        self.send(self.client.post(url).json(&json!({ "values": [values] })))
            .await?;
        Ok(())
    }
}

/// Convert a `values` response (header row first) into keyed rows
pub fn rows_from_values(body: &Value) -> Result<Vec<Row>> {
    let Some(values) = body.get("values") else {
        // An empty tab has no `values` key at all
        return Ok(Vec::new());
    };
    let rows = values
        .as_array()
        .ok_or_else(|| SourceError::Malformed("`values` is not an array".to_string()))?;

    let Some((header, data)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = header
        .as_array()
        .map(|cells| cells.iter().map(|c| cell_text(c).trim().to_string()).collect())
        .unwrap_or_default();

    Ok(data
        .iter()
        .map(|row| {
            let cells = row.as_array().map(Vec::as_slice).unwrap_or(&[]);
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(i, name)| {
                    let value = cells.get(i).map(cell_text).unwrap_or_default();
                    (name.clone(), value)
                })
                .collect()
        })
        .collect())
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Post sources
// ============================================================================

/// Map one spreadsheet row to a post; rows without text are skipped
pub fn row_to_post(row: &Row) -> Option<Post> {
    let cell = |name: &str| row.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
    let string_cell = |name: &str| cell(name).map(|v| Value::String(v.to_string()));

    let raw = RawPost {
        kind: cell("type").map(String::from),
        text: row.get("text").cloned(),
        media: string_cell("media"),
        options: string_cell("options"),
        buttons: string_cell("buttons"),
        scheduled_at: cell("datetime").map(String::from),
        slides: string_cell("slides"),
        allow_multiple_answers: cell("allow_multiple_answers").and_then(parse_bool_cell),
        disable_notification: cell("disable_notification").and_then(parse_bool_cell),
    };

    if !raw.has_text() {
        return None;
    }
    Some(raw.into())
}

fn parse_bool_cell(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Source of posts for a reload
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Fetch the ordered post list; never fails, an unavailable source yields nothing
    async fn fetch(&self) -> Vec<Post>;
}

/// Posts tab of a spreadsheet
pub struct SheetPostSource {
    sheets: Option<Arc<dyn TabularSource>>,
    tab: String,
}

impl SheetPostSource {
    pub fn new(sheets: Option<Arc<dyn TabularSource>>, tab: impl Into<String>) -> Self {
        Self {
            sheets,
            tab: tab.into(),
        }
    }
}

#[async_trait]
impl PostSource for SheetPostSource {
    async fn fetch(&self) -> Vec<Post> {
        let Some(sheets) = &self.sheets else {
            return Vec::new();
        };

        match sheets.read_rows(&self.tab).await {
            Ok(rows) => {
                let total = rows.len();
                let posts: Vec<Post> = rows.iter().filter_map(row_to_post).collect();
                debug!(
                    tab = %self.tab,
                    rows = total,
                    posts = posts.len(),
                    "Fetched posts from spreadsheet"
                );
                posts
            }
            Err(e) => {
                warn!(tab = %self.tab, error = %e, "Spreadsheet unavailable, falling back to local posts");
                Vec::new()
            }
        }
    }
}

/// Local JSON list of post records
pub struct LocalPostFile {
    path: PathBuf,
}

impl LocalPostFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the list; a missing or malformed file yields no posts
    pub fn load(&self) -> Vec<Post> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Local posts file not found");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read local posts file");
                return Vec::new();
            }
        };

        let records = match serde_json::from_str::<Vec<Value>>(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Local posts file is malformed");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .enumerate()
            .filter_map(|(position, record)| match serde_json::from_value::<RawPost>(record) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(position, error = %e, "Skipping malformed post record");
                    None
                }
            })
            .filter(RawPost::has_text)
            .map(Post::from)
            .collect()
    }
}

#[async_trait]
impl PostSource for LocalPostFile {
    async fn fetch(&self) -> Vec<Post> {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostContent;
    use secrecy::SecretString;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_row_to_post_defaults() {
        let post = row_to_post(&row(&[("type", ""), ("text", "Hello")])).unwrap();
        assert_eq!(post.content, PostContent::Text);
        assert!(post.buttons.is_empty());
        assert!(post.scheduled_at.is_none());
    }

    #[test]
    fn test_row_without_text_is_skipped() {
        assert!(row_to_post(&row(&[("type", "photo"), ("media", "x")])).is_none());
        assert!(row_to_post(&row(&[("text", "")])).is_none());
        assert!(row_to_post(&row(&[("text", "   ")])).is_none());
    }

    #[test]
    fn test_row_poll_options_split() {
        let post = row_to_post(&row(&[
            ("type", "poll"),
            ("text", "Pick"),
            ("options", "Red;Green;Blue"),
            ("allow_multiple_answers", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(
            post.content,
            PostContent::Poll {
                options: vec!["Red".into(), "Green".into(), "Blue".into()]
            }
        );
        assert!(post.allow_multiple_answers);
    }

    #[test]
    fn test_row_empty_options_discarded() {
        let post = row_to_post(&row(&[("type", "poll"), ("text", "Q"), ("options", "")])).unwrap();
        assert_eq!(post.content, PostContent::Poll { options: vec![] });
    }

    #[test]
    fn test_row_slides_and_datetime() {
        let post = row_to_post(&row(&[
            ("type", "carousel"),
            ("text", "Tour"),
            ("slides", r#"[{"media":"a","text":"one"}]"#),
            ("datetime", "2025-01-01 10:00"),
        ]))
        .unwrap();
        match &post.content {
            PostContent::Carousel { slides } => assert_eq!(slides[0].text, "one"),
            other => panic!("Expected carousel, got {:?}", other),
        }
        assert_eq!(post.scheduled_at.as_deref(), Some("2025-01-01 10:00"));
    }

    #[test]
    fn test_rows_from_values_pads_short_rows() {
        let body = json!({
            "range": "Posts!A1:C3",
            "values": [
                ["type", "text", "media"],
                ["photo", "Caption", "AgAD"],
                ["text", "Only text"]
            ]
        });
        let rows = rows_from_values(&body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["media"], "AgAD");
        assert_eq!(rows[1]["media"], "");
    }

    #[test]
    fn test_rows_from_values_empty_tab() {
        assert!(rows_from_values(&json!({"range": "Posts!A1:Z1000"}))
            .unwrap()
            .is_empty());
        assert!(rows_from_values(&json!({"values": []})).unwrap().is_empty());
        assert!(rows_from_values(&json!({"values": "nope"})).is_err());
    }

    #[test]
    fn test_rows_from_values_stringifies_numbers() {
        let body = json!({"values": [["text", "options"], ["Count", 3]]});
        let rows = rows_from_values(&body).unwrap();
        assert_eq!(rows[0]["options"], "3");
    }

    #[test]
    fn test_local_file_missing_and_malformed() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = LocalPostFile::new(dir.path().join("missing.json"));
        assert!(missing.load().is_empty());

        let malformed_path = dir.path().join("bad.json");
        std::fs::write(&malformed_path, "{ not a list").unwrap();
        assert!(LocalPostFile::new(&malformed_path).load().is_empty());
    }

    #[test]
    fn test_local_file_filters_textless_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("posts.json");
        std::fs::write(
            &path,
            r#"[{"type":"text","text":"x"},{"type":"text","text":""},{"type":"photo","media":"m"}]"#,
        )
        .unwrap();

        let posts = LocalPostFile::new(&path).load();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "x");
    }

    #[test]
    fn test_local_file_skips_only_the_bad_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("posts.json");
        std::fs::write(
            &path,
            r#"[{"text":"good one"},{"text":"good two"},{"text":"bad","disable_notification":"true"}]"#,
        )
        .unwrap();

        let posts = LocalPostFile::new(&path).load();
        let texts: Vec<&str> = posts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["good one", "good two"]);
    }

    #[tokio::test]
    async fn test_sheet_source_without_client_is_empty() {
        let source = SheetPostSource::new(None, "Posts");
        assert!(source.fetch().await.is_empty());
    }

    #[test]
    fn test_connect_requires_id_and_token() {
        let mut config = SourceConfig::default();
        assert!(GoogleSheets::connect(&config).is_none());

        config.spreadsheet_id = Some("sheet".into());
        assert!(GoogleSheets::connect(&config).is_none());

        config.access_token = Some(SecretString::from("ya29.token".to_string()));
        assert!(GoogleSheets::connect(&config).is_some());
    }

    #[test]
    fn test_connect_with_missing_key_file_and_no_token() {
        let mut config = SourceConfig::default();
        config.spreadsheet_id = Some("sheet".into());
        config.credentials_file = Some("/nonexistent/credentials.json".into());
        assert!(GoogleSheets::connect(&config).is_none());
    }

    #[test]
    fn test_url_building_encodes_tab() {
        let sheets = GoogleSheets::new(
            "https://sheets.example/v4",
            "abc",
            SheetsAuth::Token(SecretString::from("t".to_string())),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            sheets.url("", &["values", "My Posts"]).unwrap().as_str(),
            "https://sheets.example/v4/spreadsheets/abc/values/My%20Posts"
        );
        assert_eq!(
            sheets.url(":batchUpdate", &[]).unwrap().as_str(),
            "https://sheets.example/v4/spreadsheets/abc:batchUpdate"
        );
    }
}
