//! Media capture
//!
//! Operators upload media to the bot to learn the reusable handle they can
//! put into post records. Every captured handle is appended to the `Media`
//! tab of the spreadsheet, or to a local CSV file when the spreadsheet cannot
//! be written.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::channels::telegram::Message;
use crate::error::{Result, StoreError};
use crate::source::TabularSource;
use crate::types::MediaKind;

pub const CAPTURE_HEADER: [&str; 4] = ["type", "file_id", "file_name", "timestamp"];

pub const NO_ATTACHMENT_REPLY: &str = "Attachment not recognized";

/// An uploaded attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMedia {
    pub kind: MediaKind,
    /// Opaque handle usable as `media` in post records
    pub handle: String,
    pub original_name: Option<String>,
}

impl CapturedMedia {
    /// Reply sent back to the uploader
    pub fn reply(&self) -> String {
        format!("File ID: {}", self.handle)
    }

    fn row(&self, at: DateTime<Utc>) -> Vec<String> {
        vec![
            self.kind.to_string(),
            self.handle.clone(),
            self.original_name.clone().unwrap_or_default(),
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ]
    }
}

/// First attachment of a message, checked as photo, video, audio, voice, document
///
/// For photos the largest size (the last one listed) is used.
pub fn extract_attachment(message: &Message) -> Option<CapturedMedia> {
    let captured = |kind, file: &crate::channels::telegram::FileRef| CapturedMedia {
        kind,
        handle: file.file_id.clone(),
        original_name: file.file_name.clone(),
    };

    if let Some(largest) = message.photo.as_deref().and_then(<[_]>::last) {
        return Some(captured(MediaKind::Photo, largest));
    }
    [
        (MediaKind::Video, &message.video),
        (MediaKind::Audio, &message.audio),
        (MediaKind::Voice, &message.voice),
        (MediaKind::Document, &message.document),
    ]
    .into_iter()
    .find_map(|(kind, file)| file.as_ref().map(|f| captured(kind, f)))
}

/// Where a capture ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Remote,
    Local,
    /// Both stores failed; the handle was still echoed to the uploader
    Lost,
}

pub struct MediaRecorder {
    remote: Option<Arc<dyn TabularSource>>,
    tab: String,
    csv_path: PathBuf,
}

impl MediaRecorder {
    pub fn new(
        remote: Option<Arc<dyn TabularSource>>,
        tab: impl Into<String>,
        csv_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote,
            tab: tab.into(),
            csv_path: csv_path.into(),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Store one capture, remote first and local CSV as fallback
    pub async fn record(&self, media: &CapturedMedia, at: DateTime<Utc>) -> CaptureOutcome {
        let row = media.row(at);

        if let Some(remote) = &self.remote {
            match self.record_remote(remote.as_ref(), &row).await {
                Ok(()) => {
                    info!(kind = %media.kind, tab = %self.tab, "Captured media recorded in spreadsheet");
                    return CaptureOutcome::Remote;
                }
                Err(e) => {
                    warn!(error = %e, "Spreadsheet capture failed, writing local CSV");
                }
            }
        }

        match append_csv(&self.csv_path, &row) {
            Ok(()) => {
                info!(kind = %media.kind, path = %self.csv_path.display(), "Captured media recorded locally");
                CaptureOutcome::Local
            }
            Err(e) => {
                error!(handle = %media.handle, error = %e, "Captured media could not be stored");
                CaptureOutcome::Lost
            }
        }
    }

    async fn record_remote(&self, remote: &dyn TabularSource, row: &[String]) -> Result<()> {
        remote.ensure_tab(&self.tab, &CAPTURE_HEADER).await?;
        remote.append_row(&self.tab, row).await
    }
}

/// Append one record, writing the header first when the file is new or empty
fn append_csv(path: &Path, row: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(StoreError::Io)?;
    let is_new = file.metadata().map_err(StoreError::Io)?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(CAPTURE_HEADER).map_err(StoreError::Csv)?;
    }
    writer.write_record(row).map_err(StoreError::Csv)?;
    writer.flush().map_err(StoreError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::Row;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemorySheet {
        fail: bool,
        tabs: Mutex<Vec<(String, Vec<Vec<String>>)>>,
    }

    #[async_trait]
    impl TabularSource for MemorySheet {
        async fn read_rows(&self, _tab: &str) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn ensure_tab(&self, tab: &str, header: &[&str]) -> Result<()> {
            if self.fail {
                return Err(SourceError::Unavailable("quota exceeded".into()).into());
            }
            let mut tabs = self.tabs.lock().unwrap();
            if !tabs.iter().any(|(name, _)| name == tab) {
                let header = header.iter().map(|h| h.to_string()).collect();
                tabs.push((tab.to_string(), vec![header]));
            }
            Ok(())
        }

        async fn append_row(&self, tab: &str, values: &[String]) -> Result<()> {
            let mut tabs = self.tabs.lock().unwrap();
            let (_, rows) = tabs
                .iter_mut()
                .find(|(name, _)| name == tab)
                .ok_or_else(|| SourceError::Unavailable("no such tab".into()))?;
            rows.push(values.to_vec());
            Ok(())
        }
    }

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    fn photo() -> CapturedMedia {
        CapturedMedia {
            kind: MediaKind::Photo,
            handle: "AgACAgIAAx".into(),
            original_name: None,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_extract_largest_photo() {
        let msg = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "photo": [{"file_id": "small"}, {"file_id": "large"}],
            "document": {"file_id": "doc", "file_name": "a.pdf"}
        }));
        let captured = extract_attachment(&msg).unwrap();
        assert_eq!(captured.kind, MediaKind::Photo);
        assert_eq!(captured.handle, "large");
        assert_eq!(captured.reply(), "File ID: large");
    }

    #[test]
    fn test_extract_document_with_name() {
        let msg = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "document": {"file_id": "doc", "file_name": "a.pdf"}
        }));
        assert_eq!(
            extract_attachment(&msg),
            Some(CapturedMedia {
                kind: MediaKind::Document,
                handle: "doc".into(),
                original_name: Some("a.pdf".into()),
            })
        );
    }

    #[test]
    fn test_extract_prefers_video_over_voice() {
        let msg = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "voice": {"file_id": "v"},
            "video": {"file_id": "clip"}
        }));
        assert_eq!(extract_attachment(&msg).unwrap().kind, MediaKind::Video);
    }

    #[test]
    fn test_extract_nothing_from_text() {
        let msg = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "text": "hello"
        }));
        assert!(extract_attachment(&msg).is_none());
    }

    #[tokio::test]
    async fn test_remote_capture_creates_tab_with_header() {
        let dir = TempDir::new().unwrap();
        let sheet = Arc::new(MemorySheet::default());
        let recorder = MediaRecorder::new(
            Some(sheet.clone() as Arc<dyn TabularSource>),
            "Media",
            dir.path().join("media_store.csv"),
        );

        assert_eq!(recorder.record(&photo(), at()).await, CaptureOutcome::Remote);
        assert_eq!(recorder.record(&photo(), at()).await, CaptureOutcome::Remote);

        let tabs = sheet.tabs.lock().unwrap();
        let (name, rows) = &tabs[0];
        assert_eq!(name, "Media");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], CAPTURE_HEADER.map(String::from).to_vec());
        assert_eq!(rows[1][3], "2025-03-14T09:26:53Z");
        assert!(!recorder.csv_path().exists());
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_csv() {
        let dir = TempDir::new().unwrap();
        let sheet = Arc::new(MemorySheet {
            fail: true,
            ..Default::default()
        });
        let recorder = MediaRecorder::new(
            Some(sheet as Arc<dyn TabularSource>),
            "Media",
            dir.path().join("media_store.csv"),
        );

        assert_eq!(recorder.record(&photo(), at()).await, CaptureOutcome::Local);
        assert_eq!(recorder.record(&photo(), at()).await, CaptureOutcome::Local);

        let content = std::fs::read_to_string(recorder.csv_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "type,file_id,file_name,timestamp");
        assert_eq!(lines[1], "photo,AgACAgIAAx,,2025-03-14T09:26:53Z");
    }

    #[tokio::test]
    async fn test_no_remote_writes_csv() {
        let dir = TempDir::new().unwrap();
        let recorder = MediaRecorder::new(None, "Media", dir.path().join("out").join("media.csv"));
        assert_eq!(recorder.record(&photo(), at()).await, CaptureOutcome::Local);
        assert!(recorder.csv_path().exists());
    }

    #[tokio::test]
    async fn test_both_stores_failing_is_lost() {
        let dir = TempDir::new().unwrap();
        // The CSV path is a directory, so opening it for append fails
        let recorder = MediaRecorder::new(None, "Media", dir.path());
        assert_eq!(recorder.record(&photo(), at()).await, CaptureOutcome::Lost);
    }
}
