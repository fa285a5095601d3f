//! Post queue with a persisted cursor
//!
//! Selection order on every [`PostQueue::next_post`] call:
//!
//! 1. the first post (in list order) whose `scheduled_at` is due,
//! 2. otherwise a uniformly random post when random order is enabled,
//! 3. otherwise the post under the cursor, after which the cursor advances
//!    and is written to the state file before the call returns.
//!
//! The persisted cursor is kept reduced: after the k-th sequential call it
//! holds `k mod len`. A larger value written by hand is reduced on next use.
//!
//! Selection, state mutation and persistence form one critical section behind
//! an async mutex, so concurrent triggers never deliver the same sequential
//! post twice or skip one.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::schedule::parse_scheduled_at;
use crate::source::{LocalPostFile, PostSource, SheetPostSource, TabularSource};
use crate::types::Post;

/// Persisted selection state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub index: u64,
    /// Fingerprints of scheduled posts already delivered in one-shot mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivered_scheduled: Vec<String>,
}

/// JSON file holding the [`QueueState`]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, treating a missing or unreadable file as a fresh start
    ///
    /// A non-integer or negative `index` reads as 0.
    pub fn load(&self) -> QueueState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to read state file, starting from 0");
                }
                return QueueState::default();
            }
        };

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file is malformed, starting from 0");
                return QueueState::default();
            }
        };

        QueueState {
            index: value.get("index").and_then(Value::as_u64).unwrap_or(0),
            delivered_scheduled: value
                .get("delivered_scheduled")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Write the state atomically: temp file in the same directory, then rename
    pub fn save(&self, state: &QueueState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let json = serde_json::to_string(state).map_err(StoreError::Json)?;
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(StoreError::Io)?;
            file.write_all(json.as_bytes()).map_err(StoreError::Io)?;
            file.sync_all().map_err(StoreError::Io)?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(StoreError::Io)?;
        Ok(())
    }
}

/// Selection behavior
#[derive(Debug, Clone, Copy)]
pub struct SelectionOptions {
    pub random_order: bool,
    pub consume_due: bool,
    /// Zone for `scheduled_at` values without an offset
    pub timezone: Tz,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            random_order: false,
            consume_due: false,
            timezone: Tz::UTC,
        }
    }
}

/// How a post was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Due,
    Random,
    Sequential { position: usize },
}

pub struct PostQueue {
    remote: Box<dyn PostSource>,
    local: LocalPostFile,
    store: StateStore,
    options: SelectionOptions,
    posts: Mutex<Vec<Post>>,
}

impl PostQueue {
    /// Create an empty queue; call [`PostQueue::reload`] to populate it
    pub fn new(
        remote: Box<dyn PostSource>,
        local: LocalPostFile,
        store: StateStore,
        options: SelectionOptions,
    ) -> Self {
        Self {
            remote,
            local,
            store,
            options,
            posts: Mutex::new(Vec::new()),
        }
    }

    /// Queue over the configured posts tab, local posts file and state file
    pub fn from_config(config: &Config, sheets: Option<Arc<dyn TabularSource>>) -> Result<Self> {
        Ok(Self::new(
            Box::new(SheetPostSource::new(sheets, config.source.posts_tab.clone())),
            LocalPostFile::new(config.storage.posts_path()),
            StateStore::new(config.storage.state_path()),
            SelectionOptions {
                random_order: config.schedule.random_order,
                consume_due: config.schedule.consume_due,
                timezone: config.timezone()?,
            },
        ))
    }

    /// Replace the list: remote posts when there are any, local posts otherwise
    ///
    /// Returns the new list length.
    pub async fn reload(&self) -> usize {
        let remote = self.remote.fetch().await;
        let (posts, origin) = if remote.is_empty() {
            (self.local.load(), "local")
        } else {
            (remote, "remote")
        };

        let count = posts.len();
        *self.posts.lock().await = posts;
        info!(count, origin, "Post list reloaded");
        count
    }

    pub async fn len(&self) -> usize {
        self.posts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.posts.lock().await.is_empty()
    }

    /// Snapshot of the current list
    pub async fn posts(&self) -> Vec<Post> {
        self.posts.lock().await.clone()
    }

    /// Persisted cursor (not reduced)
    pub fn cursor(&self) -> u64 {
        self.store.load().index
    }

    pub fn options(&self) -> SelectionOptions {
        self.options
    }

    /// Sequential post the next call would deliver, without advancing
    pub async fn peek(&self) -> Option<Post> {
        let posts = self.posts.lock().await;
        if posts.is_empty() {
            return None;
        }
        let position = (self.store.load().index % posts.len() as u64) as usize;
        Some(posts[position].clone())
    }

    /// Overwrite the cursor, keeping one-shot history
    pub async fn reset(&self, index: u64) -> Result<()> {
        let _guard = self.posts.lock().await;
        let mut state = self.store.load();
        state.index = index;
        self.store.save(&state)?;
        info!(index, "Cursor reset");
        Ok(())
    }

    /// Choose the next post at `now`; `None` when the list is empty
    pub async fn next_post(&self, now: DateTime<Utc>) -> Result<Option<Post>> {
        Ok(self.select(now).await?.map(|(post, _)| post))
    }

    /// Same as [`PostQueue::next_post`] but also reports how the post was chosen
    pub async fn select(&self, now: DateTime<Utc>) -> Result<Option<(Post, Selection)>> {
        let posts = self.posts.lock().await;
        if posts.is_empty() {
            return Ok(None);
        }

        let mut state = self.store.load();

        if let Some(post) = self.first_due(&posts, &state, now) {
            if self.options.consume_due {
                state.delivered_scheduled.push(post.fingerprint());
                self.store.save(&state)?;
            }
            debug!(kind = post.kind(), "Selected due scheduled post");
            return Ok(Some((post.clone(), Selection::Due)));
        }

        if self.options.random_order {
            let post = posts.choose(&mut rand::thread_rng()).cloned();
            return Ok(post.map(|p| (p, Selection::Random)));
        }

        let len = posts.len() as u64;
        let position = state.index % len;
        state.index = (position + 1) % len;
        self.store.save(&state)?;

        let post = posts[position as usize].clone();
        debug!(position, kind = post.kind(), "Selected sequential post");
        Ok(Some((
            post,
            Selection::Sequential {
                position: position as usize,
            },
        )))
    }

    fn first_due<'a>(
        &self,
        posts: &'a [Post],
        state: &QueueState,
        now: DateTime<Utc>,
    ) -> Option<&'a Post> {
        posts.iter().find(|post| {
            let Some(raw) = post.scheduled_at.as_deref() else {
                return false;
            };
            let Some(at) = parse_scheduled_at(raw, self.options.timezone) else {
                debug!(scheduled_at = raw, "Skipping unparseable scheduled time");
                return false;
            };
            if at > now {
                return false;
            }
            !(self.options.consume_due
                && state.delivered_scheduled.contains(&post.fingerprint()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct StaticSource(Vec<Post>);

    #[async_trait]
    impl PostSource for StaticSource {
        async fn fetch(&self) -> Vec<Post> {
            self.0.clone()
        }
    }

    fn scheduled(text: &str, at: &str) -> Post {
        let mut post = Post::text(text);
        post.scheduled_at = Some(at.to_string());
        post
    }

    async fn queue_with(
        dir: &TempDir,
        posts: Vec<Post>,
        options: SelectionOptions,
    ) -> PostQueue {
        let queue = PostQueue::new(
            Box::new(StaticSource(posts)),
            LocalPostFile::new(dir.path().join("posts.json")),
            StateStore::new(dir.path().join("state.json")),
            options,
        );
        queue.reload().await;
        queue
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    async fn texts(queue: &PostQueue, calls: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..calls {
            out.push(queue.next_post(now()).await.unwrap().unwrap().text);
        }
        out
    }

    #[test]
    fn test_state_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load(), QueueState::default());

        std::fs::write(store.path(), r#"{"index": "seven"}"#).unwrap();
        assert_eq!(store.load().index, 0);

        std::fs::write(store.path(), r#"{"index": -3}"#).unwrap();
        assert_eq!(store.load().index, 0);

        std::fs::write(store.path(), "not json").unwrap();
        assert_eq!(store.load().index, 0);
    }

    #[test]
    fn test_state_file_format() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));
        store
            .save(&QueueState {
                index: 4,
                delivered_scheduled: vec![],
            })
            .unwrap();

        let written = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(written, r#"{"index":4}"#);
        assert_eq!(store.load().index, 4);
    }

    #[tokio::test]
    async fn test_sequential_visits_each_once_per_cycle() {
        let dir = TempDir::new().unwrap();
        let posts = vec![Post::text("a"), Post::text("b"), Post::text("c")];
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;

        assert_eq!(texts(&queue, 6).await, ["a", "b", "c", "a", "b", "c"]);
        assert_eq!(queue.cursor(), 0);
    }

    #[tokio::test]
    async fn test_persisted_cursor_is_call_count_mod_len() {
        let dir = TempDir::new().unwrap();
        let posts = vec![Post::text("a"), Post::text("b"), Post::text("c")];
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;
        let store = StateStore::new(dir.path().join("state.json"));

        for k in 1..=7u64 {
            queue.next_post(now()).await.unwrap();
            assert_eq!(store.load().index, k % 3, "after call {}", k);
        }
    }

    #[tokio::test]
    async fn test_cursor_beyond_length_is_reduced() {
        let dir = TempDir::new().unwrap();
        StateStore::new(dir.path().join("state.json"))
            .save(&QueueState {
                index: 7,
                delivered_scheduled: vec![],
            })
            .unwrap();
        let posts = vec![Post::text("a"), Post::text("b"), Post::text("c")];
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;

        assert_eq!(queue.peek().await.unwrap().text, "b");
        assert_eq!(texts(&queue, 3).await, ["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_persisted_cursor() {
        let dir = TempDir::new().unwrap();
        let posts = vec![Post::text("a"), Post::text("b"), Post::text("c")];

        let first = queue_with(&dir, posts.clone(), SelectionOptions::default()).await;
        assert_eq!(texts(&first, 2).await, ["a", "b"]);
        drop(first);

        let second = queue_with(&dir, posts, SelectionOptions::default()).await;
        assert_eq!(texts(&second, 1).await, ["c"]);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let dir = TempDir::new().unwrap();
        let queue = queue_with(&dir, vec![], SelectionOptions::default()).await;
        assert!(queue.next_post(now()).await.unwrap().is_none());
        assert!(queue.peek().await.is_none());
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn test_reload_falls_back_to_local_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("posts.json"),
            r#"[{"type":"text","text":"A"},{"type":"text","text":""}]"#,
        )
        .unwrap();
        let queue = queue_with(&dir, vec![], SelectionOptions::default()).await;

        assert_eq!(queue.len().await, 1);
        assert_eq!(texts(&queue, 2).await, ["A", "A"]);
    }

    #[tokio::test]
    async fn test_due_post_is_redelivered_by_default() {
        let dir = TempDir::new().unwrap();
        let posts = vec![
            Post::text("plain"),
            scheduled("future", "2030-01-01 09:00"),
            scheduled("due", "2025-05-31T08:00:00"),
        ];
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;

        assert_eq!(texts(&queue, 3).await, ["due", "due", "due"]);
        // Due selection never advances the cursor
        assert_eq!(queue.cursor(), 0);
    }

    #[tokio::test]
    async fn test_consume_due_delivers_once() {
        let dir = TempDir::new().unwrap();
        let posts = vec![Post::text("plain"), scheduled("due", "2025-05-31 08:00")];
        let options = SelectionOptions {
            consume_due: true,
            ..Default::default()
        };
        let queue = queue_with(&dir, posts, options).await;

        assert_eq!(texts(&queue, 3).await, ["due", "plain", "due"]);
        // The second "due" is the sequential pass, not the scheduled one
        let state = StateStore::new(dir.path().join("state.json")).load();
        assert_eq!(state.delivered_scheduled.len(), 1);
        assert_eq!(state.index, 0);
    }

    #[tokio::test]
    async fn test_scheduled_time_uses_configured_zone() {
        let dir = TempDir::new().unwrap();
        // 14:30 in Moscow is 11:30 UTC, due at 12:00 UTC
        let posts = vec![Post::text("plain"), scheduled("moscow", "2025-06-01 14:30")];
        let options = SelectionOptions {
            timezone: chrono_tz::Europe::Moscow,
            ..Default::default()
        };
        let queue = queue_with(&dir, posts.clone(), options).await;
        assert_eq!(texts(&queue, 1).await, ["moscow"]);

        // The same wall time in UTC is still in the future
        let dir = TempDir::new().unwrap();
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;
        assert_eq!(texts(&queue, 1).await, ["plain"]);
    }

    #[tokio::test]
    async fn test_unparseable_schedule_is_skipped() {
        let dir = TempDir::new().unwrap();
        let posts = vec![scheduled("broken", "someday"), Post::text("b")];
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;
        assert_eq!(texts(&queue, 2).await, ["broken", "b"]);
    }

    #[tokio::test]
    async fn test_random_mode_leaves_cursor_and_history_alone() {
        let dir = TempDir::new().unwrap();
        let posts = vec![Post::text("a"), Post::text("b"), Post::text("c")];
        let options = SelectionOptions {
            random_order: true,
            consume_due: true,
            ..Default::default()
        };
        let queue = queue_with(&dir, posts, options).await;

        for _ in 0..20 {
            let (post, how) = queue.select(now()).await.unwrap().unwrap();
            assert_eq!(how, Selection::Random);
            assert!(["a", "b", "c"].contains(&post.text.as_str()));
        }
        assert_eq!(queue.cursor(), 0);
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn test_reset_sets_cursor() {
        let dir = TempDir::new().unwrap();
        let posts = vec![Post::text("a"), Post::text("b")];
        let queue = queue_with(&dir, posts, SelectionOptions::default()).await;

        queue.reset(1).await.unwrap();
        assert_eq!(queue.cursor(), 1);
        assert_eq!(texts(&queue, 1).await, ["b"]);
    }

    #[tokio::test]
    async fn test_persistence_failure_withholds_post() {
        let dir = TempDir::new().unwrap();
        // A directory where the state file should be makes the rename fail
        let state_path = dir.path().join("state.json");
        std::fs::create_dir(&state_path).unwrap();
        std::fs::write(state_path.join("keep"), "x").unwrap();

        let queue = PostQueue::new(
            Box::new(StaticSource(vec![Post::text("a")])),
            LocalPostFile::new(dir.path().join("posts.json")),
            StateStore::new(&state_path),
            SelectionOptions::default(),
        );
        queue.reload().await;

        assert!(queue.next_post(now()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_calls_visit_each_post_once() {
        let dir = TempDir::new().unwrap();
        let posts: Vec<Post> = (0..8).map(|i| Post::text(format!("p{}", i))).collect();
        let queue = Arc::new(queue_with(&dir, posts, SelectionOptions::default()).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.next_post(now()).await.unwrap().unwrap().text })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort();
        let expected: Vec<String> = (0..8).map(|i| format!("p{}", i)).collect();
        assert_eq!(seen, expected);
        assert_eq!(queue.cursor(), 0);
    }
}
