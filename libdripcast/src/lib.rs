//! Dripcast - scheduled drip posting to a single Telegram channel
//!
//! Posts are authored in a spreadsheet (or a local JSON file), picked one at
//! a time by a persisted queue, and delivered by a dispatcher that knows how
//! to send every supported content kind.

pub mod capture;
pub mod carousel;
pub mod channels;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod queue;
pub mod schedule;
pub mod service;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DeliveryReport, Dispatcher};
pub use error::{DripcastError, Result};
pub use queue::PostQueue;
pub use service::DripcastService;
pub use types::{Post, PostContent};
