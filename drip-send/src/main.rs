//! drip-send - Telegram bot daemon for daily drip posting
//!
//! Posts the next queued post once a day and serves the bot's chat: operator
//! commands, media uploads and carousel navigation.

use chrono::{NaiveTime, Utc};
use chrono_tz::Tz;
use clap::Parser;
use libdripcast::channels::telegram::{
    CallbackQuery, Message, TelegramChannel, TelegramClient, Update,
};
use libdripcast::logging::LoggingConfig;
use libdripcast::schedule::next_daily_run;
use libdripcast::service::{DripcastService, PostOutcome};
use libdripcast::{Config, DripcastError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

const NOT_ALLOWED_REPLY: &str = "This command is available to administrators only.";

#[derive(Parser, Debug)]
#[command(name = "drip-send")]
#[command(version)]
#[command(about = "Telegram bot daemon for daily drip posting")]
#[command(long_about = "\
drip-send - Telegram bot daemon for daily drip posting

DESCRIPTION:
    drip-send posts one queued post per day to the configured Telegram
    channel at a fixed local time, and answers in the bot's chat:

      /next     post the next queued post now
      /status   show queue size and position
      /reload   re-read the post list from the spreadsheet

    Any photo, video, audio, voice note or document sent to the bot is
    answered with its reusable file id, which is also recorded in the
    spreadsheet's Media tab (or media_store.csv when the spreadsheet is
    unavailable).

CAROUSELS:
    Carousel navigation buttons carry the whole slide list in Telegram's
    64-byte callback data. Real file ids are 50 to 100 characters, so a
    carousel only gets its back/forward buttons when its slides use very
    short media handles (short URLs or aliases). Otherwise the first slide
    is posted without buttons and a warning is logged.

USAGE:
    # Run in foreground (logs to stderr)
    drip-send

    # Deliver one post as the daily trigger would, then exit
    drip-send --once

CONFIGURATION:
    Configuration file: ~/.config/dripcast/config.toml (or $DRIPCAST_CONFIG)

    Environment overrides:
        BOT_TOKEN, TARGET_CHAT_ID, ADMIN_IDS, POST_TIME, TZ, RANDOM_ORDER,
        SPREADSHEET_ID, GOOGLE_CREDENTIALS, CREDENTIALS_FILE,
        GOOGLE_ACCESS_TOKEN, POSTS_FILE, STATE_FILE

    Google Sheets credentials: a service-account key as inline JSON
    (GOOGLE_CREDENTIALS) or as a file (CREDENTIALS_FILE), or else a
    pre-issued OAuth access token (GOOGLE_ACCESS_TOKEN).

    Logging: DRIPCAST_LOG_FORMAT (text, json, pretty), DRIPCAST_LOG_LEVEL

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Long-poll timeout for bot updates
    #[arg(long, value_name = "SECONDS", default_value_t = 25)]
    poll_timeout: u64,

    /// Deliver one post immediately and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "drip-send failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    let post_time = config.post_time()?;
    let timezone = config.timezone()?;

    let channel = Arc::new(TelegramChannel::from_config(&config)?);
    let client = channel.client().clone();
    let service = Arc::new(DripcastService::from_config(&config, channel).await?);

    if cli.once {
        let outcome = service.scheduled_run(Utc::now()).await?;
        info!(?outcome, "drip-send: delivered once, exiting");
        return Ok(());
    }

    info!(
        post_time = %post_time.format("%H:%M"),
        timezone = %timezone,
        posts = service.queue().len().await,
        "drip-send daemon starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let timer = tokio::spawn(run_daily_timer(
        service.clone(),
        post_time,
        timezone,
        shutdown.clone(),
    ));

    run_update_loop(
        &client,
        &service,
        Duration::from_secs(cli.poll_timeout),
        shutdown,
    )
    .await;

    timer.abort();
    info!("drip-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| DripcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Resolves once shutdown has been requested
async fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(1)).await;
    }
}

/// Fire the daily post at `post_time` in `timezone`
async fn run_daily_timer(
    service: Arc<DripcastService>,
    post_time: NaiveTime,
    timezone: Tz,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        let next = next_daily_run(Utc::now(), post_time, timezone);
        info!(next = %next.with_timezone(&timezone), "Next daily post scheduled");

        // Sleep in short steps so shutdown and clock changes are noticed
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let remaining = next - Utc::now();
            if remaining <= chrono::Duration::zero() {
                break;
            }
            let step = remaining.to_std().unwrap_or_default().min(Duration::from_secs(1));
            sleep(step).await;
        }

        match service.scheduled_run(Utc::now()).await {
            Ok(PostOutcome::Sent(report)) => info!(?report, "Daily post done"),
            Ok(PostOutcome::Empty) => warn!("Daily post skipped: queue is empty"),
            Err(e) => error!(error = %e, "Daily post failed"),
        }
    }
}

/// Long-poll the Bot API and handle each update until shutdown
async fn run_update_loop(
    client: &TelegramClient,
    service: &DripcastService,
    poll_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut offset = 0i64;

    loop {
        let updates = tokio::select! {
            _ = wait_for_shutdown(&shutdown) => {
                info!("Shutdown requested, stopping update loop");
                return;
            }
            result = client.get_updates(offset, poll_timeout) => result,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    handle_update(client, service, update).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Fetching updates failed, retrying");
                tokio::select! {
                    _ = wait_for_shutdown(&shutdown) => return,
                    _ = sleep(Duration::from_secs(5)) => {}
                }
            }
        }
    }
}

async fn handle_update(client: &TelegramClient, service: &DripcastService, update: Update) {
    if let Some(query) = update.callback_query {
        handle_callback(client, service, query).await;
    } else if let Some(message) = update.message {
        handle_message(client, service, message).await;
    }
}

async fn handle_callback(client: &TelegramClient, service: &DripcastService, query: CallbackQuery) {
    if let (Some(data), Some(message)) = (query.data.as_deref(), query.message.as_ref()) {
        if let Err(e) = service.navigate(&message.location(), data).await {
            warn!(error = %e, "Carousel navigation failed");
        }
    }
    if let Err(e) = client.answer_callback(&query.id).await {
        debug!(error = %e, "Answering callback failed");
    }
}

async fn handle_message(client: &TelegramClient, service: &DripcastService, message: Message) {
    let reply = match message.text.as_deref().and_then(parse_command) {
        Some(command) => {
            let user = message.from.as_ref().map(|u| u.id);
            if !user.is_some_and(|id| service.is_admin(id)) {
                warn!(user = ?user, ?command, "Rejected operator command");
                NOT_ALLOWED_REPLY.to_string()
            } else {
                info!(user = ?user, ?command, "Operator command");
                match command {
                    Command::Next => service.command_next(Utc::now()).await,
                    Command::Status => service.status().await,
                    Command::Reload => service.reload().await,
                }
            }
        }
        None if message.text.as_deref().is_some_and(|t| t.starts_with('/')) => {
            debug!("Ignoring unknown command");
            return;
        }
        None => service.capture(&message, Utc::now()).await,
    };

    let location = message.location();
    if let Err(e) = client
        .send_reply(location.chat_id, Some(location.message_id), &reply)
        .await
    {
        warn!(error = %e, "Sending reply failed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Next,
    Status,
    Reload,
}

/// Recognize `/next`, `/status` and `/reload`, with or without a `@botname` suffix
fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?.strip_prefix('/')?;
    let name = word.split('@').next().unwrap_or(word);
    match name.to_lowercase().as_str() {
        "next" => Some(Command::Next),
        "status" => Some(Command::Status),
        "reload" => Some(Command::Reload),
        _ => None,
    }
}
