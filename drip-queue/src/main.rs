//! drip-queue - Inspect and steer the Dripcast post queue
//!
//! Operator tool for the queue the daemon works from: show its state, list
//! the posts, deliver one post by hand or move the cursor.

use clap::{Parser, Subcommand};
use libdripcast::channels::telegram::TelegramChannel;
use libdripcast::logging::LoggingConfig;
use libdripcast::queue::PostQueue;
use libdripcast::service::{
    connect_sheets, DripcastService, PostOutcome, EMPTY_REPLY, POSTED_REPLY,
};
use libdripcast::{Config, DeliveryReport, DripcastError, Post, Result};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "drip-queue")]
#[command(version)]
#[command(about = "Inspect and steer the Dripcast post queue")]
#[command(long_about = "\
drip-queue - Inspect and steer the Dripcast post queue

DESCRIPTION:
    drip-queue works on the same post list and state file as drip-send.
    The post list is read from the spreadsheet when one is configured and
    reachable, and from the local posts file otherwise.

COMMANDS:
    status      Show queue size, cursor and selection mode
    list        List posts in queue order
    next        Deliver the next post now
    reset       Move the cursor
    check-env   Show which deployment variables are set

USAGE EXAMPLES:
    # Where is the queue?
    drip-queue status

    # All posts as JSON
    drip-queue list --format json

    # Start over from the first post
    drip-queue reset

    # Continue from the fifth post
    drip-queue reset 4

CONFIGURATION:
    Configuration file: ~/.config/dripcast/config.toml (or $DRIPCAST_CONFIG)
    Environment overrides: see `drip-queue check-env`

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show queue size, cursor and selection mode
    Status {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List posts in queue order
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Deliver the next post to the channel now
    Next,

    /// Set the cursor (the next sequential post is `index mod length`)
    Reset {
        /// New cursor value
        #[arg(default_value_t = 0)]
        index: u64,
    },

    /// Show which deployment environment variables are set
    CheckEnv,
}

/// Deployment variables, and whether their values are secret
const DEPLOYMENT_VARS: &[(&str, bool)] = &[
    ("BOT_TOKEN", true),
    ("TARGET_CHAT_ID", false),
    ("SPREADSHEET_ID", false),
    ("CREDENTIALS_FILE", false),
    ("GOOGLE_CREDENTIALS", true),
    ("GOOGLE_ACCESS_TOKEN", true),
    ("POST_TIME", false),
    ("TZ", false),
    ("ADMIN_IDS", false),
    ("RANDOM_ORDER", false),
    ("POSTS_FILE", false),
    ("STATE_FILE", false),
    ("DRIPCAST_CONFIG", false),
];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if std::env::var("DRIPCAST_LOG_LEVEL").is_err() {
        logging.level = "error".to_string();
    }
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::CheckEnv = cli.command {
        cmd_check_env();
        return Ok(());
    }

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Commands::Status { format } => cmd_status(&config, &format).await,
        Commands::List { format } => cmd_list(&config, &format).await,
        Commands::Next => cmd_next(&config).await,
        Commands::Reset { index } => cmd_reset(&config, index).await,
        Commands::CheckEnv => Ok(()),
    }
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(DripcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

async fn load_queue(config: &Config) -> Result<PostQueue> {
    let queue = PostQueue::from_config(config, connect_sheets(config))?;
    queue.reload().await;
    Ok(queue)
}

/// Show queue statistics
async fn cmd_status(config: &Config, format: &str) -> Result<()> {
    validate_format(format)?;
    let queue = load_queue(config).await?;

    let count = queue.len().await;
    let cursor = queue.cursor();
    let options = queue.options();
    let mode = if options.random_order { "random" } else { "sequential" };
    let next = queue.peek().await;

    if format == "json" {
        let status = serde_json::json!({
            "posts": count,
            "cursor": cursor,
            "next_position": (count > 0).then(|| cursor % count as u64),
            "mode": mode,
            "consume_due": options.consume_due,
            "next_post": next.as_ref().map(|p| truncate_content(&p.text, 80)),
        });
        print_json(&status)?;
    } else {
        println!("Posts in queue: {}", count);
        println!("Mode: {}", mode);
        if count > 0 {
            println!("Cursor: {} (next #{})", cursor, cursor % count as u64 + 1);
        }
        if let Some(post) = next.filter(|_| !options.random_order) {
            println!("Next: [{}] {}", post.kind(), truncate_content(&post.text, 60));
        }
    }

    Ok(())
}

/// List posts in queue order
async fn cmd_list(config: &Config, format: &str) -> Result<()> {
    validate_format(format)?;
    let queue = load_queue(config).await?;
    let posts = queue.posts().await;
    let next_position =
        (!posts.is_empty()).then(|| (queue.cursor() % posts.len() as u64) as usize);

    if format == "json" {
        let list: Vec<serde_json::Value> = posts
            .iter()
            .enumerate()
            .map(|(i, post)| post_json(i, post, next_position == Some(i)))
            .collect();
        print_json(&serde_json::Value::Array(list))?;
    } else {
        for (i, post) in posts.iter().enumerate() {
            let marker = if next_position == Some(i) { ">" } else { " " };
            let schedule = post
                .scheduled_at
                .as_deref()
                .map(|at| format!(" @ {}", at))
                .unwrap_or_default();
            println!(
                "{} {:>3} | {:<10} | {}{}",
                marker,
                i + 1,
                post.kind(),
                truncate_content(&post.text, 50),
                schedule
            );
        }
    }

    Ok(())
}

fn post_json(index: usize, post: &Post, is_next: bool) -> serde_json::Value {
    serde_json::json!({
        "position": index,
        "type": post.kind(),
        "text": post.text,
        "scheduled_at": post.scheduled_at,
        "buttons": post.buttons.len(),
        "next": is_next,
    })
}

/// Deliver the next post now
async fn cmd_next(config: &Config) -> Result<()> {
    let channel = Arc::new(TelegramChannel::from_config(config)?);
    let service = DripcastService::from_config(config, channel).await?;

    match service.post_next(chrono::Utc::now()).await? {
        PostOutcome::Sent(DeliveryReport::Delivered { messages }) => {
            let plural = if messages.len() == 1 { "" } else { "s" };
            println!("{} ({} message{})", POSTED_REPLY, messages.len(), plural);
        }
        PostOutcome::Sent(DeliveryReport::Skipped { reason }) => println!("Skipped: {}", reason),
        PostOutcome::Sent(DeliveryReport::Rejected { kind }) => {
            return Err(DripcastError::InvalidInput(format!(
                "post of type '{}' was rejected",
                kind
            )));
        }
        PostOutcome::Empty => println!("{}", EMPTY_REPLY),
    }

    Ok(())
}

/// Move the cursor
async fn cmd_reset(config: &Config, index: u64) -> Result<()> {
    let queue = PostQueue::from_config(config, None)?;
    queue.reset(index).await?;
    println!("Cursor set to {}", index);
    Ok(())
}

/// Report deployment variables without revealing secrets
fn cmd_check_env() {
    for (name, secret) in DEPLOYMENT_VARS {
        match std::env::var(name) {
            Ok(value) if *secret => println!("✅ {} = <set, {} chars>", name, value.len()),
            Ok(value) => println!("✅ {} = {:?}", name, value),
            Err(_) => println!("❌ {} is not set", name),
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DripcastError::InvalidInput(format!("Failed to render JSON: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Truncate to `max_chars` characters with an ellipsis, on one line
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let cut: String = single_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
