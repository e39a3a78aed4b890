//! wsbwatch CLI: run the watcher daemon and manage its registry.

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wsbwatch::config::Config;
use wsbwatch::control::{CommandHandler, HELP, MAX_MUTE_DAYS, MAX_RATING, MIN_RATING, UpdatePoller};
use wsbwatch::db::Db;
use wsbwatch::model::{ChatId, TrackedAccount, is_valid_redditor_name};
use wsbwatch::reddit::RedditClient;
use wsbwatch::registry::AccountRegistry;
use wsbwatch::sink::NotificationSink;
use wsbwatch::source::PollingSource;
use wsbwatch::telegram::TelegramClient;
use wsbwatch::telemetry::{TelemetryConfig, init_telemetry};
use wsbwatch::watch::shutdown::cancel_on_signal;
use wsbwatch::watch::{WatchConfig, WatchContext, Watcher};

/// Timeout for every Reddit and Telegram request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Long-poll wait for Telegram getUpdates.
const UPDATE_WAIT: Duration = Duration::from_secs(25);

#[derive(Parser)]
#[command(name = "wsbwatch", about = "Forward tracked redditors' posts to Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the watcher daemon
    Serve,
    /// Tracked redditors (a running daemon picks up changes on restart;
    /// use the bot commands to change the live set)
    Accounts {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Telegram chats that receive notifications
    Chats {
        #[command(subcommand)]
        action: ChatAction,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// List tracked redditors
    List,
    /// Track a redditor
    Add {
        name: String,
        /// Rockets per notification (1-10)
        #[arg(default_value_t = 1)]
        rating: i32,
    },
    /// Stop tracking a redditor
    Remove { name: String },
    /// Suppress notifications for a number of days
    Mute { name: String, days: i64 },
    /// Lift a mute
    Unmute { name: String },
    /// Adjust the rating (may be negative)
    Rockets {
        name: String,
        #[arg(allow_hyphen_values = true)]
        amount: i32,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// List registered chats
    List,
    /// Register a chat
    Add {
        #[arg(allow_hyphen_values = true)]
        chat_id: i64,
        #[arg(long)]
        name: Option<String>,
    },
    /// Unregister a chat
    Remove {
        #[arg(allow_hyphen_values = true)]
        chat_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::Accounts { action } => {
            let db = connect_db().await?;
            cmd_accounts(&db, action).await
        }
        Command::Chats { action } => {
            let db = connect_db().await?;
            cmd_chats(&db, action).await
        }
    }
}

async fn connect_db() -> anyhow::Result<Db> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let db = Db::connect(&url).await?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "wsbwatch".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let registry: Arc<dyn AccountRegistry> = Arc::new(db);

    let source: Arc<dyn PollingSource> = Arc::new(RedditClient::new(config.reddit, HTTP_TIMEOUT)?);
    let telegram = Arc::new(TelegramClient::new(
        config.telegram_bot_token,
        HTTP_TIMEOUT + UPDATE_WAIT,
    )?);
    let sink: Arc<dyn NotificationSink> = telegram.clone();

    let watch_config = WatchConfig {
        watched_subreddits: config.watched_subreddits,
        ..WatchConfig::default()
    };
    info!(subreddits = ?watch_config.watched_subreddits, "watching");
    let ctx = WatchContext::new(source.clone(), sink.clone(), registry.clone(), watch_config);

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let mut watcher = Watcher::start(ctx.clone(), shutdown.clone());
    let handler = CommandHandler::new(registry.clone(), source, sink, watcher.control());
    let poller = UpdatePoller::new(telegram, registry, handler, UPDATE_WAIT);
    watcher.track("update-poller", tokio::spawn(poller.run(shutdown.clone())));

    if let Err(e) = ctx.broadcast(HELP).await {
        warn!(error = %e, "startup notification failed");
    }
    watcher.start_tracked().await?;

    let report = watcher.run_until_stopped().await;
    info!(?report, "wsbwatch stopped");
    Ok(())
}

async fn cmd_accounts(db: &Db, action: AccountAction) -> anyhow::Result<()> {
    match action {
        AccountAction::List => {
            let accounts = db.list_tracked().await?;
            if accounts.is_empty() {
                println!("No redditors tracked.");
                return Ok(());
            }
            println!("{:<24}  {:<6}  MUTED UNTIL", "REDDITOR", "RATING");
            println!("{}", "-".repeat(60));
            for account in &accounts {
                let muted = account
                    .mute_until
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<24}  {:<6}  {}", account.key, account.rating, muted);
            }
            println!("\n{} redditor(s)", accounts.len());
        }
        AccountAction::Add { name, rating } => {
            if !is_valid_redditor_name(&name) {
                anyhow::bail!("'{name}' is not a valid reddit username");
            }
            if !(MIN_RATING..=MAX_RATING).contains(&rating) {
                anyhow::bail!("rating must be between {MIN_RATING} and {MAX_RATING}");
            }
            if db.add(&TrackedAccount::new(&name, rating)).await? {
                println!("Added: {name} (rating {rating})");
            } else {
                println!("{name} is already tracked");
            }
        }
        AccountAction::Remove { name } => {
            if !db.remove(&name).await? {
                anyhow::bail!("no tracked redditor named '{name}'");
            }
            println!("Removed: {name}");
        }
        AccountAction::Mute { name, days } => {
            if !(1..=MAX_MUTE_DAYS).contains(&days) {
                anyhow::bail!("days must be between 1 and {MAX_MUTE_DAYS}");
            }
            match db.mute(&name, days).await? {
                Some(until) => println!("Muted: {name} until {}", until.format("%Y-%m-%d %H:%M")),
                None => anyhow::bail!("no tracked redditor named '{name}'"),
            }
        }
        AccountAction::Unmute { name } => {
            if !db.unmute(&name).await? {
                anyhow::bail!("no tracked redditor named '{name}'");
            }
            println!("Unmuted: {name}");
        }
        AccountAction::Rockets { name, amount } => match db.adjust_rating(&name, amount).await? {
            Some(rating) => println!("Rating of {name} is now {rating}"),
            None => anyhow::bail!("no tracked redditor named '{name}'"),
        },
    }
    Ok(())
}

async fn cmd_chats(db: &Db, action: ChatAction) -> anyhow::Result<()> {
    match action {
        ChatAction::List => {
            let chats = db.destinations().await?;
            for chat in &chats {
                println!("{chat}");
            }
            println!("\n{} chat(s)", chats.len());
        }
        ChatAction::Add { chat_id, name } => {
            if db.add_destination(ChatId(chat_id), name.as_deref()).await? {
                println!("Registered chat {chat_id}");
            } else {
                println!("Chat {chat_id} is already registered");
            }
        }
        ChatAction::Remove { chat_id } => {
            if !db.remove_destination(ChatId(chat_id)).await? {
                anyhow::bail!("chat {chat_id} is not registered");
            }
            println!("Unregistered chat {chat_id}");
        }
    }
    Ok(())
}
