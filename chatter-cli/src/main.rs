//! Command-line driver for the chat engine
//!
//! Exercises the full public surface (open, send, history, list, watch)
//! against a local database, with profiles in a JSON directory file.

use anyhow::{bail, Context, Result};
use chatter_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use chatter_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use chatter_core::{
    Config, ConversationKey, Cursor, MessageLog, ParticipantId, Profile, RealtimeChannel,
    Reconciler, SqlMirrorStore, SyncCoordinator,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod directory;

use directory::JsonDirectory;

#[derive(Parser, Debug)]
#[command(name = "chatter")]
#[command(author, version, about = "Two-party chat synchronization engine", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Data directory (overrides CHATTER_STORE_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a participant profile in the local directory
    AddUser {
        /// Participant id
        id: String,
        /// Display name
        name: String,
        /// Avatar URL
        #[arg(long)]
        avatar: Option<String>,
        /// Email address
        #[arg(long)]
        email: Option<String>,
    },
    /// Search the directory by name or email
    Search { term: String },
    /// Open (or look up) the conversation between two participants
    Open { me: String, other: String },
    /// Send a message
    Send {
        /// Conversation key, as printed by `open`
        key: String,
        /// Sending participant id
        from: String,
        /// Message text
        text: String,
        /// Client message id for idempotent retry (random when omitted)
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Print a conversation's history
    History {
        key: String,
        /// Resume cursor in ts:seq form
        #[arg(long, default_value = "0:0")]
        since: String,
    },
    /// Print a participant's conversation list
    List { owner: String },
    /// Follow a conversation's message stream until interrupted
    Watch { key: String },
    /// Follow a participant's conversation list until interrupted
    WatchMirrors { owner: String },
    /// Run one mirror reconciliation round
    Reconcile,
}

/// Everything a command needs, wired over the on-disk store
struct Engine {
    coordinator: SyncCoordinator,
    reconciler: Reconciler,
    directory: Arc<JsonDirectory>,
}

fn build_engine(config: &Config) -> Result<Engine> {
    let pool = chatter_core::storage::open_pool(config.store.db_path())
        .context("opening database")?;

    let log = Arc::new(MessageLog::new(pool.clone()));
    let mirrors = Arc::new(SqlMirrorStore::new(pool));
    let channel = Arc::new(RealtimeChannel::new(config.channel.buffer_capacity));
    let directory = Arc::new(
        JsonDirectory::open(config.store.data_dir.join("users.json"))
            .context("opening user directory")?,
    );

    let coordinator = SyncCoordinator::new(
        log.clone(),
        mirrors.clone(),
        channel.clone(),
        directory.clone(),
        config.sync.retry_policy(),
    );

    let reconciler = Reconciler::new(
        log,
        mirrors,
        channel,
        directory.clone(),
        config.sync.reconciler_config(),
    );

    Ok(Engine { coordinator, reconciler, directory })
}

fn parse_cursor(raw: &str) -> Result<Cursor> {
    let (ts, seq) = raw
        .split_once(':')
        .with_context(|| format!("cursor must be ts:seq, got {}", raw))?;
    Ok(Cursor::new(ts.parse()?, seq.parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::parse(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        LogLevel::Info
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;

    let mut config = Config::from_env()?;
    if let Some(data_dir) = args.data_dir {
        config.store.data_dir = data_dir;
    }
    if config.metrics.enabled {
        chatter_core::metrics::init_metrics();
    }

    let engine = build_engine(&config)?;

    match args.command {
        Command::AddUser { id, name, avatar, email } => {
            let mut profile = Profile::new(id.as_str(), name);
            profile.avatar_url = avatar;
            profile.email = email;

            engine.directory.upsert(profile.clone())?;
            // existing mirror entries pick up the new display fields
            engine.coordinator.apply_profile_change(&profile).await?;
            println!("registered {}", id);
        }
        Command::Search { term } => {
            use chatter_core::DirectoryService;
            let hits = engine.directory.search(&term).await?;
            if hits.is_empty() {
                println!("no matches");
            }
            for profile in hits {
                println!("{}  {}  {}", profile.id, profile.display_name,
                    profile.email.as_deref().unwrap_or("-"));
            }
        }
        Command::Open { me, other } => {
            let key = engine
                .coordinator
                .open_conversation(&ParticipantId::new(me), &ParticipantId::new(other))
                .await?;
            println!("{}", key);
        }
        Command::Send { key, from, text, client_id } => {
            let key = ConversationKey::parse(&key)?;
            let client_id = client_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let receipt = engine
                .coordinator
                .send(&key, &ParticipantId::new(from), &client_id, &text)
                .await?;

            let status = match (receipt.duplicate, receipt.delivery) {
                (true, _) => "duplicate",
                (false, chatter_core::DeliveryState::Delivered) => "delivered",
                (false, chatter_core::DeliveryState::DeliveryDelayed) => "delivery delayed",
            };
            println!("{} {} ({})", receipt.message.cursor(), receipt.message.text, status);
        }
        Command::History { key, since } => {
            let key = ConversationKey::parse(&key)?;
            let since = parse_cursor(&since)?;

            let mut sub = engine.coordinator.subscribe_messages(&key, since).await?;
            for message in sub.take_snapshot() {
                println!("{}  {}: {}", message.cursor(), message.sender_id, message.text);
            }
        }
        Command::List { owner } => {
            let sub = engine
                .coordinator
                .subscribe_mirrors(&ParticipantId::new(owner))
                .await?;
            if sub.snapshot().is_empty() {
                println!("no conversations");
            }
            for entry in sub.snapshot() {
                let name = if entry.other_display_name.is_empty() {
                    entry.other_id.as_str()
                } else {
                    entry.other_display_name.as_str()
                };
                println!("{}  {}  {}", entry.updated_at, name, entry.last_message_text);
            }
        }
        Command::Watch { key } => {
            let key = ConversationKey::parse(&key)?;
            let shutdown = Arc::new(ShutdownCoordinator::new());
            install_signal_handlers(shutdown.clone());
            let mut shutdown_rx = shutdown.subscribe();

            let mut sub = engine.coordinator.subscribe_messages(&key, Cursor::ZERO).await?;
            for message in sub.take_snapshot() {
                println!("{}  {}: {}", message.cursor(), message.sender_id, message.text);
            }

            info!(key = %key, "Watching; Ctrl+C to stop");
            loop {
                tokio::select! {
                    next = sub.next() => match next {
                        Ok(message) => {
                            println!("{}  {}: {}", message.cursor(), message.sender_id, message.text);
                        }
                        Err(e) => bail!("subscription ended: {}", e),
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
        Command::WatchMirrors { owner } => {
            let owner = ParticipantId::new(owner);
            let shutdown = Arc::new(ShutdownCoordinator::new());
            install_signal_handlers(shutdown.clone());
            let mut shutdown_rx = shutdown.subscribe();

            let mut sub = engine.coordinator.subscribe_mirrors(&owner).await?;
            for entry in sub.take_snapshot() {
                println!("{}  {}  {}", entry.updated_at, entry.other_id, entry.last_message_text);
            }

            info!(owner = %owner, "Watching list; Ctrl+C to stop");
            loop {
                tokio::select! {
                    next = sub.next() => match next {
                        Ok(entry) => {
                            println!("{}  {}  {}", entry.updated_at, entry.other_id, entry.last_message_text);
                        }
                        Err(e) => bail!("subscription ended: {}", e),
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
        Command::Reconcile => {
            let stats = engine.reconciler.run_once().await?;
            println!(
                "scanned {} conversations, repaired {} mirrors, {} failures",
                stats.conversations_scanned, stats.mirrors_repaired, stats.failures
            );
        }
    }

    Ok(())
}
