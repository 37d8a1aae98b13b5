//! # Citation Ledger CLI (`cite`)
//!
//! The `cite` binary is the operational interface for the citation engine.
//! It provides commands for database initialization, history inspection,
//! conversation resets, and starting the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! cite --config ./config/cite.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cite init` | Create the SQLite database and run schema migrations |
//! | `cite history <user> <course>` | Print the resolved history of a conversation |
//! | `cite clear <user> <course>` | Reset a conversation (counters and both store tiers) |
//! | `cite stats` | Show database statistics |
//! | `cite serve api` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! cite init --config ./config/cite.toml
//!
//! # Inspect the five most recent messages of a conversation
//! cite history alice phys-101 --limit 5
//!
//! # Reset a conversation
//! cite clear alice phys-101
//!
//! # Start the API for the agent runtime and course client
//! cite serve api
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use citation_ledger::engine::CitationEngine;
use citation_ledger::models::ConversationKey;
use citation_ledger::{config, db, migrate, server, stats};

/// Citation Ledger CLI — a conversation source-citation engine for
/// retrieval-augmented chat agents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cite.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cite",
    about = "Citation Ledger — a conversation source-citation engine for retrieval-augmented chat agents",
    version,
    long_about = "Citation Ledger assigns stable numeric identifiers to retrieval results during \
    live agent execution and reconstructs user-facing chat history by resolving those citations \
    back into source records, reading through a two-tier store with legacy-format fallback."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cite.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (messages,
    /// message_sources, source_counters). Idempotent — running it multiple
    /// times is safe.
    Init,

    /// Print the resolved history of one conversation, newest-first.
    History {
        /// User identifier.
        user_id: String,

        /// Course identifier.
        course_id: String,

        /// Maximum number of messages to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Reset a conversation: citation counters, the cached snapshot, the
    /// durable message rows, and legacy side-table rows.
    Clear {
        /// User identifier.
        user_id: String,

        /// Course identifier.
        course_id: String,
    },

    /// Show database statistics.
    ///
    /// Conversation, message, and tool-call counts plus per-conversation
    /// counter positions.
    Stats,

    /// Start the HTTP API.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the JSON API.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// history, clear, and tool-result endpoints.
    Api,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::History {
            user_id,
            course_id,
            limit,
        } => {
            let engine = CitationEngine::connect(&cfg).await?;
            let key = ConversationKey::new(user_id, course_id);
            let messages = engine.get_history(&key, limit).await;
            print_history(&messages);
        }
        Commands::Clear { user_id, course_id } => {
            let engine = CitationEngine::connect(&cfg).await?;
            let key = ConversationKey::new(user_id.clone(), course_id.clone());
            engine.clear_conversation(&key).await?;
            println!("Cleared conversation {} / {}.", user_id, course_id);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Api => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}

fn print_history(messages: &[citation_ledger::models::UserMessage]) {
    if messages.is_empty() {
        println!("No history.");
        return;
    }

    println!("--- History ({} messages, newest first) ---", messages.len());
    for message in messages {
        println!();
        println!("[{}] {} ({})", message.role, message.id, message.created_at);
        println!("{}", message.content);

        for source in &message.rag_sources {
            println!(
                "    [{}] {} p{}-{} \"{}\"",
                source.id,
                source.document_id,
                source.page_start,
                source.page_end,
                truncate(&source.text, 60)
            );
        }
        for source in &message.web_sources {
            println!(
                "    [{}] {} <{}>",
                source.id,
                truncate(&source.title, 40),
                source.url
            );
        }
        for source in &message.image_sources {
            println!(
                "    [{}] slide {} page {}",
                source.id, source.slide_id, source.page_number
            );
        }
    }
    println!();
}

fn truncate(text: &str, max_chars: usize) -> String {
    let truncated: String = text.chars().take(max_chars).collect();
    if truncated.len() < text.len() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
