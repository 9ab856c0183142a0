//! # Repair Intake CLI (`repair-intake`)
//!
//! Runs the webhook server that reconciles Trello repair cards and inbound
//! SES email replies into repair records, plus a few inspection commands.
//!
//! ## Usage
//!
//! ```bash
//! repair-intake --config ./config/repair-intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repair-intake init` | Create the SQLite database and run schema migrations |
//! | `repair-intake serve` | Start the webhook HTTP server |
//! | `repair-intake parse card "<name>"` | Show what a card title parses to |
//! | `repair-intake parse email <path>` | Show sender and reply text of a raw email |
//! | `repair-intake repair <id>` | Print a stored repair as JSON |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! repair-intake init --config ./config/repair-intake.toml
//!
//! # Check a card title before renaming cards on the board
//! repair-intake parse card "Repair #61 : David Knoernschild"
//!
//! # Start the server with debug logging
//! RUST_LOG=repair_intake=debug repair-intake serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repair_intake::card_text::{normalize_card_name, parse_repair_details, parse_repair_number};
use repair_intake::{config, email, get, migrate, server};

/// Repair Intake: reconciles repair-intake cards and inbound email replies
/// into repair records.
///
/// Commands that touch the database or the network read a TOML config
/// file. See `config/repair-intake.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "repair-intake",
    about = "Reconciles Trello repair cards and inbound email replies into repair records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/repair-intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// again is safe.
    Init,

    /// Start the webhook HTTP server.
    Serve,

    /// Run the text extractors on local input. Needs no config.
    Parse {
        #[command(subcommand)]
        target: ParseTarget,
    },

    /// Print one stored repair, its messages, and its attachments as JSON.
    Repair {
        /// Internal repair id (the `<id>` in `repairs+<id>@`).
        id: String,
    },
}

#[derive(Subcommand)]
enum ParseTarget {
    /// Parse a card title.
    Card {
        /// Card title, e.g. "Repair #61 : David Knoernschild".
        name: String,
    },
    /// Parse a raw RFC 822 email file.
    Email {
        /// Path to the `.eml` file.
        path: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Parse { target } = &cli.command {
        match target {
            ParseTarget::Card { name } => {
                let normalized = normalize_card_name(name);
                let output = json!({
                    "repair_number": parse_repair_number(&normalized),
                    "details": parse_repair_details(&normalized),
                    "normalized": normalized,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            ParseTarget::Email { path } => {
                let raw = std::fs::read(path)
                    .with_context(|| format!("Failed to read email file: {}", path.display()))?;
                let parsed = email::parse_email(&raw)?;
                let subject = parsed.subject.clone();
                let message = parsed.into_inbound_message();
                let output = json!({
                    "from": message.from,
                    "subject": subject,
                    "message": message.message,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Repair { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Parse { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}
