//! # Baobab Reader CLI (`baobab`)
//!
//! Manages a local ebook catalog that syncs to a server of record, and runs
//! that server.
//!
//! ## Usage
//!
//! ```bash
//! baobab --config ./config/baobab.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `baobab init` | Create both SQLite databases and their schemas |
//! | `baobab serve` | Start the HTTP server of record |
//! | `baobab upload <file>` | Extract a PDF's metadata, add it locally, and sync it |
//! | `baobab add --filename <name>` | Add a record by hand |
//! | `baobab edit <id>` | Change a record (resets it to `pending`) |
//! | `baobab delete <id>` | Remove the local copy of a record |
//! | `baobab show <id>` | Print one record |
//! | `baobab list` | Print the catalog and sync anything pending |
//! | `baobab sync [<id>]` | Sync one record, or every pending/error record |
//! | `baobab remote list` | Print the server's records |
//!
//! ## Examples
//!
//! ```bash
//! baobab init
//! baobab upload ~/Downloads/report.pdf
//! baobab edit 0b7c... --title "Quarterly Report" --offline
//! baobab list
//! baobab serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use baobab_reader::catalog::{EbookEdit, NewEbook};
use baobab_reader::{commands, config, server};

/// Baobab Reader: a PDF ebook catalog with a local-first cache that syncs
/// to a server of record.
#[derive(Parser)]
#[command(
    name = "baobab",
    about = "Baobab Reader: PDF ebook catalog with an offline-first local cache",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/baobab.toml")]
    config: PathBuf,

    /// Treat the server as unreachable; syncs are deferred and records stay
    /// `pending`.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both database schemas. Safe to run repeatedly.
    Init,

    /// Start the HTTP server of record on `[server].bind`.
    Serve,

    /// Extract metadata from a PDF, add it to the catalog, and sync it.
    Upload {
        /// Path to the PDF.
        file: PathBuf,
    },

    /// Add a record by hand.
    Add {
        #[arg(long)]
        filename: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Comma-separated tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Edit a record. Only the given fields change; an empty value clears
    /// title or author.
    Edit {
        id: String,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Comma-separated tags, replacing the current ones.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Delete the local copy of a record.
    Delete { id: String },

    /// Print one record.
    Show { id: String },

    /// Print the catalog, then sync every pending (and errored) record.
    List {
        /// Only show records with this tag.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Sync one record, or every record that needs it.
    Sync { id: Option<String> },

    /// Inspect the server of record.
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// List the server's records, newest first.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr so stdout stays parseable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "baobab_reader=info,baobab_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let offline = cli.offline;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Upload { file } => {
            commands::run_upload(&cfg, offline, &file).await?;
        }
        Commands::Add {
            filename,
            title,
            author,
            tags,
        } => {
            let new = NewEbook {
                filename,
                title,
                author,
                tags,
                metadata: None,
            };
            commands::run_add(&cfg, offline, new).await?;
        }
        Commands::Edit {
            id,
            filename,
            title,
            author,
            tags,
        } => {
            let edit = EbookEdit {
                filename,
                title,
                author,
                tags: tags.map(|t| t.split(',').map(str::to_string).collect()),
            };
            commands::run_edit(&cfg, offline, &id, edit).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(&cfg, offline, &id).await?;
        }
        Commands::Show { id } => {
            commands::run_show(&cfg, offline, &id).await?;
        }
        Commands::List { tag } => {
            commands::run_list(&cfg, offline, tag.as_deref()).await?;
        }
        Commands::Sync { id } => {
            commands::run_sync(&cfg, offline, id.as_deref()).await?;
        }
        Commands::Remote { action } => match action {
            RemoteAction::List => {
                commands::run_remote_list(&cfg).await?;
            }
        },
    }

    Ok(())
}
