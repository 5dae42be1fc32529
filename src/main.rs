//! # Proposal Index CLI (`pidx`)
//!
//! ## Usage
//!
//! ```bash
//! pidx --config ./config/pidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pidx init` | Create the source/index directories and the index database |
//! | `pidx ingest` | Load, chunk, embed and index the source directory |
//! | `pidx query "<text>"` | Show the passages most similar to a query |
//! | `pidx stats` | Summarize a collection |
//!
//! Logs go to stderr (`--log-level`, `--log-format`); reports go to stdout.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use proposal_index::config;
use proposal_index::ingest;
use proposal_index::logging::{self, LogFormat};
use proposal_index::progress::ProgressMode;
use proposal_index::query;
use proposal_index::stats;
use proposal_index::store::SqliteStore;

/// Proposal Index: build a queryable vector index from a directory of documents.
#[derive(Parser)]
#[command(name = "pidx", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pidx.toml")]
    config: PathBuf,

    /// Log filter (e.g. `info`, `debug`, `proposal_index=trace`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Human)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the source and index directories and the index database.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest the source directory into a collection.
    ///
    /// Unchanged passages are not re-embedded; passages of changed files
    /// are replaced. Ctrl-C stops after in-flight work and prints a
    /// partial report.
    Ingest {
        /// Source directory (defaults to `paths.source_dir`).
        #[arg(long)]
        source: Option<PathBuf>,

        /// Collection name (defaults to `paths.collection_name`).
        #[arg(long)]
        collection: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to `human` on a TTY, otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show the passages most similar to a query.
    Query {
        /// Query text.
        text: String,

        /// Number of passages to return.
        #[arg(long, short, default_value = "5")]
        k: usize,

        #[arg(long)]
        collection: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Summarize a collection: dimension, model, passages per source.
    Stats {
        #[arg(long)]
        collection: Option<String>,

        /// Print stats as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.log_level.as_deref(), cli.log_format)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            cfg.ensure_directories()?;
            SqliteStore::open(&cfg.index_db_path()).await?;
            println!("Index initialized at {}", cfg.index_db_path().display());
        }
        Commands::Ingest {
            source,
            collection,
            json,
            progress,
        } => {
            cfg.ensure_directories()?;
            let mode = match progress {
                Some(ProgressArg::Off) => ProgressMode::Off,
                Some(ProgressArg::Human) => ProgressMode::Human,
                Some(ProgressArg::Json) => ProgressMode::Json,
                None => ProgressMode::default_for_tty(),
            };
            ingest::run_ingest(
                &cfg,
                source.as_deref(),
                collection.as_deref(),
                json,
                mode.reporter(),
            )
            .await?;
        }
        Commands::Query {
            text,
            k,
            collection,
            json,
        } => {
            query::run_query(&cfg, &text, k, collection.as_deref(), json).await?;
        }
        Commands::Stats { collection, json } => {
            stats::run_stats(&cfg, collection.as_deref(), json).await?;
        }
    }

    Ok(())
}
