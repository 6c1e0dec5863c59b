//! # Newsdesk CLI (`nd`)
//!
//! ## Usage
//!
//! ```bash
//! nd --config ./config/newsdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nd init` | Create the SQLite database and run schema migrations |
//! | `nd ingest <file>` | Ingest a JSON batch of articles |
//! | `nd query "<text>"` | Rank stories for a free-text question |
//! | `nd get <id>` | Print a consolidated story |
//! | `nd stock <symbol>` | Stories affecting one ticker |
//! | `nd entities` | Extracted entities grouped by category |
//! | `nd stats` | Row counts and impact breakdown |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use newsdesk::{config, entities, get, ingest, logging, migrate, query, stats, stock};

/// Newsdesk: deduplicated financial news with stock impact mapping.
#[derive(Parser)]
#[command(
    name = "nd",
    about = "Newsdesk — deduplicated financial news with stock impact mapping",
    version,
    long_about = "Newsdesk folds near-duplicate articles into consolidated stories, \
    extracts companies, sectors and regulators, maps them to affected stock symbols, \
    and answers queries that expand from a company to its sector."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/newsdesk.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest a JSON array of articles as one batch.
    ///
    /// Near-duplicates within the file are folded into one story. Articles
    /// already ingested in an earlier batch are rejected and keep their
    /// existing story.
    Ingest {
        /// Path to the JSON file.
        file: PathBuf,

        /// Validate the file without calling the model or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Rank stories for a free-text query.
    Query {
        /// The query string, e.g. "HDFC Bank news".
        text: String,

        /// Maximum number of stories to return.
        #[arg(long)]
        limit: Option<i64>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a story with its members, entities and impacts.
    Get {
        /// Story id, e.g. `story-a1`.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// List stories affecting one stock.
    Stock {
        /// Ticker, company name or alias, e.g. `HDFCBANK` or "HDFC Bank".
        symbol: String,

        #[arg(long)]
        json: bool,
    },

    /// List every extracted entity, grouped by category.
    Entities {
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, dry_run } => {
            ingest::run_ingest(&cfg, &file, dry_run).await?;
        }
        Commands::Query { text, limit, json } => {
            query::run_query(&cfg, &text, limit, json).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Stock { symbol, json } => {
            stock::run_stock(&cfg, &symbol, json).await?;
        }
        Commands::Entities { json } => {
            entities::run_entities(&cfg, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
    }

    Ok(())
}
