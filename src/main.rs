//! # Gazette Harvest CLI (`gazette`)
//!
//! ## Usage
//!
//! ```bash
//! gazette --config ./config/gazette.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gazette init` | Create the SQLite database and schema |
//! | `gazette serve` | Start the Query Service |
//! | `gazette run` | Harvest the previous month (or `--year`/`--month`) |
//! | `gazette list` | List stored gazettes through the Query Service |
//!
//! ## Examples
//!
//! ```bash
//! # Scheduled monthly job
//! gazette run --config ./config/gazette.toml
//!
//! # Backfill a specific month
//! gazette run --year 2025 --month 6
//!
//! # What was stored for August 2025?
//! gazette list --year 2025 --month 8
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gazette_harvest::api_client::HttpGazetteApi;
use gazette_harvest::period::YearMonth;
use gazette_harvest::traits::GazetteApi;
use gazette_harvest::{config, logging, migrate, pipeline, server};

/// Gazette Harvest: fetch last month's municipal gazettes, publish them,
/// and keep a queryable index of their public URLs.
#[derive(Parser)]
#[command(
    name = "gazette",
    about = "Harvest municipal gazettes into a queryable index of public URLs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// `GAZETTE_*` environment variables override individual keys.
    #[arg(long, global = true, default_value = "./config/gazette.toml")]
    config: PathBuf,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the Query Service HTTP API on `[server].bind`.
    Serve,

    /// Run the harvest pipeline once.
    ///
    /// Targets the month before today unless both `--year` and `--month`
    /// are given.
    Run {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },

    /// List stored gazettes, optionally for one month.
    List {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env is the normal case outside containers.
    let _ = dotenvy::dotenv();
    logging::init(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Run { year, month } => {
            let period = YearMonth::from_parts(year, month)?;
            pipeline::run_harvest(&cfg, period).await?;
        }
        Commands::List { year, month } => {
            let filter = YearMonth::from_parts(year, month)?;
            let api = HttpGazetteApi::from_config(&cfg.pipeline)?;
            let records = api
                .list(filter)
                .await
                .context("querying the gazette service")?;
            for r in &records {
                println!("{}\t{}\t{}", r.id, r.publication_date, r.public_url);
            }
            println!("{} gazette(s)", records.len());
        }
    }

    Ok(())
}
