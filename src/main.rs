//! # Product Recon CLI (`recon`)
//!
//! The `recon` binary is the primary interface for the reconciliation engine.
//! It provides commands for database initialization, catalog and quote
//! imports, reconciliation queries, quote matching, lookup polling, link
//! requeueing, and starting the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! recon --config ./config/recon.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recon init` | Create the SQLite database and run schema migrations |
//! | `recon import <file>` | Load manufacturers, products, offers, and quotes from JSON |
//! | `recon reconcile` | Rank matches for an identifier, part number, name, or URL |
//! | `recon match-quote <id>` | Re-match every line item of a stored quote |
//! | `recon poll <task-id>` | Check the state of an external lookup task |
//! | `recon requeue` | Re-dispatch unresolved or errored affiliate links |
//! | `recon serve` | Start the HTTP API server |
//! | `recon stats` | Print database statistics |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! recon init --config ./config/recon.toml
//!
//! # Load a supplier catalog
//! recon import fixtures/catalog.json
//!
//! # Look up a part number
//! recon reconcile --part-number CF248A
//!
//! # Look up a marketplace listing
//! recon reconcile --url "https://www.amazon.com/dp/B08N5WRWNW"
//!
//! # Match a quote, synthesizing demo products for unmatched lines
//! recon match-quote 3f2a... --demo
//!
//! # Start the API server
//! recon serve --config ./config/recon.toml
//! ```

mod cache;
mod config;
mod db;
mod extract;
mod ingest;
mod lookup;
mod matching;
mod migrate;
mod models;
mod normalize;
mod reconcile;
mod server;
mod similarity;
mod stats;
mod store;
mod worker;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Product Recon CLI — a reconciliation engine for vendor quotes and
/// marketplace listings.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recon.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recon",
    about = "Product Recon — a reconciliation engine for vendor quotes and marketplace listings",
    version,
    long_about = "Product Recon matches incoming product references (part numbers, free-text \
    descriptions, marketplace identifiers, listing URLs) against an internal supplier catalog, \
    dispatches asynchronous lookups to an external worker, and serves ranked results via a CLI \
    and an HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/recon.toml`. All database, matching, lookup,
    /// worker, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/recon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (manufacturers, products, offers, affiliate_links, quotes,
    /// quote_items, product_matches, lookup_cache). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Import a JSON document of manufacturers, products, and quotes.
    ///
    /// Products are upserted by manufacturer and part number, so re-importing
    /// the same file updates rather than duplicates. Quotes are always
    /// created fresh; their generated ids are printed for use with
    /// `match-quote`.
    Import {
        /// Path to the JSON import file.
        file: PathBuf,
    },

    /// Rank catalog matches for a product reference.
    ///
    /// Exactly one input is used, checked in order: a marketplace identifier
    /// (an ASIN takes the affiliate link path), a part number, a free-text
    /// name, or a listing URL. Results are printed in ranked order with
    /// confidence, match method, and link state.
    Reconcile {
        /// Marketplace identifier (ASIN) or bare part number.
        #[arg(long)]
        identifier: Option<String>,

        /// Manufacturer part number.
        #[arg(long)]
        part_number: Option<String>,

        /// Free-text product name or description.
        #[arg(long)]
        name: Option<String>,

        /// Marketplace listing URL.
        #[arg(long)]
        url: Option<String>,
    },

    /// Re-run matching for every line item of a stored quote.
    ///
    /// Previous matches for the quote are replaced, and matched pricing is
    /// mirrored into quote-sourced offers. With `--demo`, unmatched lines
    /// synthesize demo products so the quote always gets full coverage.
    MatchQuote {
        /// Quote id (as printed by `import`).
        quote_id: String,

        /// Synthesize demo products for lines with no catalog match.
        #[arg(long)]
        demo: bool,
    },

    /// Check the state of an external lookup task.
    ///
    /// Prints `processing`, `completed` with the result, or `not_found`.
    /// A completed result is delivered exactly once; later polls report
    /// `not_found`.
    Poll {
        /// Task correlation id (as returned by reconcile or the API).
        task_id: String,
    },

    /// Re-dispatch affiliate links whose resolution is missing or errored.
    Requeue {
        /// Only requeue links for this platform (e.g. `amazon`).
        #[arg(long)]
        platform: Option<String>,

        /// Maximum number of links to requeue.
        #[arg(long)]
        limit: Option<i64>,

        /// Show the candidate count without dispatching anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// reconciliation API and worker callback endpoints.
    Serve,

    /// Print database statistics.
    ///
    /// Shows catalog counts, link resolution states, quote volume, and
    /// match method breakdowns.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            ingest::run_import(&cfg, &file).await?;
        }
        Commands::Reconcile {
            identifier,
            part_number,
            name,
            url,
        } => {
            let request = reconcile::ReconcileRequest {
                identifier,
                part_number,
                name,
                url,
            };
            reconcile::run_reconcile(&cfg, request).await?;
        }
        Commands::MatchQuote { quote_id, demo } => {
            reconcile::run_match_quote(&cfg, &quote_id, demo).await?;
        }
        Commands::Poll { task_id } => {
            lookup::run_poll(&cfg, &task_id).await?;
        }
        Commands::Requeue {
            platform,
            limit,
            dry_run,
        } => {
            lookup::run_requeue(&cfg, platform.as_deref(), limit, dry_run).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
