//! # PB Catalog CLI (`pbcat`)
//!
//! The `pbcat` binary is the primary interface for the PB dataset catalog.
//! It provides commands for database initialization, single-file ingestion
//! with versioning, batch refresh of the canonical store, soft-deletion,
//! and read-side catalog views.
//!
//! ## Usage
//!
//! ```bash
//! pbcat --config ./config/pbcat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pbcat init` | Create the SQLite database and run schema migrations |
//! | `pbcat ingest <path>` | Ingest one `.pb` file (two-phase confirm on conflict) |
//! | `pbcat replace <name> <path>` | Replace a current file's content, keeping its name |
//! | `pbcat delete <identity>` | Soft-delete the current versions of an identity |
//! | `pbcat refresh` | Batch-sweep the canonical store, JSON summary |
//! | `pbcat check <path>` | Parse and derive a file without persisting |
//! | `pbcat list` | Show the current catalog |
//! | `pbcat stats` | Aggregate statistics over current datasets |
//! | `pbcat comments` | Distinct active comments with file counts |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! pbcat init --config ./config/pbcat.toml
//!
//! # Validate a file before ingesting it
//! pbcat check ./incoming/Poland_Warszawa_2024.pb
//!
//! # Ingest; if the identity already has a current version this reports a
//! # conflict and changes nothing
//! pbcat ingest ./incoming/Poland_Warszawa_2024.pb
//!
//! # Archive the old version and supersede it
//! pbcat ingest ./incoming/Poland_Warszawa_2024.pb --confirm
//!
//! # Re-ingest everything modified since the last run
//! pbcat refresh
//! ```

mod check;
mod comments;
mod config;
mod db;
mod format;
mod identity;
mod ingest;
mod migrate;
mod models;
mod parser;
mod refresh;
mod signal;
mod stats;
mod store;
mod tile;
mod tiles;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// PB Catalog CLI — a versioned ingestion pipeline and catalog for
/// participatory-budgeting datasets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with `[db]` and `[store]` sections.
#[derive(Parser)]
#[command(
    name = "pbcat",
    about = "PB Catalog — a versioned ingestion pipeline and catalog for participatory-budgeting datasets",
    version,
    long_about = "pbcat parses semicolon-delimited PB files into derived catalog tiles and \
    maintains one current version per dataset identity, archiving superseded files and \
    signalling read-side caches through a refresh signature."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pbcat.toml`. Database, store, and quality
    /// settings are read from this file.
    #[arg(long, global = true, default_value = "./config/pbcat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (pb_files,
    /// pb_comments, pb_categories, pb_targets, refresh_state). This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Ingest a single `.pb` file into the catalog.
    ///
    /// Parses and derives the file, then moves it into the canonical store
    /// and records it as the current version of its identity. If a current
    /// version already exists, the ingestion halts and reports the conflict;
    /// re-run with `--confirm` to archive the old version and supersede it.
    Ingest {
        /// Path to the `.pb` file to ingest.
        path: PathBuf,

        /// Confirm superseding an existing current version.
        #[arg(long)]
        confirm: bool,
    },

    /// Replace a current file's content while keeping its file name.
    ///
    /// Archives the existing file under a `replaced_` stamp and ingests the
    /// new content as a superseding version with the original name.
    Replace {
        /// File name of the current version to replace (e.g.
        /// `Poland_Warszawa_2024.pb`).
        file_name: String,

        /// Path to the file holding the new content.
        path: PathBuf,
    },

    /// Soft-delete the current versions of a dataset identity.
    ///
    /// Flips `is_current` off, deactivates child rows, and archives the
    /// files best-effort. History is preserved; nothing is hard-deleted.
    Delete {
        /// The identity's webpage name (e.g. `Poland_Warszawa_2024`).
        webpage_name: String,
    },

    /// Batch-refresh the catalog from the canonical store.
    ///
    /// Scans the store directory, ingests files modified since the last
    /// run, repairs the one-current-version invariant per identity, and
    /// deactivates records whose files disappeared. Prints per-file
    /// progress and a final JSON summary. Failures are isolated per file.
    Refresh {
        /// Process all files, ignoring the last refresh time.
        #[arg(long)]
        full: bool,
    },

    /// Parse and derive a `.pb` file without persisting anything.
    ///
    /// Prints the derived summary, or the structural parse error verbatim.
    Check {
        /// Path to the `.pb` file to check.
        path: PathBuf,
    },

    /// Show the current catalog, one line per dataset.
    List,

    /// Aggregate statistics over current datasets.
    Stats,

    /// Distinct active comments with the files carrying them.
    Comments,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `check` works without a database or a config file.
    if let Commands::Check { path } = &cli.command {
        let weights = config::load_config(&cli.config)
            .map(|c| c.quality_weights())
            .unwrap_or_default();
        check::run_check(path, &weights)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, confirm } => {
            ingest::run_ingest(&cfg, &path, confirm).await?;
        }
        Commands::Replace { file_name, path } => {
            ingest::run_replace(&cfg, &file_name, &path).await?;
        }
        Commands::Delete { webpage_name } => {
            ingest::run_delete(&cfg, &webpage_name).await?;
        }
        Commands::Refresh { full } => {
            let summary = refresh::run_refresh(&cfg, full).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Check { .. } => unreachable!(),
        Commands::List => {
            tiles::run_list(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Comments => {
            stats::run_comments(&cfg).await?;
        }
    }

    Ok(())
}
