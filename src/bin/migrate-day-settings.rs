//! Convert `weekly_day_settings.enabled_days` into `enabled_categories`.
//!
//! This tool:
//! 1. Adds the `enabled_categories` column if missing (nullable, no default)
//! 2. Converts every row; an absent legacy day counts as enabled
//! 3. Writes the batch (embedded: one transaction; relational: backup table,
//!    then row by row)
//! 4. Re-reads and verifies the stored rows
//!
//! Usage:
//!   migrate-day-settings [--backend embedded|relational] [--dry-run] [--verify-only]
//!                        [--sample N] [--drop-legacy-column] [--restore-backup TABLE]
//!
//! Exit codes: 0 success, 1 backend error, 2 verification failures.
//!
//! Environment variables:
//!   MIGRATION_BACKEND      - embedded (default) or relational
//!   DATABASE_URL           - PostgreSQL connection string
//!   EMBEDDED_DATABASE_URL  - SQLite connection string
//!   MIGRATION_SAMPLE_SIZE  - verify only the first N rows
//!   MIGRATION_METRICS_FILE - write Prometheus textfile metrics here

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mealplan_api::config::Config;
use mealplan_api::db::{self, Backend};
use mealplan_api::services::metrics;
use mealplan_api::services::migration::{self, MigrationOptions, EXIT_BACKEND_ERROR, EXIT_OK};

#[derive(Parser)]
#[command(
    name = "migrate-day-settings",
    about = "Migrate weekly day settings from enabled_days to enabled_categories"
)]
struct Args {
    /// Storage backend (defaults to MIGRATION_BACKEND, then embedded)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Connection string, overriding the environment
    #[arg(long)]
    database_url: Option<String>,

    /// Read and convert, but write nothing
    #[arg(long, conflicts_with = "verify_only")]
    dry_run: bool,

    /// Only run the verification pass
    #[arg(long)]
    verify_only: bool,

    /// Verify only the first N records
    #[arg(long)]
    sample: Option<usize>,

    /// After a clean verification of every record, drop the legacy enabled_days column
    #[arg(long, conflicts_with = "dry_run")]
    drop_legacy_column: bool,

    /// Restore enabled_categories from a backup table and exit
    #[arg(long, value_name = "TABLE", conflicts_with_all = ["dry_run", "verify_only", "drop_legacy_column"])]
    restore_backup: Option<String>,

    /// Write Prometheus metrics to this file when done
    #[arg(long)]
    metrics_file: Option<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Migration aborted: {e:#}");
            eprintln!("\n=== Migration aborted ===\n{e:#}");
            EXIT_BACKEND_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let config = Config::from_env()?;
    let backend = args.backend.unwrap_or(config.backend);
    let database_url = match args.database_url {
        Some(url) => url,
        None => config.url_for(backend)?,
    };

    let store = db::connect(backend, &database_url)
        .await
        .with_context(|| format!("Failed to connect to {backend} database"))?;

    if let Some(table) = args.restore_backup {
        let restored = migration::restore(store.as_ref(), &table).await?;
        println!("Restored {restored} row(s) from {table}");
        return Ok(EXIT_OK);
    }

    let options = MigrationOptions {
        dry_run: args.dry_run,
        verify_only: args.verify_only,
        sample: args.sample.or(config.sample_size),
        drop_legacy_column: args.drop_legacy_column,
    };

    let summary = migration::run(store.as_ref(), &options).await?;
    println!("\n{summary}");

    if let Some(path) = args.metrics_file.or(config.metrics_file) {
        metrics::write_textfile(Path::new(&path))
            .with_context(|| format!("Failed to write metrics to {path}"))?;
    }

    Ok(summary.exit_code())
}
