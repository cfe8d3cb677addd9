pub mod postgres;
pub mod sqlite;
pub mod store;

use std::str::FromStr;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};

pub use postgres::PostgresSettingsStore;
pub use sqlite::SqliteSettingsStore;
pub use store::{SettingsStore, StoreError};

/// Which storage engine a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// File-based SQLite database used in development.
    Embedded,
    /// PostgreSQL server used in production.
    Relational,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Embedded => "embedded",
            Backend::Relational => "relational",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" | "sqlite" => Ok(Backend::Embedded),
            "relational" | "postgres" | "postgresql" => Ok(Backend::Relational),
            other => anyhow::bail!("Unknown backend '{other}' (expected embedded or relational)"),
        }
    }
}

pub async fn create_pg_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Open (and create if missing) a file-backed SQLite database.
pub async fn create_sqlite_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Single-connection in-memory database; the connection is never recycled,
/// otherwise its contents would vanish.
pub async fn create_memory_sqlite_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Connect to the selected backend. This is the only place the backend choice
/// is branched on; everything downstream receives a `dyn SettingsStore`.
pub async fn connect(backend: Backend, database_url: &str) -> anyhow::Result<Box<dyn SettingsStore>> {
    let store: Box<dyn SettingsStore> = match backend {
        Backend::Embedded => Box::new(SqliteSettingsStore::new(
            create_sqlite_pool(database_url).await?,
        )),
        Backend::Relational => Box::new(PostgresSettingsStore::new(
            create_pg_pool(database_url).await?,
        )),
    };
    tracing::info!("Connected to {} backend", backend);
    Ok(store)
}
