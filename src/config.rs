use std::env;

use crate::db::Backend;

/// Environment-driven settings for the migration tool. CLI flags override these.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    /// PostgreSQL connection string (relational backend).
    pub database_url: Option<String>,
    /// SQLite connection string (embedded backend).
    pub embedded_database_url: String,
    pub sample_size: Option<usize>,
    pub metrics_file: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            backend: env::var("MIGRATION_BACKEND")
                .unwrap_or_else(|_| "embedded".into())
                .parse()?,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            embedded_database_url: env::var("EMBEDDED_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/mealplan.db".into()),
            sample_size: match env::var("MIGRATION_SAMPLE_SIZE") {
                Ok(v) if !v.is_empty() => Some(v.parse()?),
                _ => None,
            },
            metrics_file: env::var("MIGRATION_METRICS_FILE").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Connection string for `backend`.
    pub fn url_for(&self, backend: Backend) -> anyhow::Result<String> {
        match backend {
            Backend::Embedded => Ok(self.embedded_database_url.clone()),
            Backend::Relational => self
                .database_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Missing required env var: DATABASE_URL")),
        }
    }
}
