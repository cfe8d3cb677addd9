use async_trait::async_trait;
use thiserror::Error;

use crate::db::Backend;
use crate::models::day_settings::WeeklySettingsRecord;
use crate::services::conversion::ConvertedRecord;

pub const SETTINGS_TABLE: &str = "weekly_day_settings";
pub const BACKUP_PREFIX: &str = "weekly_day_settings_backup_";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The settings table is missing (fresh install). Callers treat this as
    /// "nothing to migrate".
    #[error("backend unavailable: table {0} does not exist")]
    BackendUnavailable(&'static str),
    #[error("write failed for week {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("invalid backup table name: {0}")]
    InvalidBackupName(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of persisting one batch of converted records.
#[derive(Debug, Default, Clone)]
pub struct BatchWrite {
    pub written: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub backup_table: Option<String>,
}

/// Read/write/transaction capabilities shared by both storage backends.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    fn backend(&self) -> Backend;

    async fn table_exists(&self) -> Result<bool, StoreError>;

    /// Column names currently present on the settings table.
    async fn columns(&self) -> Result<Vec<String>, StoreError>;

    /// Create the table in its post-migration shape if it does not exist.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Add a nullable `enabled_categories` column when missing.
    /// Returns `true` when the column was added.
    async fn ensure_categories_column(&self) -> Result<bool, StoreError>;

    async fn read_records(&self) -> Result<Vec<WeeklySettingsRecord>, StoreError>;

    async fn find_by_week(
        &self,
        week_start_date: &str,
    ) -> Result<Option<WeeklySettingsRecord>, StoreError>;

    /// Insert or update the categories of one week, keyed by `week_start_date`.
    async fn upsert(&self, record: &WeeklySettingsRecord) -> Result<(), StoreError>;

    async fn write_batch(&self, records: &[ConvertedRecord]) -> Result<BatchWrite, StoreError>;

    /// Copy `enabled_categories` back from a backup table. Returns rows restored.
    async fn restore_backup(&self, backup_table: &str) -> Result<u64, StoreError>;

    async fn drop_legacy_column(&self) -> Result<bool, StoreError>;
}

/// Backup tables are interpolated into SQL, so only accept names we generate.
pub fn validate_backup_name(name: &str) -> Result<(), StoreError> {
    let suffix = name
        .strip_prefix(BACKUP_PREFIX)
        .ok_or_else(|| StoreError::InvalidBackupName(name.to_string()))?;
    // Second-resolution names predate the millisecond suffix.
    if matches!(suffix.len(), 14 | 17) && suffix.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(StoreError::InvalidBackupName(name.to_string()))
    }
}

/// Millisecond resolution, so back-to-back runs get distinct tables.
pub fn backup_table_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("{BACKUP_PREFIX}{}", now.format("%Y%m%d%H%M%S%3f"))
}

/// SELECT list shared by both backends; missing columns read as NULL.
pub(crate) fn select_list(columns: &[String], cast: impl Fn(&str) -> String) -> String {
    let col = |name: &str| {
        if columns.iter().any(|c| c == name) {
            format!("{} AS {name}", cast(name))
        } else {
            format!("{} AS {name}", cast("NULL"))
        }
    };
    [
        col("id"),
        col("week_start_date"),
        col("enabled_days"),
        col("enabled_categories"),
        col("last_updated_by"),
    ]
    .join(", ")
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backup_names_are_validated() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 4, 12, 30, 5).unwrap();
        let name = backup_table_name(now);
        assert_eq!(name, "weekly_day_settings_backup_20240304123005000");
        assert!(validate_backup_name(&name).is_ok());
        assert!(validate_backup_name("weekly_day_settings_backup_20240304123005").is_ok());
        assert!(validate_backup_name("weekly_day_settings_backup_202403041230050").is_err());
        assert!(validate_backup_name("weekly_day_settings_backup_1; DROP TABLE x").is_err());
        assert!(validate_backup_name("users").is_err());
    }

    #[test]
    fn runs_within_one_second_get_distinct_backups() {
        let first = chrono::Utc.with_ymd_and_hms(2024, 3, 4, 12, 30, 5).unwrap();
        let second = first + chrono::Duration::milliseconds(250);
        assert_ne!(backup_table_name(first), backup_table_name(second));
        assert!(validate_backup_name(&backup_table_name(second)).is_ok());
    }

    #[test]
    fn select_list_substitutes_missing_columns() {
        let columns = vec!["id".to_string(), "week_start_date".to_string()];
        let sql = select_list(&columns, |c| format!("CAST({c} AS TEXT)"));
        assert!(sql.contains("CAST(id AS TEXT) AS id"));
        assert!(sql.contains("CAST(NULL AS TEXT) AS enabled_categories"));
    }
}
