use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::store::{
    select_list, validate_backup_name, BatchWrite, SettingsStore, StoreError, SETTINGS_TABLE,
};
use crate::db::Backend;
use crate::models::day_settings::{EnabledCategories, WeeklySettingsRecord};
use crate::services::conversion::ConvertedRecord;

/// Embedded (development) backend. Batches are written in a single transaction.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    fn backend(&self) -> Backend {
        Backend::Embedded
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
        )
        .bind(SETTINGS_TABLE)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn columns(&self) -> Result<Vec<String>, StoreError> {
        let cols = sqlx::query_scalar::<_, String>(&format!(
            "SELECT name FROM pragma_table_info('{SETTINGS_TABLE}')"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(cols)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let default = EnabledCategories::default().to_json();
        sqlx::raw_sql(&format!(
            r#"CREATE TABLE IF NOT EXISTS {SETTINGS_TABLE} (
                id                 TEXT PRIMARY KEY,
                week_start_date    TEXT UNIQUE NOT NULL,
                enabled_days       TEXT,
                enabled_categories TEXT NOT NULL DEFAULT '{default}',
                last_updated_by    TEXT,
                created_at         TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at         TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_categories_column(&self) -> Result<bool, StoreError> {
        if !self.table_exists().await? {
            return Err(StoreError::BackendUnavailable(SETTINGS_TABLE));
        }
        if self.columns().await?.iter().any(|c| c == "enabled_categories") {
            return Ok(false);
        }
        sqlx::raw_sql(&format!(
            "ALTER TABLE {SETTINGS_TABLE} ADD COLUMN enabled_categories TEXT"
        ))
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    async fn read_records(&self) -> Result<Vec<WeeklySettingsRecord>, StoreError> {
        if !self.table_exists().await? {
            return Err(StoreError::BackendUnavailable(SETTINGS_TABLE));
        }
        let columns = self.columns().await?;
        let select = select_list(&columns, |c| format!("CAST({c} AS TEXT)"));
        let rows = sqlx::query_as::<_, WeeklySettingsRecord>(&format!(
            "SELECT {select} FROM {SETTINGS_TABLE} ORDER BY week_start_date"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_by_week(
        &self,
        week_start_date: &str,
    ) -> Result<Option<WeeklySettingsRecord>, StoreError> {
        let columns = self.columns().await?;
        let select = select_list(&columns, |c| format!("CAST({c} AS TEXT)"));
        let row = sqlx::query_as::<_, WeeklySettingsRecord>(&format!(
            "SELECT {select} FROM {SETTINGS_TABLE} WHERE substr(week_start_date, 1, 10) = ?"
        ))
        .bind(week_start_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert(&self, record: &WeeklySettingsRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"INSERT INTO {SETTINGS_TABLE} (id, week_start_date, enabled_categories, last_updated_by)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (week_start_date) DO UPDATE SET
                   enabled_categories = excluded.enabled_categories,
                   last_updated_by    = excluded.last_updated_by,
                   updated_at         = CURRENT_TIMESTAMP"#
        ))
        .bind(&record.id)
        .bind(&record.week_start_date)
        .bind(&record.enabled_categories)
        .bind(&record.last_updated_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_batch(&self, records: &[ConvertedRecord]) -> Result<BatchWrite, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(records.len());

        for record in records {
            let res = sqlx::query(&format!(
                "UPDATE {SETTINGS_TABLE}
                 SET enabled_categories = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE CAST(id AS TEXT) = ?"
            ))
            .bind(record.enabled_categories.to_json())
            .bind(&record.id)
            .execute(&mut *tx)
            .await;

            if let Err(source) = res {
                tx.rollback().await?;
                return Err(StoreError::Write {
                    key: record.week_start_date.clone(),
                    source,
                });
            }
            written.push(record.week_start_date.clone());
        }

        tx.commit().await?;
        Ok(BatchWrite {
            written,
            failed: Vec::new(),
            backup_table: None,
        })
    }

    async fn restore_backup(&self, backup_table: &str) -> Result<u64, StoreError> {
        validate_backup_name(backup_table)?;
        let res = sqlx::query(&format!(
            "UPDATE {SETTINGS_TABLE}
             SET enabled_categories = b.enabled_categories
             FROM {backup_table} AS b
             WHERE {SETTINGS_TABLE}.id = b.id"
        ))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn drop_legacy_column(&self) -> Result<bool, StoreError> {
        if !self.columns().await?.iter().any(|c| c == "enabled_days") {
            return Ok(false);
        }
        sqlx::raw_sql(&format!("ALTER TABLE {SETTINGS_TABLE} DROP COLUMN enabled_days"))
            .execute(&self.pool)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_sqlite_pool;

    async fn legacy_store() -> SqliteSettingsStore {
        let pool = create_memory_sqlite_pool().await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE weekly_day_settings (
                id TEXT PRIMARY KEY,
                week_start_date TEXT UNIQUE NOT NULL,
                enabled_days TEXT,
                last_updated_by TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO weekly_day_settings (id, week_start_date, enabled_days)
            VALUES ('a', '2024-03-04', '{\"friday\":false}');",
        )
        .execute(&pool)
        .await
        .unwrap();
        SqliteSettingsStore::new(pool)
    }

    #[tokio::test]
    async fn missing_table_is_backend_unavailable() {
        let store = SqliteSettingsStore::new(create_memory_sqlite_pool().await.unwrap());
        assert!(!store.table_exists().await.unwrap());
        assert!(matches!(
            store.read_records().await,
            Err(StoreError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn reads_legacy_rows_before_column_exists() {
        let store = legacy_store().await;
        let rows = store.read_records().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].enabled_days.as_deref(), Some(r#"{"friday":false}"#));
        assert_eq!(rows[0].enabled_categories, None);
    }

    #[tokio::test]
    async fn ensure_column_is_idempotent() {
        let store = legacy_store().await;
        assert!(store.ensure_categories_column().await.unwrap());
        assert!(!store.ensure_categories_column().await.unwrap());

        // Added without a default: legacy rows stay recognisably unconverted.
        let rows = store.read_records().await.unwrap();
        assert_eq!(rows[0].enabled_categories, None);
    }

    #[tokio::test]
    async fn drop_legacy_column_only_once() {
        let store = legacy_store().await;
        assert!(store.drop_legacy_column().await.unwrap());
        assert!(!store.drop_legacy_column().await.unwrap());
        let rows = store.read_records().await.unwrap();
        assert_eq!(rows[0].enabled_days, None);
    }

    #[tokio::test]
    async fn upsert_then_find_by_week() {
        let store = SqliteSettingsStore::new(create_memory_sqlite_pool().await.unwrap());
        store.ensure_schema().await.unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut record = WeeklySettingsRecord::new_default(date);
        store.upsert(&record).await.unwrap();

        record.last_updated_by = Some("user-1".into());
        record.id = "ignored-on-conflict".into();
        store.upsert(&record).await.unwrap();

        let found = store.find_by_week("2024-03-04").await.unwrap().unwrap();
        assert_eq!(found.last_updated_by.as_deref(), Some("user-1"));
        assert_ne!(found.id, "ignored-on-conflict");
        assert!(store.find_by_week("2024-03-11").await.unwrap().is_none());
    }
}
