use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::store::{
    backup_table_name, select_list, validate_backup_name, BatchWrite, SettingsStore, StoreError,
    SETTINGS_TABLE,
};
use crate::db::Backend;
use crate::models::day_settings::{EnabledCategories, WeeklySettingsRecord};
use crate::services::conversion::ConvertedRecord;

/// Relational (production) backend. Takes a full-table backup before a batch,
/// then updates rows one at a time so a single bad row does not sink the batch.
#[derive(Clone)]
pub struct PostgresSettingsStore {
    pool: PgPool,
}

impl PostgresSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create_backup(&self) -> Result<String, StoreError> {
        let name = backup_table_name(chrono::Utc::now());
        sqlx::raw_sql(&format!(
            r#"CREATE TABLE "{name}" AS SELECT * FROM {SETTINGS_TABLE}"#
        ))
        .execute(&self.pool)
        .await?;
        tracing::info!("Created backup table {name}");
        Ok(name)
    }
}

#[async_trait]
impl SettingsStore for PostgresSettingsStore {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn table_exists(&self) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
             )",
        )
        .bind(SETTINGS_TABLE)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn columns(&self) -> Result<Vec<String>, StoreError> {
        let cols: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::TEXT FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(SETTINGS_TABLE)
        .fetch_all(&self.pool)
        .await?;
        Ok(cols)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let default = EnabledCategories::default().to_json();
        sqlx::raw_sql(&format!(
            r#"CREATE TABLE IF NOT EXISTS {SETTINGS_TABLE} (
                id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                week_start_date    DATE UNIQUE NOT NULL,
                enabled_days       JSONB,
                enabled_categories JSONB NOT NULL DEFAULT '{default}'::jsonb,
                last_updated_by    UUID,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
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
            "ALTER TABLE {SETTINGS_TABLE} ADD COLUMN IF NOT EXISTS enabled_categories JSONB"
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
        let select = select_list(&columns, |c| format!("{c}::TEXT"));
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
        let select = select_list(&columns, |c| format!("{c}::TEXT"));
        let row = sqlx::query_as::<_, WeeklySettingsRecord>(&format!(
            "SELECT {select} FROM {SETTINGS_TABLE} WHERE week_start_date::TEXT = $1"
        ))
        .bind(week_start_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert(&self, record: &WeeklySettingsRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"INSERT INTO {SETTINGS_TABLE} (id, week_start_date, enabled_categories, last_updated_by)
               VALUES ($1::uuid, $2::date, $3::jsonb, $4::uuid)
               ON CONFLICT (week_start_date) DO UPDATE SET
                   enabled_categories = EXCLUDED.enabled_categories,
                   last_updated_by    = EXCLUDED.last_updated_by,
                   updated_at         = NOW()"#
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
        let backup = self.create_backup().await?;
        let mut report = BatchWrite {
            backup_table: Some(backup),
            ..Default::default()
        };

        for record in records {
            let res = sqlx::query(&format!(
                "UPDATE {SETTINGS_TABLE}
                 SET enabled_categories = $1::jsonb, updated_at = NOW()
                 WHERE id::TEXT = $2"
            ))
            .bind(record.enabled_categories.to_json())
            .bind(&record.id)
            .execute(&self.pool)
            .await;

            match res {
                Ok(done) if done.rows_affected() == 1 => {
                    report.written.push(record.week_start_date.clone());
                }
                Ok(_) => {
                    tracing::warn!("Week {}: row no longer present", record.week_start_date);
                    report
                        .failed
                        .push((record.week_start_date.clone(), "row not found".into()));
                }
                Err(e) => {
                    tracing::warn!("Week {}: update failed: {}", record.week_start_date, e);
                    report
                        .failed
                        .push((record.week_start_date.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn restore_backup(&self, backup_table: &str) -> Result<u64, StoreError> {
        validate_backup_name(backup_table)?;
        let res = sqlx::query(&format!(
            r#"UPDATE {SETTINGS_TABLE} AS w
               SET enabled_categories = b.enabled_categories, updated_at = NOW()
               FROM "{backup_table}" AS b
               WHERE w.id = b.id"#
        ))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn drop_legacy_column(&self) -> Result<bool, StoreError> {
        if !self.columns().await?.iter().any(|c| c == "enabled_days") {
            return Ok(false);
        }
        sqlx::raw_sql(&format!(
            "ALTER TABLE {SETTINGS_TABLE} DROP COLUMN IF EXISTS enabled_days"
        ))
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pg_pool;

    /// Requires a disposable database: `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn backup_then_restore_round_trip() {
        let url = std::env::var("TEST_DATABASE_URL").unwrap();
        let store = PostgresSettingsStore::new(create_pg_pool(&url).await.unwrap());
        sqlx::raw_sql("DROP TABLE IF EXISTS weekly_day_settings")
            .execute(&store.pool)
            .await
            .unwrap();
        store.ensure_schema().await.unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let record = WeeklySettingsRecord::new_default(date);
        store.upsert(&record).await.unwrap();

        let mut closed = EnabledCategories::default();
        closed.friday = crate::models::day_settings::DayCategories::uniform(false);
        let converted = ConvertedRecord {
            id: record.id.clone(),
            week_start_date: record.week_start_date.clone(),
            enabled_categories: closed,
            outcome: crate::services::conversion::ConversionOutcome::Converted,
        };

        let batch = store.write_batch(&[converted]).await.unwrap();
        assert_eq!(batch.written, vec!["2024-03-04".to_string()]);
        let backup = batch.backup_table.unwrap();

        let restored = store.restore_backup(&backup).await.unwrap();
        assert_eq!(restored, 1);
        let row = store.find_by_week("2024-03-04").await.unwrap().unwrap();
        let cats: EnabledCategories =
            serde_json::from_str(row.enabled_categories.as_deref().unwrap()).unwrap();
        assert_eq!(cats, EnabledCategories::default());
    }
}
