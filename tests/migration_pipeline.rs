use mealplan_api::db::{create_sqlite_pool, SettingsStore, SqliteSettingsStore, StoreError};
use mealplan_api::models::day_settings::{Day, DayCategories, EnabledCategories};
use mealplan_api::services::migration::{
    self, MigrationError, MigrationOptions, MigrationPhase, EXIT_BACKEND_ERROR,
    EXIT_VERIFICATION_FAILED,
};
use mealplan_api::services::writer::FailureReason;

const LEGACY_TABLE: &str = "CREATE TABLE weekly_day_settings (
    id TEXT PRIMARY KEY,
    week_start_date TEXT UNIQUE NOT NULL,
    enabled_days TEXT,
    last_updated_by TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
)";

async fn file_store(dir: &tempfile::TempDir) -> SqliteSettingsStore {
    let url = format!("sqlite://{}", dir.path().join("mealplan.db").display());
    let store = SqliteSettingsStore::new(create_sqlite_pool(&url).await.unwrap());
    sqlx::raw_sql(LEGACY_TABLE).execute(store.pool()).await.unwrap();
    store
}

async fn insert(store: &SqliteSettingsStore, id: &str, week: &str, days: &str) {
    sqlx::query("INSERT INTO weekly_day_settings (id, week_start_date, enabled_days) VALUES (?, ?, ?)")
        .bind(id)
        .bind(week)
        .bind(days)
        .execute(store.pool())
        .await
        .unwrap();
}

fn categories(json: Option<&str>) -> EnabledCategories {
    serde_json::from_str(json.expect("categories written")).unwrap()
}

#[tokio::test]
async fn bad_record_in_batch_does_not_block_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    insert(&store, "r1", "2024-01-01", r#"{"monday":false}"#).await;
    insert(&store, "r2", "2024-01-08", r#"{"friday":false}"#).await;
    insert(&store, "r3", "2024-01-15", r#"{"sunday": fals"#).await;
    insert(&store, "r4", "2024-01-22", r#"{}"#).await;
    insert(&store, "r5", "2024-01-29", r#"{"saturday":false,"sunday":false}"#).await;

    let summary = migration::run(&store, &MigrationOptions::default()).await.unwrap();

    let report = summary.write.as_ref().unwrap();
    assert_eq!(report.converted.len(), 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "2024-01-15");
    assert!(matches!(report.failed[0].reason, FailureReason::Parse(_)));

    // Verification flags the unconverted row, which sets the partial-failure exit code.
    let verification = summary.verification.as_ref().unwrap();
    assert_eq!(verification.failed(), 1);
    assert_eq!(summary.exit_code(), EXIT_VERIFICATION_FAILED);
    assert_eq!(summary.phase, MigrationPhase::Converted);

    let rows = store.read_records().await.unwrap();
    let by_key = |k: &str| rows.iter().find(|r| r.week_start_date == k).unwrap().clone();

    let r1 = categories(by_key("2024-01-01").enabled_categories.as_deref());
    assert_eq!(r1.monday, DayCategories::uniform(false));
    assert_eq!(r1.tuesday, DayCategories::uniform(true));

    let r2 = categories(by_key("2024-01-08").enabled_categories.as_deref());
    for day in Day::ALL {
        assert_eq!(*r2.day(day), DayCategories::uniform(day != Day::Friday));
    }

    assert_eq!(
        categories(by_key("2024-01-22").enabled_categories.as_deref()),
        EnabledCategories::default()
    );

    let r5 = categories(by_key("2024-01-29").enabled_categories.as_deref());
    assert!(!r5.saturday.any_enabled() && !r5.sunday.any_enabled());

    // Untouched: still legacy text, no categories.
    let r3 = by_key("2024-01-15");
    assert_eq!(r3.enabled_days.as_deref(), Some(r#"{"sunday": fals"#));
    assert_eq!(r3.enabled_categories, None);
}

#[tokio::test]
async fn embedded_write_failure_rolls_back_the_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    insert(&store, "a", "2024-01-01", r#"{"monday":false}"#).await;
    insert(&store, "b", "2024-01-08", r#"{"tuesday":false}"#).await;
    store.ensure_categories_column().await.unwrap();
    sqlx::raw_sql(
        "CREATE TRIGGER reject_b BEFORE UPDATE ON weekly_day_settings
         WHEN NEW.id = 'b'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let err = migration::run(&store, &MigrationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        MigrationError::Store(StoreError::Write { key, .. }) if key == "2024-01-08"
    ));
    assert_eq!(err.exit_code(), EXIT_BACKEND_ERROR);

    let rows = store.read_records().await.unwrap();
    assert!(rows.iter().all(|r| r.enabled_categories.is_none()));
}

#[tokio::test]
async fn flipped_slot_is_caught_by_verify_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    insert(&store, "a", "2024-01-01", r#"{"friday":false}"#).await;
    insert(&store, "b", "2024-01-08", r#"{"friday":false}"#).await;

    let summary = migration::run(&store, &MigrationOptions::default()).await.unwrap();
    assert_eq!(summary.phase, MigrationPhase::Verified);

    let mut cats = EnabledCategories::default();
    cats.friday = DayCategories::uniform(false);
    cats.friday.snack = true;
    sqlx::query("UPDATE weekly_day_settings SET enabled_categories = ? WHERE id = 'b'")
        .bind(cats.to_json())
        .execute(store.pool())
        .await
        .unwrap();

    let options = MigrationOptions {
        verify_only: true,
        ..Default::default()
    };
    let summary = migration::run(&store, &options).await.unwrap();
    let report = summary.verification.unwrap();
    let failing: Vec<&str> = report.failures().map(|v| v.key.as_str()).collect();
    assert_eq!(failing, vec!["2024-01-08"]);
}

#[tokio::test]
async fn sampled_verification_checks_only_the_first_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    insert(&store, "a", "2024-01-01", "{}").await;
    insert(&store, "b", "2024-01-08", "{}").await;
    insert(&store, "c", "2024-01-15", "{}").await;

    let options = MigrationOptions {
        sample: Some(2),
        ..Default::default()
    };
    let summary = migration::run(&store, &options).await.unwrap();
    let report = summary.verification.unwrap();
    assert_eq!(report.checked(), 2);
    assert_eq!(report.total_records, 3);
}
