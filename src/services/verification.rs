//! Read-only consistency checks over stored `weekly_day_settings` rows.

use chrono::{Datelike, Weekday};
use serde_json::Value;

use crate::db::{SettingsStore, StoreError};
use crate::models::day_settings::{parse_week_key, Day, MealSlot, WeeklySettingsRecord};
use crate::services::conversion::parse_object;
use crate::services::policy::legacy_flag;

/// A finding that fails verification for a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationMismatch {
    MissingCategories,
    UnparseableCategories(String),
    MissingDay(Day),
    InvalidSlot { day: Day, slot: MealSlot },
    LegacyMismatch { day: Day, slot: MealSlot, expected: bool },
}

impl std::fmt::Display for VerificationMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCategories => write!(f, "enabled_categories is missing"),
            Self::UnparseableCategories(e) => write!(f, "enabled_categories unreadable: {e}"),
            Self::MissingDay(day) => write!(f, "{day} is missing"),
            Self::InvalidSlot { day, slot } => write!(f, "{day}.{slot} is not a boolean"),
            Self::LegacyMismatch { day, slot, expected } => {
                write!(f, "{day}.{slot} should be {expected} (legacy value)")
            }
        }
    }
}

/// Reported but does not fail verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationWarning {
    MisalignedWeekStart,
    UnparseableLegacy(String),
}

#[derive(Debug, Clone)]
pub struct RecordVerdict {
    pub key: String,
    pub mismatches: Vec<VerificationMismatch>,
    pub warnings: Vec<VerificationWarning>,
}

impl RecordVerdict {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub total_records: usize,
    pub verdicts: Vec<RecordVerdict>,
}

impl VerificationReport {
    pub fn checked(&self) -> usize {
        self.verdicts.len()
    }

    pub fn passed(&self) -> usize {
        self.verdicts.iter().filter(|v| v.passed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordVerdict> {
        self.verdicts.iter().filter(|v| !v.passed())
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn warnings(&self) -> usize {
        self.verdicts.iter().map(|v| v.warnings.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

pub fn verify_record(record: &WeeklySettingsRecord) -> RecordVerdict {
    let mut verdict = RecordVerdict {
        key: record.week_start_date.clone(),
        mismatches: Vec::new(),
        warnings: Vec::new(),
    };

    if parse_week_key(&record.week_start_date).map(|d| d.weekday()) != Some(Weekday::Mon) {
        verdict.warnings.push(VerificationWarning::MisalignedWeekStart);
    }

    let categories = match parse_object(
        record,
        "enabled_categories",
        record.enabled_categories.as_deref(),
    ) {
        Ok(Some(map)) => map,
        Ok(None) => {
            verdict.mismatches.push(VerificationMismatch::MissingCategories);
            return verdict;
        }
        Err(e) => {
            verdict
                .mismatches
                .push(VerificationMismatch::UnparseableCategories(e.to_string()));
            return verdict;
        }
    };

    let legacy = match parse_object(record, "enabled_days", record.enabled_days.as_deref()) {
        Ok(legacy) => legacy,
        Err(e) => {
            verdict
                .warnings
                .push(VerificationWarning::UnparseableLegacy(e.to_string()));
            None
        }
    };

    for day in Day::ALL {
        let Some(slots) = categories.get(day.as_str()).and_then(Value::as_object) else {
            verdict.mismatches.push(VerificationMismatch::MissingDay(day));
            continue;
        };
        let expected = legacy_flag(legacy.as_ref(), day);
        for slot in MealSlot::ALL {
            match slots.get(slot.as_str()).and_then(Value::as_bool) {
                None => verdict
                    .mismatches
                    .push(VerificationMismatch::InvalidSlot { day, slot }),
                Some(actual) => {
                    if let Some(expected) = expected.filter(|e| *e != actual) {
                        verdict
                            .mismatches
                            .push(VerificationMismatch::LegacyMismatch { day, slot, expected });
                    }
                }
            }
        }
    }

    verdict
}

/// Re-read stored rows and check them. `sample` limits the check to the first
/// N rows in week order. Never writes.
pub async fn verify(
    store: &dyn SettingsStore,
    sample: Option<usize>,
) -> Result<VerificationReport, StoreError> {
    let records = store.read_records().await?;
    let total_records = records.len();
    let take = sample.unwrap_or(total_records);

    let verdicts: Vec<RecordVerdict> = records.iter().take(take).map(verify_record).collect();
    for verdict in verdicts.iter().filter(|v| !v.passed()) {
        let reasons: Vec<String> = verdict.mismatches.iter().map(|m| m.to_string()).collect();
        tracing::warn!("Week {} failed verification: {}", verdict.key, reasons.join("; "));
    }

    Ok(VerificationReport {
        total_records,
        verdicts,
    })
}
