//! Conversion of `weekly_day_settings` rows from `enabled_days` to
//! `enabled_categories`.
//!
//! Rules, in order:
//! 1. A well-formed `enabled_categories` (seven days, exactly four boolean
//!    slots each) is returned untouched.
//! 2. Otherwise every day starts from the default policy applied to its legacy
//!    flag, and any boolean the partial `enabled_categories` already defines
//!    overrides it.
//!
//! Malformed JSON in either column is a per-record error; the caller skips the
//! record and leaves its stored data as is.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::day_settings::{Day, DayCategories, EnabledCategories, MealSlot, WeeklySettingsRecord};
use crate::services::policy::{derive_categories, legacy_flag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("week {key}: malformed {column}: {reason}")]
    RecordParse {
        key: String,
        column: &'static str,
        reason: String,
    },
}

impl ConversionError {
    pub fn key(&self) -> &str {
        match self {
            ConversionError::RecordParse { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Built from legacy data (or the all-enabled default).
    Converted,
    /// A partial `enabled_categories` was completed from legacy data.
    Normalized,
    /// Already well-formed; nothing to write.
    AlreadyConverted,
}

impl ConversionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversionOutcome::Converted => "converted",
            ConversionOutcome::Normalized => "normalized",
            ConversionOutcome::AlreadyConverted => "already_converted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedRecord {
    pub id: String,
    pub week_start_date: String,
    pub enabled_categories: EnabledCategories,
    pub outcome: ConversionOutcome,
}

impl ConvertedRecord {
    pub fn needs_write(&self) -> bool {
        self.outcome != ConversionOutcome::AlreadyConverted
    }

    /// The row as it looks once this conversion is persisted.
    pub fn apply_to(&self, record: &WeeklySettingsRecord) -> WeeklySettingsRecord {
        if !self.needs_write() {
            return record.clone();
        }
        WeeklySettingsRecord {
            enabled_categories: Some(self.enabled_categories.to_json()),
            ..record.clone()
        }
    }
}

pub fn convert(record: &WeeklySettingsRecord) -> Result<ConvertedRecord, ConversionError> {
    let current = parse_object(record, "enabled_categories", record.enabled_categories.as_deref())?;

    if let Some(cats) = current.as_ref().and_then(well_formed) {
        return Ok(ConvertedRecord {
            id: record.id.clone(),
            week_start_date: record.week_start_date.clone(),
            enabled_categories: cats,
            outcome: ConversionOutcome::AlreadyConverted,
        });
    }

    let legacy = parse_object(record, "enabled_days", record.enabled_days.as_deref())?;

    let enabled_categories = EnabledCategories::from_fn(|day| {
        let mut cats = derive_categories(legacy_flag(legacy.as_ref(), day));
        if let Some(existing) = current
            .as_ref()
            .and_then(|c| c.get(day.as_str()))
            .and_then(Value::as_object)
        {
            for slot in MealSlot::ALL {
                if let Some(v) = existing.get(slot.as_str()).and_then(Value::as_bool) {
                    cats.set(slot, v);
                }
            }
        }
        cats
    });

    let outcome = if current.is_some() {
        ConversionOutcome::Normalized
    } else {
        ConversionOutcome::Converted
    };

    Ok(ConvertedRecord {
        id: record.id.clone(),
        week_start_date: record.week_start_date.clone(),
        enabled_categories,
        outcome,
    })
}

/// Records that converted, plus the ones that failed to parse.
#[derive(Debug, Default)]
pub struct ConversionBatch {
    pub converted: Vec<ConvertedRecord>,
    pub failed: Vec<ConversionError>,
}

impl ConversionBatch {
    pub fn count(&self, outcome: ConversionOutcome) -> usize {
        self.converted.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn pending_writes(&self) -> Vec<ConvertedRecord> {
        self.converted
            .iter()
            .filter(|r| r.needs_write())
            .cloned()
            .collect()
    }
}

pub fn convert_all(records: &[WeeklySettingsRecord]) -> ConversionBatch {
    let mut batch = ConversionBatch::default();
    for record in records {
        match convert(record) {
            Ok(converted) => {
                tracing::debug!(
                    "Week {}: {}",
                    converted.week_start_date,
                    converted.outcome.as_str()
                );
                batch.converted.push(converted);
            }
            Err(e) => {
                tracing::warn!("Skipping record: {}", e);
                batch.failed.push(e);
            }
        }
    }
    batch
}

/// Parse a JSON column into an object. SQL NULL and JSON `null` both mean
/// "absent". A JSON string holding an object (double-encoded by some drivers)
/// is unwrapped once.
pub(crate) fn parse_object(
    record: &WeeklySettingsRecord,
    column: &'static str,
    raw: Option<&str>,
) -> Result<Option<Map<String, Value>>, ConversionError> {
    let err = |reason: String| ConversionError::RecordParse {
        key: record.week_start_date.clone(),
        column,
        reason,
    };

    let Some(raw) = raw else {
        return Ok(None);
    };

    let value: Value = serde_json::from_str(raw).map_err(|e| err(e.to_string()))?;
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner).map_err(|e| err(e.to_string()))?,
        other => other,
    };

    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(err(format!("expected a JSON object, found {}", json_kind(&other)))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Full categories if `map` has exactly the seven days, each with exactly the
/// four boolean slots.
fn well_formed(map: &Map<String, Value>) -> Option<EnabledCategories> {
    if map.len() != Day::ALL.len() {
        return None;
    }
    let mut cats = EnabledCategories::default();
    for day in Day::ALL {
        let slots = map.get(day.as_str())?.as_object()?;
        if slots.len() != MealSlot::ALL.len() {
            return None;
        }
        let mut day_cats = DayCategories::default();
        for slot in MealSlot::ALL {
            day_cats.set(slot, slots.get(slot.as_str())?.as_bool()?);
        }
        *cats.day_mut(day) = day_cats;
    }
    Some(cats)
}
