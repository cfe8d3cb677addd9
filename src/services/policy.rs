//! Legacy day flag → category slots.

use serde_json::{Map, Value};

use crate::models::day_settings::{Day, DayCategories};

/// Every slot takes the legacy day value; only an explicit `false` disables.
/// An absent day (`None`) is enabled.
pub fn derive_categories(legacy_day: Option<bool>) -> DayCategories {
    DayCategories::uniform(legacy_day != Some(false))
}

/// Explicit boolean stored for `day` in a parsed `enabled_days` object.
/// Non-boolean values count as absent, which the policy treats as enabled.
pub fn legacy_flag(enabled_days: Option<&Map<String, Value>>, day: Day) -> Option<bool> {
    enabled_days
        .and_then(|days| days.get(day.as_str()))
        .and_then(Value::as_bool)
}
