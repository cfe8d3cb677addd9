use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Day keys used by both `enabled_days` and `enabled_categories`, Sunday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Sunday,
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Day::Sunday => "sunday",
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
        }
    }

    pub fn parse(s: &str) -> Option<Day> {
        Day::ALL.into_iter().find(|d| d.as_str() == s)
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four independently toggleable meal times of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealSlot {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealSlot {
    pub const ALL: [MealSlot; 4] = [
        MealSlot::Breakfast,
        MealSlot::Lunch,
        MealSlot::Dinner,
        MealSlot::Snack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MealSlot::Breakfast => "breakfast",
            MealSlot::Lunch => "lunch",
            MealSlot::Dinner => "dinner",
            MealSlot::Snack => "snack",
        }
    }

    pub fn parse(s: &str) -> Option<MealSlot> {
        MealSlot::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for MealSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four meal slots of a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCategories {
    pub breakfast: bool,
    pub lunch: bool,
    pub dinner: bool,
    pub snack: bool,
}

impl DayCategories {
    pub fn uniform(enabled: bool) -> Self {
        Self {
            breakfast: enabled,
            lunch: enabled,
            dinner: enabled,
            snack: enabled,
        }
    }

    pub fn get(&self, slot: MealSlot) -> bool {
        match slot {
            MealSlot::Breakfast => self.breakfast,
            MealSlot::Lunch => self.lunch,
            MealSlot::Dinner => self.dinner,
            MealSlot::Snack => self.snack,
        }
    }

    pub fn set(&mut self, slot: MealSlot, enabled: bool) {
        match slot {
            MealSlot::Breakfast => self.breakfast = enabled,
            MealSlot::Lunch => self.lunch = enabled,
            MealSlot::Dinner => self.dinner = enabled,
            MealSlot::Snack => self.snack = enabled,
        }
    }

    pub fn enabled_count(&self) -> usize {
        MealSlot::ALL.iter().filter(|s| self.get(**s)).count()
    }

    pub fn any_enabled(&self) -> bool {
        self.enabled_count() > 0
    }
}

impl Default for DayCategories {
    fn default() -> Self {
        Self::uniform(true)
    }
}

/// Contents of the `enabled_categories` column: seven days x four slots.
/// Field order matches the stored JSON key order (Sunday..Saturday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnabledCategories {
    pub sunday: DayCategories,
    pub monday: DayCategories,
    pub tuesday: DayCategories,
    pub wednesday: DayCategories,
    pub thursday: DayCategories,
    pub friday: DayCategories,
    pub saturday: DayCategories,
}

impl EnabledCategories {
    /// Build a full map by asking `f` for each day in order.
    pub fn from_fn(mut f: impl FnMut(Day) -> DayCategories) -> Self {
        Self {
            sunday: f(Day::Sunday),
            monday: f(Day::Monday),
            tuesday: f(Day::Tuesday),
            wednesday: f(Day::Wednesday),
            thursday: f(Day::Thursday),
            friday: f(Day::Friday),
            saturday: f(Day::Saturday),
        }
    }

    pub fn day(&self, day: Day) -> &DayCategories {
        match day {
            Day::Sunday => &self.sunday,
            Day::Monday => &self.monday,
            Day::Tuesday => &self.tuesday,
            Day::Wednesday => &self.wednesday,
            Day::Thursday => &self.thursday,
            Day::Friday => &self.friday,
            Day::Saturday => &self.saturday,
        }
    }

    pub fn day_mut(&mut self, day: Day) -> &mut DayCategories {
        match day {
            Day::Sunday => &mut self.sunday,
            Day::Monday => &mut self.monday,
            Day::Tuesday => &mut self.tuesday,
            Day::Wednesday => &mut self.wednesday,
            Day::Thursday => &mut self.thursday,
            Day::Friday => &mut self.friday,
            Day::Saturday => &mut self.saturday,
        }
    }

    /// Serialized form written to the `enabled_categories` column.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One row of `weekly_day_settings`, with JSON columns kept as raw text.
/// Both backends return text here (`::TEXT` casts on PostgreSQL) so that a
/// single malformed row never prevents the rest of the table from loading.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct WeeklySettingsRecord {
    pub id: String,
    pub week_start_date: String,
    pub enabled_days: Option<String>,
    pub enabled_categories: Option<String>,
    pub last_updated_by: Option<String>,
}

impl WeeklySettingsRecord {
    /// A fresh record for a week that has no stored row yet.
    pub fn new_default(week_start: NaiveDate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            week_start_date: week_start.format("%Y-%m-%d").to_string(),
            enabled_days: None,
            enabled_categories: Some(EnabledCategories::default().to_json()),
            last_updated_by: None,
        }
    }
}

/// Monday of the week containing `date`. All week keys are normalized with this.
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Parse a stored `week_start_date` (`YYYY-MM-DD`, optionally followed by a time part).
pub fn parse_week_key(key: &str) -> Option<NaiveDate> {
    let date_part = key.get(..10).unwrap_or(key);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
