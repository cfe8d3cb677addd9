use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::SettingsStore;
use crate::models::day_settings::{
    week_start_for, Day, EnabledCategories, MealSlot, WeeklySettingsRecord,
};
use crate::services::conversion::convert;

/// Settings of one week as the application sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekSettings {
    pub week_start: NaiveDate,
    pub enabled_categories: EnabledCategories,
    pub last_updated_by: Option<String>,
    /// `false` when synthesized for a week without a stored row.
    pub persisted: bool,
}

/// One change in a batch toggle. Without `slot`, all four slots of the day change.
#[derive(Debug, Clone, Deserialize)]
pub struct DayToggle {
    pub day: Day,
    pub slot: Option<MealSlot>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub day: Day,
    pub enabled: bool,
    pub enabled_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekSummary {
    pub week_start: NaiveDate,
    pub days: Vec<DaySummary>,
    pub enabled_days: usize,
    pub enabled_slots: usize,
}

pub struct DaySettingsService;

impl DaySettingsService {
    /// Settings for the week containing `date`. A week without a row gets the
    /// all-enabled default; rows still in legacy form are read through the
    /// conversion rules.
    pub async fn get_week(store: &dyn SettingsStore, date: NaiveDate) -> anyhow::Result<WeekSettings> {
        Ok(Self::load_week(store, date).await?.0)
    }

    /// The week plus the key its row is stored under, which may carry a time
    /// suffix (`2024-03-04T00:00:00.000Z`) written by older clients.
    async fn load_week(
        store: &dyn SettingsStore,
        date: NaiveDate,
    ) -> anyhow::Result<(WeekSettings, Option<String>)> {
        let week_start = week_start_for(date);
        let key = week_start.format("%Y-%m-%d").to_string();

        match store.find_by_week(&key).await? {
            Some(record) => {
                let converted = convert(&record)?;
                let week = WeekSettings {
                    week_start,
                    enabled_categories: converted.enabled_categories,
                    last_updated_by: record.last_updated_by,
                    persisted: true,
                };
                Ok((week, Some(record.week_start_date)))
            }
            None => {
                let week = WeekSettings {
                    week_start,
                    enabled_categories: EnabledCategories::default(),
                    last_updated_by: None,
                    persisted: false,
                };
                Ok((week, None))
            }
        }
    }

    /// With a slot: that slot's state. Without: whether any slot of the day is on.
    pub async fn check_day(
        store: &dyn SettingsStore,
        date: NaiveDate,
        day: Day,
        slot: Option<MealSlot>,
    ) -> anyhow::Result<bool> {
        let week = Self::get_week(store, date).await?;
        let cats = week.enabled_categories.day(day);
        Ok(match slot {
            Some(slot) => cats.get(slot),
            None => cats.any_enabled(),
        })
    }

    pub async fn toggle_day(
        store: &dyn SettingsStore,
        date: NaiveDate,
        toggle: DayToggle,
        user_id: Option<&str>,
    ) -> anyhow::Result<WeekSettings> {
        Self::batch_toggle(store, date, std::slice::from_ref(&toggle), user_id).await
    }

    /// Apply every toggle in order and persist the week once.
    pub async fn batch_toggle(
        store: &dyn SettingsStore,
        date: NaiveDate,
        toggles: &[DayToggle],
        user_id: Option<&str>,
    ) -> anyhow::Result<WeekSettings> {
        let (mut week, stored_key) = Self::load_week(store, date).await?;

        for toggle in toggles {
            let cats = week.enabled_categories.day_mut(toggle.day);
            match toggle.slot {
                Some(slot) => cats.set(slot, toggle.enabled),
                None => {
                    for slot in MealSlot::ALL {
                        cats.set(slot, toggle.enabled);
                    }
                }
            }
        }

        // The generated id is only used if the week has no row yet. An existing
        // row is updated under its stored key so the conflict target matches it.
        let mut record = WeeklySettingsRecord::new_default(week.week_start);
        if let Some(key) = stored_key {
            record.week_start_date = key;
        }
        record.enabled_categories = Some(week.enabled_categories.to_json());
        record.last_updated_by = user_id.map(str::to_string);
        store.upsert(&record).await?;

        tracing::debug!(
            "Week {}: applied {} toggle(s)",
            record.week_start_date,
            toggles.len()
        );

        week.last_updated_by = record.last_updated_by;
        week.persisted = true;
        Ok(week)
    }

    pub async fn week_summary(store: &dyn SettingsStore, date: NaiveDate) -> anyhow::Result<WeekSummary> {
        let week = Self::get_week(store, date).await?;
        let days: Vec<DaySummary> = Day::ALL
            .iter()
            .map(|day| {
                let cats = week.enabled_categories.day(*day);
                DaySummary {
                    day: *day,
                    enabled: cats.any_enabled(),
                    enabled_slots: cats.enabled_count(),
                }
            })
            .collect();

        Ok(WeekSummary {
            week_start: week.week_start,
            enabled_days: days.iter().filter(|d| d.enabled).count(),
            enabled_slots: days.iter().map(|d| d.enabled_slots).sum(),
            days,
        })
    }
}
