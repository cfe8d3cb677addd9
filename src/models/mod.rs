pub mod day_settings;
