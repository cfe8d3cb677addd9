pub mod conversion;
pub mod day_settings;
pub mod metrics;
pub mod migration;
pub mod policy;
pub mod verification;
pub mod writer;
