// Library exports for the migration binary and tests
pub mod config;
pub mod db;
pub mod models;
pub mod services;
