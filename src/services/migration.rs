//! Drives one migration run against a single backend:
//! NotStarted → ColumnEnsured → Converted → Verified → (Cleanup).
//!
//! Only one run may target a given database at a time; nothing here locks.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Backend, SettingsStore, StoreError};
use crate::services::conversion::convert_all;
use crate::services::verification::{verify, VerificationReport};
use crate::services::writer::{write, WriteReport};
use crate::services::metrics;

pub const EXIT_OK: i32 = 0;
pub const EXIT_BACKEND_ERROR: i32 = 1;
pub const EXIT_VERIFICATION_FAILED: i32 = 2;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrationError {
    pub fn exit_code(&self) -> i32 {
        EXIT_BACKEND_ERROR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationPhase {
    NotStarted,
    ColumnEnsured,
    Converted,
    Verified,
    Cleanup,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationPhase::NotStarted => "not started",
            MigrationPhase::ColumnEnsured => "column ensured",
            MigrationPhase::Converted => "converted",
            MigrationPhase::Verified => "verified",
            MigrationPhase::Cleanup => "cleanup done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    pub dry_run: bool,
    pub verify_only: bool,
    pub sample: Option<usize>,
    pub drop_legacy_column: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub backend: Backend,
    pub phase: MigrationPhase,
    pub nothing_to_do: bool,
    pub records_read: usize,
    pub write: Option<WriteReport>,
    pub verification: Option<VerificationReport>,
    pub legacy_column_dropped: bool,
}

impl RunSummary {
    fn new(backend: Backend) -> Self {
        Self {
            backend,
            phase: MigrationPhase::NotStarted,
            nothing_to_do: false,
            records_read: 0,
            write: None,
            verification: None,
            legacy_column_dropped: false,
        }
    }

    /// Records the write pass could not convert, whether or not the
    /// verification sample reached them.
    pub fn write_failures(&self) -> usize {
        self.write.as_ref().map_or(0, |w| w.failed.len())
    }

    pub fn exit_code(&self) -> i32 {
        let verification_failed = self
            .verification
            .as_ref()
            .is_some_and(|report| !report.is_clean());
        if verification_failed || (!self.is_dry_run() && self.write_failures() > 0) {
            EXIT_VERIFICATION_FAILED
        } else {
            EXIT_OK
        }
    }

    fn is_dry_run(&self) -> bool {
        self.write.as_ref().is_some_and(|w| w.dry_run)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Day settings migration ({}) ===", self.backend)?;
        if self.nothing_to_do {
            writeln!(f, "No weekly_day_settings table found: nothing to migrate.")?;
            return Ok(());
        }
        writeln!(f, "Records read:          {}", self.records_read)?;
        if let Some(w) = &self.write {
            if w.dry_run {
                writeln!(f, "Dry run: nothing was written.")?;
            }
            writeln!(f, "Converted:             {}", w.converted.len())?;
            writeln!(f, "Normalized:            {}", w.normalized.len())?;
            writeln!(f, "Already correct:       {}", w.already_correct.len())?;
            writeln!(f, "Failed:                {}", w.failed.len())?;
            for failure in &w.failed {
                writeln!(f, "  ✗ {}: {}", failure.key, failure.reason)?;
            }
            if let Some(backup) = &w.backup_table {
                writeln!(f, "Backup table:          {backup}")?;
            }
        }
        if let Some(v) = &self.verification {
            writeln!(
                f,
                "Verification:          {}/{} passed ({} record(s) in table, {} warning(s))",
                v.passed(),
                v.checked(),
                v.total_records,
                v.warnings()
            )?;
            for verdict in v.failures() {
                let reasons: Vec<String> =
                    verdict.mismatches.iter().map(|m| m.to_string()).collect();
                writeln!(f, "  ✗ {}: {}", verdict.key, reasons.join("; "))?;
            }
        }
        writeln!(f, "Final state:           {}", self.phase)?;
        if self.phase == MigrationPhase::Verified && !self.legacy_column_dropped {
            writeln!(
                f,
                "Legacy column enabled_days kept. Re-run with --drop-legacy-column to remove it."
            )?;
        }
        Ok(())
    }
}

/// Run the migration against `store` per `options`.
///
/// A missing table ends the run successfully with `nothing_to_do`. Backend
/// errors (and an embedded batch rollback) abort with `MigrationError`.
pub async fn run(
    store: &dyn SettingsStore,
    options: &MigrationOptions,
) -> Result<RunSummary, MigrationError> {
    let mut summary = RunSummary::new(store.backend());

    if options.verify_only {
        return verify_phase(store, options, summary).await;
    }

    if !options.dry_run {
        match store.ensure_categories_column().await {
            Ok(added) => {
                if added {
                    info!("Added enabled_categories column");
                }
                advance(&mut summary, MigrationPhase::ColumnEnsured);
            }
            Err(StoreError::BackendUnavailable(table)) => {
                info!("Table {table} not found, nothing to migrate");
                summary.nothing_to_do = true;
                return Ok(summary);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let records = match store.read_records().await {
        Ok(records) => records,
        Err(StoreError::BackendUnavailable(table)) => {
            info!("Table {table} not found, nothing to migrate");
            summary.nothing_to_do = true;
            return Ok(summary);
        }
        Err(e) => return Err(e.into()),
    };
    summary.records_read = records.len();
    info!("Read {} weekly settings record(s)", records.len());

    let batch = convert_all(&records);
    let report = write(store, &batch, options.dry_run).await?;
    metrics::record_write(&report);
    summary.write = Some(report);

    if options.dry_run {
        return Ok(summary);
    }
    advance(&mut summary, MigrationPhase::Converted);

    verify_phase(store, options, summary).await
}

async fn verify_phase(
    store: &dyn SettingsStore,
    options: &MigrationOptions,
    mut summary: RunSummary,
) -> Result<RunSummary, MigrationError> {
    let report = match verify(store, options.sample).await {
        Ok(report) => report,
        Err(StoreError::BackendUnavailable(table)) => {
            info!("Table {table} not found, nothing to verify");
            summary.nothing_to_do = true;
            return Ok(summary);
        }
        Err(e) => return Err(e.into()),
    };
    metrics::record_verification(summary.backend.as_str(), &report);
    if summary.records_read == 0 {
        summary.records_read = report.total_records;
    }

    let clean = report.is_clean();
    summary.verification = Some(report);
    if !clean || summary.write_failures() > 0 {
        warn!(
            "{} write failure(s), verification clean: {}; staying in phase {}",
            summary.write_failures(),
            clean,
            summary.phase
        );
        if options.drop_legacy_column {
            warn!("Refusing to drop enabled_days while records are unconverted");
        }
        return Ok(summary);
    }
    advance(&mut summary, MigrationPhase::Verified);

    if options.drop_legacy_column {
        if options.sample.is_some() {
            warn!("Refusing to drop enabled_days after a sampled verification");
            return Ok(summary);
        }
        summary.legacy_column_dropped = store.drop_legacy_column().await?;
        advance(&mut summary, MigrationPhase::Cleanup);
    }

    Ok(summary)
}

fn advance(summary: &mut RunSummary, phase: MigrationPhase) {
    info!("Migration phase: {} → {}", summary.phase, phase);
    summary.phase = phase;
}

/// Restore `enabled_categories` from a backup table taken by a relational run.
pub async fn restore(store: &dyn SettingsStore, backup_table: &str) -> Result<u64, MigrationError> {
    let restored = store.restore_backup(backup_table).await?;
    info!("Restored {restored} row(s) from {backup_table}");
    Ok(restored)
}
