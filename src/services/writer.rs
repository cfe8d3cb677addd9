use std::fmt;

use crate::db::{Backend, SettingsStore, StoreError};
use crate::services::conversion::{ConversionBatch, ConversionOutcome};

/// Why a record did not end up converted in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Parse(String),
    Write(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Parse(e) => write!(f, "parse error: {e}"),
            FailureReason::Write(e) => write!(f, "write failure: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub key: String,
    pub reason: FailureReason,
}

/// Per-key outcome of one write pass.
#[derive(Debug, Clone)]
pub struct WriteReport {
    pub backend: Backend,
    pub dry_run: bool,
    pub converted: Vec<String>,
    pub normalized: Vec<String>,
    pub already_correct: Vec<String>,
    pub failed: Vec<RecordFailure>,
    pub backup_table: Option<String>,
}

impl WriteReport {
    pub fn succeeded(&self) -> usize {
        self.converted.len() + self.normalized.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Persist the records of `batch` that need a write and merge the outcome
/// with the batch's parse failures.
///
/// Embedded: one transaction, any failure rolls back and is returned as an
/// error. Relational: backup table first, then row by row; row failures are
/// reported and the batch continues. With `dry_run` nothing is written.
pub async fn write(
    store: &dyn SettingsStore,
    batch: &ConversionBatch,
    dry_run: bool,
) -> Result<WriteReport, StoreError> {
    let mut report = WriteReport {
        backend: store.backend(),
        dry_run,
        converted: Vec::new(),
        normalized: Vec::new(),
        already_correct: Vec::new(),
        failed: batch
            .failed
            .iter()
            .map(|e| RecordFailure {
                key: e.key().to_string(),
                reason: FailureReason::Parse(e.to_string()),
            })
            .collect(),
        backup_table: None,
    };

    let pending = batch.pending_writes();
    let written: Vec<String> = if dry_run || pending.is_empty() {
        pending.iter().map(|r| r.week_start_date.clone()).collect()
    } else {
        tracing::info!(
            "Writing {} record(s) to {} backend",
            pending.len(),
            store.backend()
        );
        let outcome = store.write_batch(&pending).await?;
        report.backup_table = outcome.backup_table;
        report
            .failed
            .extend(outcome.failed.into_iter().map(|(key, e)| RecordFailure {
                key,
                reason: FailureReason::Write(e),
            }));
        outcome.written
    };

    for record in &batch.converted {
        match record.outcome {
            ConversionOutcome::AlreadyConverted => {
                report.already_correct.push(record.week_start_date.clone())
            }
            ConversionOutcome::Converted if written.contains(&record.week_start_date) => {
                report.converted.push(record.week_start_date.clone())
            }
            ConversionOutcome::Normalized if written.contains(&record.week_start_date) => {
                report.normalized.push(record.week_start_date.clone())
            }
            _ => {}
        }
    }

    Ok(report)
}
