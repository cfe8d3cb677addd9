use std::path::Path;

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder};

use crate::services::verification::VerificationReport;
use crate::services::writer::WriteReport;

lazy_static! {
    pub static ref RECORDS_COUNTER: CounterVec = register_counter_vec!(
        "day_settings_records_total",
        "Weekly settings records processed by the migration, by outcome",
        &["backend", "outcome"]
    ).unwrap();

    pub static ref VERIFICATION_FAILURES_GAUGE: GaugeVec = register_gauge_vec!(
        "day_settings_verification_failures",
        "Records failing verification at the end of the last run",
        &["backend"]
    ).unwrap();

    pub static ref VERIFICATION_CHECKED_GAUGE: GaugeVec = register_gauge_vec!(
        "day_settings_verification_checked",
        "Records checked by the last verification pass",
        &["backend"]
    ).unwrap();
}

pub fn record_write(report: &WriteReport) {
    let backend = report.backend.as_str();
    for (outcome, n) in [
        ("converted", report.converted.len()),
        ("normalized", report.normalized.len()),
        ("already_converted", report.already_correct.len()),
        ("failed", report.failed.len()),
    ] {
        RECORDS_COUNTER
            .with_label_values(&[backend, outcome])
            .inc_by(n as f64);
    }
}

pub fn record_verification(backend: &str, report: &VerificationReport) {
    VERIFICATION_FAILURES_GAUGE
        .with_label_values(&[backend])
        .set(report.failed() as f64);
    VERIFICATION_CHECKED_GAUGE
        .with_label_values(&[backend])
        .set(report.checked() as f64);
}

/// Text exposition of the default registry.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Write the exposition for a node-exporter textfile collector. The file is
/// written next to its destination and renamed so scrapes never see half a file.
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, render()?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Backend;

    #[test]
    fn write_report_feeds_counters() {
        let report = WriteReport {
            backend: Backend::Embedded,
            dry_run: false,
            converted: vec!["2024-03-04".into(), "2024-03-11".into()],
            normalized: vec![],
            already_correct: vec![],
            failed: vec![],
            backup_table: None,
        };
        let before = RECORDS_COUNTER
            .with_label_values(&["embedded", "converted"])
            .get();
        record_write(&report);
        let after = RECORDS_COUNTER
            .with_label_values(&["embedded", "converted"])
            .get();
        assert_eq!(after - before, 2.0);
        assert!(render().unwrap().contains("day_settings_records_total"));
    }

    #[test]
    fn textfile_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("day_settings.prom");
        RECORDS_COUNTER
            .with_label_values(&["embedded", "failed"])
            .inc_by(0.0);
        write_textfile(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("day_settings_records_total"));
    }
}
