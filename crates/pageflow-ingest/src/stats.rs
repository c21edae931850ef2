//! Run counters and the execution report
//!
//! [`RunStats`] only grows. It is consumed by [`ExecutionReport::finalize`],
//! which is the single place `end_time` gets stamped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::sink::{Artifact, OutputFormat};

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pages_requested: u64,
    successful_pages: u64,
    failed_pages: u64,
    shape_failures: u64,
    retry_count: u64,
    records_ingested: u64,
    bytes_written: u64,
    start_time: DateTime<Utc>,
}

impl RunStats {
    pub fn start() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            pages_requested: 0,
            successful_pages: 0,
            failed_pages: 0,
            shape_failures: 0,
            retry_count: 0,
            records_ingested: 0,
            bytes_written: 0,
            start_time,
        }
    }

    pub fn record_page_requested(&mut self) {
        self.pages_requested += 1;
    }

    pub fn record_page_success(&mut self, records: u64, bytes: u64) {
        self.successful_pages += 1;
        self.records_ingested += records;
        self.bytes_written += bytes;
    }

    pub fn record_page_failure(&mut self) {
        self.failed_pages += 1;
    }

    /// A page the sink refused for structural reasons; also a failed page
    pub fn record_shape_failure(&mut self) {
        self.shape_failures += 1;
        self.failed_pages += 1;
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn pages_requested(&self) -> u64 {
        self.pages_requested
    }

    pub fn successful_pages(&self) -> u64 {
        self.successful_pages
    }

    pub fn failed_pages(&self) -> u64 {
        self.failed_pages
    }

    pub fn shape_failures(&self) -> u64 {
        self.shape_failures
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count
    }

    pub fn records_ingested(&self) -> u64 {
        self.records_ingested
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Every requested page is accounted for exactly once
    pub fn is_balanced(&self) -> bool {
        self.successful_pages + self.failed_pages == self.pages_requested
    }
}

/// Terminal state recorded in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReportOutcome {
    Completed,
    Aborted { reason: String },
}

/// Immutable post-run summary
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub outcome: ReportOutcome,
    pub pages_requested: u64,
    pub successful_pages: u64,
    pub failed_pages: u64,
    pub shape_failures: u64,
    pub retry_count: u64,
    pub records_ingested: u64,
    pub bytes_written: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub artifact_path: PathBuf,
    pub artifact_sha256: Option<String>,
    pub format: OutputFormat,
    pub format_rationale: String,
    pub warnings: Vec<String>,
}

impl ExecutionReport {
    /// Stamp `end_time` and freeze the counters.
    ///
    /// `bytes_written` and `records_ingested` come from the closed artifact
    /// when available so the report matches what is on disk.
    pub fn finalize(
        stats: RunStats,
        artifact_path: &Path,
        artifact: Option<&Artifact>,
        format: OutputFormat,
        outcome: ReportOutcome,
        warnings: Vec<String>,
    ) -> Self {
        let end_time = Utc::now().max(stats.start_time);
        let elapsed_ms = (end_time - stats.start_time)
            .to_std()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            outcome,
            pages_requested: stats.pages_requested,
            successful_pages: stats.successful_pages,
            failed_pages: stats.failed_pages,
            shape_failures: stats.shape_failures,
            retry_count: stats.retry_count,
            records_ingested: artifact.map_or(stats.records_ingested, |a| a.records_written),
            bytes_written: artifact.map_or(stats.bytes_written, |a| a.bytes_written),
            start_time: stats.start_time,
            end_time,
            elapsed_ms,
            artifact_path: artifact_path.to_path_buf(),
            artifact_sha256: artifact.and_then(|a| a.sha256.clone()),
            format,
            format_rationale: format.rationale().to_string(),
            warnings,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == ReportOutcome::Completed
    }

    /// Human-readable report text
    pub fn render(&self) -> String {
        let outcome = match &self.outcome {
            ReportOutcome::Completed => "Completed".to_string(),
            ReportOutcome::Aborted { reason } => format!("Aborted ({})", reason),
        };

        let mut text = String::from("--- Execution Report ---\n");
        text.push_str(&format!("Timestamp: {}\n", self.end_time.to_rfc3339()));
        text.push_str(&format!("Outcome: {}\n", outcome));
        text.push_str(&format!("Pages Requested: {}\n", self.pages_requested));
        text.push_str(&format!("Successful Pages: {}\n", self.successful_pages));
        text.push_str(&format!("Failed Pages: {}\n", self.failed_pages));
        text.push_str(&format!("Shape Failures: {}\n", self.shape_failures));
        text.push_str(&format!("Total Retries: {}\n", self.retry_count));
        text.push_str(&format!(
            "Records Ingested: {}\n",
            thousands(self.records_ingested)
        ));
        text.push_str(&format!("Bytes Written: {}\n", thousands(self.bytes_written)));
        text.push_str(&format!(
            "Execution Time: {}\n",
            format_elapsed(self.elapsed_ms)
        ));
        text.push_str(&format!("Output: {}\n", self.artifact_path.display()));
        if let Some(ref digest) = self.artifact_sha256 {
            text.push_str(&format!("SHA-256: {}\n", digest));
        }
        text.push_str(&format!(
            "Format Chosen: {} (Reason: {})\n",
            self.format.label(),
            self.format_rationale
        ));
        for warning in &self.warnings {
            text.push_str(&format!("Warning: {}\n", warning));
        }
        text
    }

    /// Write the rendered report, creating parent directories as needed
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())
    }
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_elapsed(elapsed_ms: u64) -> String {
    let total_secs = elapsed_ms / 1000;
    format!("{}m {}s", total_secs / 60, total_secs % 60)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn artifact() -> Artifact {
        Artifact {
            path: PathBuf::from("./data/run.csv"),
            format: OutputFormat::Csv,
            bytes_written: 4096,
            records_written: 12345,
            sha256: Some("abc".to_string()),
        }
    }

    #[test]
    fn test_counters_balance() {
        let mut stats = RunStats::start();
        for _ in 0..3 {
            stats.record_page_requested();
        }
        stats.record_page_success(10, 100);
        stats.record_page_failure();
        assert!(!stats.is_balanced());
        stats.record_shape_failure();
        assert!(stats.is_balanced());
        assert_eq!(stats.failed_pages(), 2);
        assert_eq!(stats.shape_failures(), 1);
        assert_eq!(stats.records_ingested(), 10);
    }

    #[test]
    fn test_finalize_stamps_end_time() {
        let start = Utc::now() - ChronoDuration::seconds(125);
        let mut stats = RunStats::started_at(start);
        stats.record_page_requested();
        stats.record_page_success(12345, 4096);
        stats.record_retry();

        let a = artifact();
        let report = ExecutionReport::finalize(
            stats,
            &a.path,
            Some(&a),
            OutputFormat::Csv,
            ReportOutcome::Completed,
            Vec::new(),
        );

        assert!(report.end_time >= report.start_time);
        assert!(report.elapsed_ms >= 125_000);
        assert_eq!(report.retry_count, 1);
        assert!(report.is_completed());
    }

    #[test]
    fn test_end_time_never_precedes_start() {
        let future = Utc::now() + ChronoDuration::hours(1);
        let report = ExecutionReport::finalize(
            RunStats::started_at(future),
            Path::new("out.jsonl"),
            None,
            OutputFormat::JsonLines,
            ReportOutcome::Aborted {
                reason: "cancelled".to_string(),
            },
            Vec::new(),
        );
        assert_eq!(report.end_time, report.start_time);
        assert_eq!(report.elapsed_ms, 0);
    }

    #[test]
    fn test_render_layout() {
        let start = Utc::now() - ChronoDuration::seconds(65);
        let mut stats = RunStats::started_at(start);
        stats.record_page_requested();
        stats.record_page_success(12345, 4096);
        let a = artifact();
        let report = ExecutionReport::finalize(
            stats,
            &a.path,
            Some(&a),
            OutputFormat::Csv,
            ReportOutcome::Completed,
            vec!["page cap of 1 reached".to_string()],
        );

        let text = report.render();
        assert!(text.starts_with("--- Execution Report ---\n"));
        assert!(text.contains("Pages Requested: 1\n"));
        assert!(text.contains("Records Ingested: 12,345\n"));
        assert!(text.contains("Execution Time: 1m 5s\n"));
        assert!(text.contains("Format Chosen: CSV (Reason: Streaming efficiency)\n"));
        assert!(text.contains("Warning: page cap of 1 reached\n"));
    }

    #[test]
    fn test_write_to_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.txt");
        let report = ExecutionReport::finalize(
            RunStats::start(),
            Path::new("out.csv"),
            None,
            OutputFormat::Csv,
            ReportOutcome::Completed,
            Vec::new(),
        );
        report.write_to(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Outcome: Completed"));
    }

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
