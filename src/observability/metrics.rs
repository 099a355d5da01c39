//! Metric names and small recording helpers for the pipeline stages.
//!
//! Nothing here installs a recorder; without one every call is a no-op.

use std::fmt;
use std::time::Instant;

/// Enum representing all metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Crawler / fetcher
    IndexFetches,
    DownloadsSuccess,
    DownloadsError,
    DownloadBytes,
    MembersExtracted,
    MembersError,

    // Consolidation
    RowsConsolidated,
    RowsSkipped,
    RowsDeduplicated,

    // Join
    JoinRows,
    JoinMatched,
    JoinDuplicateKeys,

    // Aggregation
    AggregateGroups,

    StageDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::IndexFetches => "ans_ledger_index_fetches_total",
            MetricName::DownloadsSuccess => "ans_ledger_downloads_success_total",
            MetricName::DownloadsError => "ans_ledger_downloads_error_total",
            MetricName::DownloadBytes => "ans_ledger_download_bytes",
            MetricName::MembersExtracted => "ans_ledger_members_extracted_total",
            MetricName::MembersError => "ans_ledger_members_error_total",
            MetricName::RowsConsolidated => "ans_ledger_rows_consolidated_total",
            MetricName::RowsSkipped => "ans_ledger_rows_skipped_total",
            MetricName::RowsDeduplicated => "ans_ledger_rows_deduplicated_total",
            MetricName::JoinRows => "ans_ledger_join_rows_total",
            MetricName::JoinMatched => "ans_ledger_join_matched_total",
            MetricName::JoinDuplicateKeys => "ans_ledger_join_duplicate_keys",
            MetricName::AggregateGroups => "ans_ledger_aggregate_groups",
            MetricName::StageDuration => "ans_ledger_stage_duration_seconds",
        }
    }

    pub fn increment(self, by: u64) {
        ::metrics::counter!(self.as_str()).increment(by);
    }

    pub fn record(self, value: f64) {
        ::metrics::histogram!(self.as_str()).record(value);
    }

    pub fn set(self, value: f64) {
        ::metrics::gauge!(self.as_str()).set(value);
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A timing guard that records the stage duration when dropped
pub struct TimingGuard {
    start: Instant,
    stage: &'static str,
}

impl TimingGuard {
    pub fn new(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => self.stage)
            .record(duration);
    }
}

pub fn time_stage(stage: &'static str) -> TimingGuard {
    TimingGuard::new(stage)
}
