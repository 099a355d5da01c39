use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Data-quality summary every stage returns beside its output, so a caller
/// can judge the run without reading the logs line by line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub processed: usize,
    pub skipped: usize,
    pub skip_reasons: BTreeMap<String, usize>,
    pub notes: Vec<String>,
}

impl StageSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    pub fn record_processed(&mut self, n: usize) {
        self.processed += n;
    }

    pub fn record_skip(&mut self, reason: &str) {
        self.record_skips(reason, 1);
    }

    pub fn record_skips(&mut self, reason: &str, n: usize) {
        if n == 0 {
            return;
        }
        self.skipped += n;
        *self.skip_reasons.entry(reason.to_string()).or_insert(0) += n;
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn log(&self) {
        info!(
            stage = %self.stage,
            processed = self.processed,
            skipped = self.skipped,
            reasons = ?self.skip_reasons,
            "stage finished"
        );
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} skipped",
            self.stage, self.processed, self.skipped
        )?;
        if !self.skip_reasons.is_empty() {
            let reasons: Vec<String> = self
                .skip_reasons
                .iter()
                .map(|(reason, count)| format!("{}={}", reason, count))
                .collect();
            write!(f, " ({})", reasons.join(", "))?;
        }
        Ok(())
    }
}
