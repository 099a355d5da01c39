use crate::config::ValueDerivation;
use crate::constants::FIELD_DELIMITER;
use crate::error::{PipelineError, Result};
use crate::observability::MetricName;
use crate::pipeline::processing::amount::parse_amount;
use crate::pipeline::processing::schema::{field, DisclosureSchema};
use crate::pipeline::summary::StageSummary;
use crate::types::{DisclosureFile, ExpenseRecord, Quarter};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static YEAR_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})").expect("valid regex"));

impl ValueDerivation {
    /// Derives the period expense from raw balance fields.
    pub fn derive(self, opening: &str, closing: &str) -> Result<Decimal> {
        let closing = parse_amount(closing).map_err(unparseable)?;
        match self {
            ValueDerivation::BalanceDelta => {
                let opening = parse_amount(opening).map_err(unparseable)?;
                Ok(closing - opening)
            }
            ValueDerivation::ClosingBalanceMillions => Ok(closing / Decimal::from(1_000_000)),
        }
    }
}

fn unparseable(e: PipelineError) -> PipelineError {
    PipelineError::Parse(format!("unparseable balance: {}", e))
}

/// Leftmost quarter marker (`T1`/`1T` .. `T4`/`4T`) in the name, case-insensitive.
pub fn infer_quarter(name: &str) -> Quarter {
    let upper = name.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    for pair in bytes.windows(2) {
        let quarter = match (pair[0], pair[1]) {
            (b'T', d @ b'1'..=b'4') | (d @ b'1'..=b'4', b'T') => d - b'0',
            _ => continue,
        };
        return Quarter::from_number(quarter);
    }
    Quarter::Unknown
}

/// First `19xx`/`20xx` run in the name that is not the tail of a longer number.
pub fn infer_year(name: &str) -> Option<i32> {
    YEAR_IN_NAME
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Period of an extracted file: its own name first, then the directory it
/// was extracted into (named after the archive), then `default_year`.
pub fn describe_file(path: &Path, default_year: Option<i32>) -> DisclosureFile {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let quarter = match infer_quarter(&filename) {
        Quarter::Unknown => infer_quarter(&parent),
        known => known,
    };
    let year = infer_year(&filename)
        .or_else(|| infer_year(&parent))
        .or(default_year);

    DisclosureFile {
        path: path.to_path_buf(),
        filename,
        year,
        quarter,
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidationOutcome {
    pub records: Vec<ExpenseRecord>,
    pub files: Vec<DisclosureFile>,
    pub summary: StageSummary,
}

pub struct QuarterConsolidator {
    derivation: ValueDerivation,
    default_year: Option<i32>,
}

impl QuarterConsolidator {
    pub fn new(derivation: ValueDerivation, default_year: Option<i32>) -> Self {
        Self {
            derivation,
            default_year,
        }
    }

    /// Parses every file and unions the rows, ordered by source filename.
    /// A file that fails is skipped and counted; the run only aborts when
    /// nothing could be consolidated at all.
    pub fn consolidate(&self, paths: &[PathBuf]) -> Result<ConsolidationOutcome> {
        let mut summary = StageSummary::new("consolidate");
        let (records, files) = self.consolidate_into(paths, &mut summary)?;
        Ok(ConsolidationOutcome {
            records,
            files,
            summary,
        })
    }

    /// Same as [`consolidate`](Self::consolidate), but counts into a summary
    /// the caller keeps, so per-file failures survive an aborted run.
    pub fn consolidate_into(
        &self,
        paths: &[PathBuf],
        summary: &mut StageSummary,
    ) -> Result<(Vec<ExpenseRecord>, Vec<DisclosureFile>)> {
        if paths.is_empty() {
            return Err(PipelineError::NotFound("no disclosure files to consolidate".to_string()));
        }

        let mut files: Vec<DisclosureFile> = paths
            .iter()
            .map(|p| describe_file(p, self.default_year))
            .collect();
        files.sort_by(|a, b| a.filename.cmp(&b.filename).then_with(|| a.path.cmp(&b.path)));

        let mut records = Vec::new();
        let mut failed_files = Vec::new();

        for file in &files {
            if !file.quarter.is_known() {
                warn!("No quarter marker in '{}'; rows keep an unknown quarter", file.filename);
                summary.note(format!("{}: quarter unknown", file.filename));
            }
            if file.year.is_none() {
                warn!("No year for '{}'", file.filename);
                summary.note(format!("{}: year unknown", file.filename));
            }

            match self.consolidate_file(file, summary) {
                Ok(mut rows) => {
                    info!("Consolidated {} rows from {}", rows.len(), file.filename);
                    records.append(&mut rows);
                }
                Err(e) => {
                    warn!("Skipping file {}: {}", file.filename, e);
                    summary.note(format!("{}: {}", file.filename, e));
                    summary.record_skip(&format!("file_{}", e.kind()));
                    failed_files.push(e);
                }
            }
        }

        if failed_files.len() == files.len() {
            let schema_failures = failed_files
                .iter()
                .filter(|e| matches!(e, PipelineError::Schema(_)))
                .count();
            let message = format!(
                "none of {} disclosure files could be consolidated ({} schema failures)",
                files.len(),
                schema_failures
            );
            summary.log();
            return Err(if schema_failures == files.len() {
                PipelineError::Schema(message)
            } else {
                PipelineError::Parse(message)
            });
        }

        MetricName::RowsConsolidated.increment(summary.processed as u64);
        summary.log();
        Ok((records, files))
    }

    /// Rows of one file. Unparseable balances skip the row; a missing
    /// balance column fails the file.
    pub fn consolidate_file(
        &self,
        file: &DisclosureFile,
        summary: &mut StageSummary,
    ) -> Result<Vec<ExpenseRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .flexible(true)
            .from_path(&file.path)?;
        let schema = DisclosureSchema::from_headers(reader.headers()?);
        schema.require(self.derivation)?;

        let missing_keys = schema.missing_key_columns();
        if !missing_keys.is_empty() {
            warn!(
                "{} lacks {}; rows get empty keys",
                file.filename,
                missing_keys.join(", ")
            );
            summary.note(format!("{}: missing {}", file.filename, missing_keys.join(", ")));
        }

        let mut rows = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    debug!("{} row {}: {}", file.filename, line + 2, e);
                    summary.record_skip("malformed_row");
                    MetricName::RowsSkipped.increment(1);
                    continue;
                }
            };

            let value = self.derivation.derive(
                field(&record, schema.opening_balance),
                field(&record, schema.closing_balance),
            );
            match value {
                Ok(expense_value) => {
                    rows.push(ExpenseRecord {
                        registry_id: field(&record, schema.registry_id).to_string(),
                        account_code: field(&record, schema.account_code).to_string(),
                        year: file.year,
                        quarter: file.quarter,
                        expense_value,
                    });
                }
                Err(e) => {
                    debug!("{} row {}: {}", file.filename, line + 2, e);
                    summary.record_skip("unparseable_balance");
                    MetricName::RowsSkipped.increment(1);
                }
            }
        }

        summary.record_processed(rows.len());
        Ok(rows)
    }
}

/// Keeps the first record for each (registry_id, account_code, year, quarter).
/// Returns the survivors and how many were dropped.
pub fn deduplicate(records: Vec<ExpenseRecord>) -> (Vec<ExpenseRecord>, usize) {
    let before = records.len();
    let mut seen: HashSet<(String, String, Option<i32>, Quarter)> = HashSet::with_capacity(before);
    let kept: Vec<ExpenseRecord> = records
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.registry_id.clone(),
                r.account_code.clone(),
                r.year,
                r.quarter,
            ))
        })
        .collect();
    let dropped = before - kept.len();
    if dropped > 0 {
        warn!("Dropped {} duplicate ledger rows", dropped);
        MetricName::RowsDeduplicated.increment(dropped as u64);
    }
    (kept, dropped)
}
