use crate::config::DuplicatePolicy;
use crate::observability::MetricName;
use crate::pipeline::summary::StageSummary;
use crate::types::{ExpenseRecord, JoinedRecord, OperatorRegistryEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

/// Non-fatal: the registry repeats join keys, so matching ledger rows are
/// multiplied once per repeated registry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinIntegrityWarning {
    /// Registry rows whose key already appeared earlier.
    pub duplicate_count: usize,
    pub duplicate_keys: Vec<String>,
    pub deduplicated: bool,
}

impl JoinIntegrityWarning {
    pub fn message(&self) -> String {
        let action = if self.deduplicated {
            "kept the first entry per key"
        } else {
            "matching expense rows will be duplicated once per repeated entry, inflating totals"
        };
        format!(
            "found {} duplicate REGISTRO_OPERADORA entries in the registry; {}",
            self.duplicate_count, action
        )
    }
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub records: Vec<JoinedRecord>,
    pub warning: Option<JoinIntegrityWarning>,
    pub ledger_rows: usize,
    pub matched_rows: usize,
    pub summary: StageSummary,
}

impl JoinOutcome {
    /// Share of output rows carrying registry enrichment.
    pub fn match_rate(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.matched_rows as f64 / self.records.len() as f64
        }
    }
}

/// Counts registry rows whose key repeats an earlier row.
pub fn find_duplicate_keys(registry: &[OperatorRegistryEntry]) -> (usize, Vec<String>) {
    let mut seen = HashSet::new();
    let mut duplicated = BTreeSet::new();
    let mut count = 0;
    for entry in registry {
        if !seen.insert(entry.registry_id.as_str()) {
            count += 1;
            duplicated.insert(entry.registry_id.clone());
        }
    }
    (count, duplicated.into_iter().collect())
}

pub struct RegistryJoiner {
    policy: DuplicatePolicy,
}

impl RegistryJoiner {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy }
    }

    /// Left join on registry id: every ledger row survives, unmatched rows
    /// carry no enrichment.
    pub fn join(&self, ledger: Vec<ExpenseRecord>, registry: &[OperatorRegistryEntry]) -> JoinOutcome {
        let mut summary = StageSummary::new("join");
        let (duplicate_count, duplicate_keys) = find_duplicate_keys(registry);

        let warning = (duplicate_count > 0).then(|| JoinIntegrityWarning {
            duplicate_count,
            duplicate_keys,
            deduplicated: self.policy == DuplicatePolicy::DropDuplicates,
        });
        if let Some(w) = &warning {
            warn!("{}", w.message());
            MetricName::JoinDuplicateKeys.set(duplicate_count as f64);
            summary.note(w.message());
        }

        let mut index: HashMap<&str, Vec<&OperatorRegistryEntry>> = HashMap::new();
        for entry in registry {
            let matches = index.entry(entry.registry_id.as_str()).or_default();
            if self.policy == DuplicatePolicy::DropDuplicates && !matches.is_empty() {
                continue;
            }
            matches.push(entry);
        }

        let ledger_rows = ledger.len();
        let mut records = Vec::with_capacity(ledger_rows);
        let mut matched_rows = 0;
        let mut unmatched_rows = 0;
        for expense in ledger {
            match index.get(expense.registry_id.as_str()) {
                Some(entries) if !expense.registry_id.is_empty() => {
                    matched_rows += entries.len();
                    for entry in entries {
                        records.push(JoinedRecord::enriched(expense.clone(), entry));
                    }
                }
                _ => {
                    unmatched_rows += 1;
                    records.push(JoinedRecord::unmatched(expense));
                }
            }
        }
        summary.record_processed(records.len());
        if unmatched_rows > 0 {
            summary.note(format!("{} ledger rows without registry match", unmatched_rows));
        }

        let outcome = JoinOutcome {
            records,
            warning,
            ledger_rows,
            matched_rows,
            summary,
        };
        info!(
            "Join finished: ledger rows {}, result rows {}, matched rows {} ({:.1}%)",
            outcome.ledger_rows,
            outcome.records.len(),
            outcome.matched_rows,
            outcome.match_rate() * 100.0
        );
        MetricName::JoinRows.increment(outcome.records.len() as u64);
        MetricName::JoinMatched.increment(outcome.matched_rows as u64);
        outcome.summary.log();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quarter;
    use rust_decimal::Decimal;

    fn expense(id: &str) -> ExpenseRecord {
        ExpenseRecord {
            registry_id: id.to_string(),
            account_code: "411".to_string(),
            year: Some(2025),
            quarter: Quarter::Q1,
            expense_value: Decimal::new(100, 0),
        }
    }

    fn entry(id: &str, name: &str) -> OperatorRegistryEntry {
        OperatorRegistryEntry {
            registry_id: id.to_string(),
            legal_name: name.to_string(),
            state_code: "SP".to_string(),
            tax_id: "00000000000100".to_string(),
            business_type: "Cooperativa Médica".to_string(),
        }
    }

    #[test]
    fn duplicate_registry_key_fans_out_and_warns() {
        let registry = vec![entry("123", "Operadora A"), entry("123", "Operadora A Filial")];
        let outcome = RegistryJoiner::new(DuplicatePolicy::Warn).join(vec![expense("123")], &registry);

        assert_eq!(outcome.records.len(), 2);
        let warning = outcome.warning.expect("warning expected");
        assert_eq!(warning.duplicate_count, 1);
        assert_eq!(warning.duplicate_keys, vec!["123".to_string()]);
        assert!(!warning.deduplicated);
        assert!(warning.message().contains("inflating totals"));
    }

    #[test]
    fn drop_duplicates_policy_keeps_first_entry() {
        let registry = vec![entry("123", "First"), entry("123", "Second")];
        let outcome =
            RegistryJoiner::new(DuplicatePolicy::DropDuplicates).join(vec![expense("123")], &registry);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].legal_name.as_deref(), Some("First"));
        assert!(outcome.warning.unwrap().deduplicated);
    }

    #[test]
    fn left_join_keeps_unmatched_rows_and_reports_match_rate() {
        let registry = vec![entry("1", "Operadora Um")];
        let outcome = RegistryJoiner::new(DuplicatePolicy::Warn).join(
            vec![expense("1"), expense("2"), expense(""), expense("1")],
            &registry,
        );

        assert_eq!(outcome.records.len(), 4);
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.matched_rows, 2);
        assert!((outcome.match_rate() - 0.5).abs() < f64::EPSILON);
        assert!(!outcome.records[1].is_matched());
        assert_eq!(outcome.records[1].expense.registry_id, "2");
        assert_eq!(outcome.summary.skipped, 0);
        assert!(outcome.summary.notes[0].starts_with("2 ledger rows"));
    }

    #[test]
    fn empty_ledger_has_zero_match_rate() {
        let outcome = RegistryJoiner::new(DuplicatePolicy::Warn).join(Vec::new(), &[]);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.match_rate(), 0.0);
    }
}
