use crate::error::{PipelineError, Result};
use crate::observability::MetricName;
use crate::pipeline::summary::StageSummary;
use crate::types::{AggregateRecord, JoinedRecord, Quarter};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub records: Vec<AggregateRecord>,
    /// Account-code length the rows were filtered to.
    pub account_code_length: usize,
    pub summary: StageSummary,
}

#[derive(Debug, Default)]
struct GroupTotals {
    total: Decimal,
    by_quarter: BTreeMap<(Option<i32>, Quarter), Decimal>,
}

fn code_length(code: &str) -> usize {
    code.trim().chars().count()
}

/// Per-operator statistics over the most granular account rows.
///
/// Parent accounts roll up their children, so only codes of the maximum
/// observed length are summed. The mean and standard deviation are taken
/// over per-quarter sums, not over raw rows.
pub fn aggregate(joined: &[JoinedRecord]) -> Result<AggregateOutcome> {
    if joined.is_empty() {
        return Err(PipelineError::Aggregation("joined ledger is empty".to_string()));
    }

    let mut summary = StageSummary::new("aggregate");
    let max_len = joined
        .iter()
        .map(|r| code_length(&r.expense.account_code))
        .max()
        .unwrap_or(0);
    debug!("Most granular account code length: {}", max_len);

    let mut groups: BTreeMap<(String, String), GroupTotals> = BTreeMap::new();
    let mut unknown_quarter_rows = 0;
    for row in joined {
        if code_length(&row.expense.account_code) != max_len {
            summary.record_skip("summary_account");
            continue;
        }
        let (Some(name), Some(state)) = (&row.legal_name, &row.state_code) else {
            summary.record_skip("unmatched_registry_id");
            continue;
        };

        let group = groups.entry((name.clone(), state.clone())).or_default();
        group.total += row.expense.expense_value;
        if row.expense.quarter.is_known() {
            *group
                .by_quarter
                .entry((row.expense.year, row.expense.quarter))
                .or_insert(Decimal::ZERO) += row.expense.expense_value;
        } else {
            unknown_quarter_rows += 1;
        }
        summary.record_processed(1);
    }

    if unknown_quarter_rows > 0 {
        summary.note(format!(
            "{} rows with unknown quarter counted in totals only",
            unknown_quarter_rows
        ));
    }

    if groups.is_empty() {
        return Err(PipelineError::Aggregation(format!(
            "no registry-matched rows at account code length {}",
            max_len
        )));
    }

    let mut records: Vec<AggregateRecord> = groups
        .into_iter()
        .map(|((legal_name, state_code), totals)| summarize_group(legal_name, state_code, totals))
        .collect();

    records.sort_by(|a, b| {
        b.total_expenses
            .cmp(&a.total_expenses)
            .then_with(|| a.legal_name.cmp(&b.legal_name))
            .then_with(|| a.state_code.cmp(&b.state_code))
    });

    info!(
        "Aggregated {} operator/state groups from {} rows",
        records.len(),
        summary.processed
    );
    MetricName::AggregateGroups.set(records.len() as f64);
    summary.log();
    Ok(AggregateOutcome {
        records,
        account_code_length: max_len,
        summary,
    })
}

fn summarize_group(legal_name: String, state_code: String, totals: GroupTotals) -> AggregateRecord {
    let quarterly: Vec<Decimal> = totals.by_quarter.into_values().collect();
    let mean = quarterly_mean(&quarterly);
    let std_dev = mean.and_then(|m| sample_std_dev(&quarterly, m));
    let coefficient_of_variation = match (std_dev, mean) {
        (Some(sd), Some(m)) if !m.is_zero() => sd
            .checked_div(m)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map(|cv| cv.round_dp(2)),
        _ => None,
    };

    AggregateRecord {
        legal_name,
        state_code,
        total_expenses: totals.total.round_dp(2),
        quarterly_mean: mean.map(|m| m.round_dp(2)),
        std_dev: std_dev.map(|sd| sd.round_dp(2)),
        coefficient_of_variation,
    }
}

fn quarterly_mean(sums: &[Decimal]) -> Option<Decimal> {
    if sums.is_empty() {
        return None;
    }
    let total: Decimal = sums.iter().sum();
    total.checked_div(Decimal::from(sums.len()))
}

/// Sample (n - 1) standard deviation; undefined below two observations.
fn sample_std_dev(sums: &[Decimal], mean: Decimal) -> Option<Decimal> {
    if sums.len() < 2 {
        return None;
    }
    let mean = mean.to_f64()?;
    let squared: f64 = sums
        .iter()
        .filter_map(|s| s.to_f64())
        .map(|x| (x - mean).powi(2))
        .sum();
    let sd = (squared / (sums.len() - 1) as f64).sqrt();
    if sd.is_finite() {
        Decimal::from_f64(sd)
    } else {
        None
    }
}
