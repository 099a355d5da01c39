use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Fiscal quarter inferred from a disclosure filename.
///
/// `Unknown` is a real state: a file whose name carries no quarter marker
/// must never be silently attributed to Q1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
    Unknown,
}

impl Quarter {
    pub fn from_number(n: u8) -> Self {
        match n {
            1 => Quarter::Q1,
            2 => Quarter::Q2,
            3 => Quarter::Q3,
            4 => Quarter::Q4,
            _ => Quarter::Unknown,
        }
    }

    pub fn number(&self) -> Option<u8> {
        match self {
            Quarter::Q1 => Some(1),
            Quarter::Q2 => Some(2),
            Quarter::Q3 => Some(3),
            Quarter::Q4 => Some(4),
            Quarter::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Quarter::Unknown)
    }

    /// Parses the `TRIMESTRE` artifact column; blank means unknown.
    pub fn parse_field(raw: &str) -> Self {
        raw.trim()
            .parse::<u8>()
            .map(Quarter::from_number)
            .unwrap_or(Quarter::Unknown)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(n) => write!(f, "{}", n),
            None => Ok(()),
        }
    }
}

/// One delimited file extracted from a disclosure archive.
#[derive(Debug, Clone)]
pub struct DisclosureFile {
    pub path: PathBuf,
    pub filename: String,
    pub year: Option<i32>,
    pub quarter: Quarter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub registry_id: String,
    pub account_code: String,
    pub year: Option<i32>,
    pub quarter: Quarter,
    pub expense_value: Decimal,
}

impl ExpenseRecord {
    /// Natural key used for deduplication.
    pub fn key(&self) -> (&str, &str, Option<i32>, Quarter) {
        (&self.registry_id, &self.account_code, self.year, self.quarter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRegistryEntry {
    pub registry_id: String,
    pub legal_name: String,
    pub state_code: String,
    pub tax_id: String,
    pub business_type: String,
}

pub(crate) fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Ledger row enriched from the registry; enrichment is `None` when no
/// registry entry matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub expense: ExpenseRecord,
    pub tax_id: Option<String>,
    pub legal_name: Option<String>,
    pub business_type: Option<String>,
    pub state_code: Option<String>,
}

impl JoinedRecord {
    pub fn unmatched(expense: ExpenseRecord) -> Self {
        Self {
            expense,
            tax_id: None,
            legal_name: None,
            business_type: None,
            state_code: None,
        }
    }

    /// Blank registry fields become `None`, the same shape a blank column
    /// takes when the joined artifact is read back.
    pub fn enriched(expense: ExpenseRecord, entry: &OperatorRegistryEntry) -> Self {
        Self {
            expense,
            tax_id: non_blank(&entry.tax_id),
            legal_name: non_blank(&entry.legal_name),
            business_type: non_blank(&entry.business_type),
            state_code: non_blank(&entry.state_code),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.legal_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub legal_name: String,
    pub state_code: String,
    pub total_expenses: Decimal,
    pub quarterly_mean: Option<Decimal>,
    pub std_dev: Option<Decimal>,
    pub coefficient_of_variation: Option<Decimal>,
}
