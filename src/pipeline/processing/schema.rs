//! Header inspection at the ingestion boundary.
//!
//! Each reader resolves column positions once from the header row; the rest
//! of the stage works from these capabilities instead of probing columns.

use crate::config::ValueDerivation;
use crate::constants::{
    COL_BUSINESS_TYPE, COL_CLOSING_BALANCE, COL_LEGAL_NAME, COL_OPENING_BALANCE, COL_REGISTRY_ID,
    COL_SOURCE_ACCOUNT, COL_SOURCE_REG_ANS, COL_STATE, COL_TAX_ID,
};
use crate::error::{PipelineError, Result};
use csv::StringRecord;

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_ascii_uppercase()
}

/// Position of `name` in `headers`, ignoring case, surrounding whitespace and a BOM.
pub fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    let wanted = name.to_ascii_uppercase();
    headers.iter().position(|h| normalize_header(h) == wanted)
}

/// Trimmed field value, or `""` when the column is absent or the row is short.
pub fn field<'r>(record: &'r StringRecord, index: Option<usize>) -> &'r str {
    index.and_then(|i| record.get(i)).map(str::trim).unwrap_or("")
}

/// Which optional columns a quarterly disclosure file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisclosureSchema {
    pub registry_id: Option<usize>,
    pub account_code: Option<usize>,
    pub opening_balance: Option<usize>,
    pub closing_balance: Option<usize>,
}

impl DisclosureSchema {
    pub fn from_headers(headers: &StringRecord) -> Self {
        Self {
            registry_id: column_index(headers, COL_SOURCE_REG_ANS),
            account_code: column_index(headers, COL_SOURCE_ACCOUNT),
            opening_balance: column_index(headers, COL_OPENING_BALANCE),
            closing_balance: column_index(headers, COL_CLOSING_BALANCE),
        }
    }

    /// Key columns may be missing (rows degrade to empty keys); the balance
    /// columns the derivation reads may not.
    pub fn require(&self, derivation: ValueDerivation) -> Result<()> {
        let mut missing = Vec::new();
        if self.closing_balance.is_none() {
            missing.push(COL_CLOSING_BALANCE);
        }
        if derivation == ValueDerivation::BalanceDelta && self.opening_balance.is_none() {
            missing.push(COL_OPENING_BALANCE);
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Schema(format!(
                "missing balance column(s) {} required by {:?}",
                missing.join(", "),
                derivation
            )))
        }
    }

    pub fn missing_key_columns(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.registry_id.is_none() {
            missing.push(COL_SOURCE_REG_ANS);
        }
        if self.account_code.is_none() {
            missing.push(COL_SOURCE_ACCOUNT);
        }
        missing
    }
}

/// Column positions of the registry projection used by the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySchema {
    pub registry_id: usize,
    pub tax_id: usize,
    pub legal_name: usize,
    pub business_type: usize,
    pub state_code: usize,
}

impl RegistrySchema {
    pub fn from_headers(headers: &StringRecord) -> Result<Self> {
        let lookup = |name: &'static str| column_index(headers, name).ok_or(name);
        match (
            lookup(COL_REGISTRY_ID),
            lookup(COL_TAX_ID),
            lookup(COL_LEGAL_NAME),
            lookup(COL_BUSINESS_TYPE),
            lookup(COL_STATE),
        ) {
            (Ok(registry_id), Ok(tax_id), Ok(legal_name), Ok(business_type), Ok(state_code)) => {
                Ok(Self {
                    registry_id,
                    tax_id,
                    legal_name,
                    business_type,
                    state_code,
                })
            }
            (a, b, c, d, e) => {
                let missing: Vec<&str> = [a, b, c, d, e]
                    .into_iter()
                    .filter_map(|r| r.err())
                    .collect();
                Err(PipelineError::Schema(format!(
                    "operator registry is missing column(s): {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// Column positions of a persisted ledger (plain or joined).
pub fn require_columns(headers: &StringRecord, names: &[&str], artifact: &str) -> Result<Vec<usize>> {
    let mut indices = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match column_index(headers, name) {
            Some(i) => indices.push(i),
            None => missing.push(*name),
        }
    }
    if missing.is_empty() {
        Ok(indices)
    } else {
        Err(PipelineError::Schema(format!(
            "{} is missing column(s): {}",
            artifact,
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cols: &[&str]) -> StringRecord {
        StringRecord::from(cols.to_vec())
    }

    #[test]
    fn detects_optional_columns_with_bom_and_case() {
        let schema = DisclosureSchema::from_headers(&headers(&[
            "\u{feff}DATA",
            "reg_ans",
            " CD_CONTA_CONTABIL ",
            "VL_SALDO_INICIAL",
            "VL_SALDO_FINAL",
        ]));
        assert_eq!(schema.registry_id, Some(1));
        assert_eq!(schema.account_code, Some(2));
        assert_eq!(schema.opening_balance, Some(3));
        assert_eq!(schema.closing_balance, Some(4));
        assert!(schema.missing_key_columns().is_empty());
    }

    #[test]
    fn balance_requirements_follow_derivation() {
        let closing_only = DisclosureSchema::from_headers(&headers(&["REG_ANS", "VL_SALDO_FINAL"]));
        assert!(closing_only
            .require(ValueDerivation::ClosingBalanceMillions)
            .is_ok());
        assert!(matches!(
            closing_only.require(ValueDerivation::BalanceDelta),
            Err(PipelineError::Schema(_))
        ));
        assert_eq!(closing_only.missing_key_columns(), vec![COL_SOURCE_ACCOUNT]);
    }

    #[test]
    fn registry_schema_lists_every_missing_column() {
        let err = RegistrySchema::from_headers(&headers(&["REGISTRO_OPERADORA", "CNPJ"]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Razao_Social"));
        assert!(message.contains("Modalidade"));
        assert!(message.contains("UF"));
    }

    #[test]
    fn field_defaults_to_empty() {
        let record = StringRecord::from(vec![" 123 "]);
        assert_eq!(field(&record, Some(0)), "123");
        assert_eq!(field(&record, Some(5)), "");
        assert_eq!(field(&record, None), "");
    }
}
