//! Regulator-locale amounts: `.` groups thousands, `,` separates decimals.

use crate::error::{PipelineError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parses `"1.234.567,89"` into an exact decimal.
///
/// Empty or whitespace-only input is a `ParseError`; callers for which a
/// blank value is a legitimate zero use [`parse_amount_or_zero`].
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Parse("empty amount".to_string()));
    }
    if trimmed.matches(',').count() > 1 {
        return Err(PipelineError::Parse(format!(
            "more than one decimal separator in '{}'",
            trimmed
        )));
    }

    let normalized: String = trimmed
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    Decimal::from_str(&normalized)
        .map_err(|e| PipelineError::Parse(format!("invalid amount '{}': {}", trimmed, e)))
}

/// Blank input maps to zero; anything non-blank must still parse.
pub fn parse_amount_or_zero(raw: &str) -> Result<Decimal> {
    if raw.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    parse_amount(raw)
}

/// Formats a decimal in the regulator locale without thousands grouping,
/// so the output reads back through [`parse_amount`] unchanged.
pub fn format_amount(value: &Decimal) -> String {
    value.normalize().to_string().replace('.', ",")
}
