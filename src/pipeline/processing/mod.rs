// Pipeline processing: amount parsing, schema checks, consolidation, join, aggregation

pub mod aggregate;
pub mod amount;
pub mod consolidate;
pub mod join;
pub mod schema;

pub use aggregate::{aggregate, AggregateOutcome};
pub use amount::{format_amount, parse_amount, parse_amount_or_zero};
pub use consolidate::{deduplicate, ConsolidationOutcome, QuarterConsolidator};
pub use join::{JoinIntegrityWarning, JoinOutcome, RegistryJoiner};
