// Observability: metrics helpers (logging lives in crate::logging)

pub mod metrics;

pub use metrics::{time_stage, MetricName, TimingGuard};
