pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod types;

// Traits at the I/O seams and their adapters
pub mod app;
pub mod infra;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineOrchestrator, PipelineReport};
