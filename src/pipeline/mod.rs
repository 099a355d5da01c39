// Data consolidation pipeline: ingestion, processing, and storage stages

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod storage;
pub mod summary;

// Re-export key types from each stage
pub use orchestrator::{PipelineOrchestrator, PipelineReport};
pub use summary::StageSummary;
