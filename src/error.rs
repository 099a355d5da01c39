use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn fetch(url: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-friendly label, used as the skip reason in stage summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Fetch { .. } => "fetch_error",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Parse(_) => "parse_error",
            PipelineError::Schema(_) => "schema_error",
            PipelineError::Aggregation(_) => "aggregation_error",
            PipelineError::Config(_) => "config_error",
            PipelineError::Io(_) => "io_error",
            PipelineError::Csv(_) => "csv_error",
            PipelineError::Zip(_) => "archive_error",
            PipelineError::Toml(_) => "toml_error",
            PipelineError::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
