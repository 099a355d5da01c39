use crate::constants::{DEFAULT_INDEX_URL, DEFAULT_REGISTRY_URL, REGISTRY_FILENAME};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "ANS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub paths: PathsConfig,
    pub http: HttpConfig,
    pub consolidation: ConsolidationConfig,
    pub join: JoinConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub index_url: String,
    pub registry_url: String,
    pub registry_filename: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            registry_filename: REGISTRY_FILENAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("csv"),
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_concurrent_downloads: usize,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            max_concurrent_downloads: 4,
            user_agent: concat!("ans_ledger/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// How the period expense is derived from the two balance columns.
/// Source data vintages differ, so this is chosen per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDerivation {
    /// closing balance minus opening balance
    #[default]
    BalanceDelta,
    /// closing balance expressed in millions
    ClosingBalanceMillions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub value_derivation: ValueDerivation,
    /// Year used when neither the filename nor the crawled directory carries one.
    pub fallback_year: Option<i32>,
    /// Keep only the last N archives listed for the latest year.
    pub archive_limit: Option<usize>,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            value_derivation: ValueDerivation::BalanceDelta,
            fallback_year: None,
            archive_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Warn about duplicate registry keys and join anyway (rows fan out).
    #[default]
    Warn,
    /// Warn, then keep only the first registry entry per key before joining.
    DropDuplicates,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub duplicate_policy: DuplicatePolicy,
}

impl Config {
    /// Loads from an explicit path, else `$ANS_CONFIG`, else `config.toml`.
    /// A missing file falls back to defaults; a malformed one is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        if !path.exists() {
            if explicit.is_some() {
                return Err(PipelineError::Config(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            info!("No config file at '{}', using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from '{}'", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.index_url.trim().is_empty() {
            return Err(PipelineError::Config("source.index_url must not be empty".into()));
        }
        if self.source.registry_filename.trim().is_empty() {
            return Err(PipelineError::Config("source.registry_filename must not be empty".into()));
        }
        if self.http.timeout_seconds == 0 {
            return Err(PipelineError::Config("http.timeout_seconds must be positive".into()));
        }
        if self.http.max_concurrent_downloads == 0 {
            return Err(PipelineError::Config(
                "http.max_concurrent_downloads must be positive".into(),
            ));
        }
        if self.consolidation.archive_limit == Some(0) {
            return Err(PipelineError::Config("consolidation.archive_limit must be positive".into()));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.paths.output_dir.join(&self.source.registry_filename)
    }
}
