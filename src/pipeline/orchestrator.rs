use crate::app::ports::HttpClientPort;
use crate::config::Config;
use crate::constants::{
    AGGREGATE_FILENAME, JOINED_FILENAME, LEDGER_ARCHIVE_FILENAME, LEDGER_FILENAME,
    REPORT_FILENAME,
};
use crate::error::{PipelineError, Result};
use crate::observability::time_stage;
use crate::pipeline::ingestion::{
    collect_extracted, ensure_registry, ArchiveFetcher, CrawlResult, IndexCrawler,
};
use crate::pipeline::processing::{
    aggregate, deduplicate, JoinIntegrityWarning, QuarterConsolidator, RegistryJoiner,
};
use crate::pipeline::storage::{
    read_joined, read_ledger, read_registry, write_aggregates, write_joined, write_ledger,
    zip_artifact,
};
use crate::pipeline::summary::StageSummary;
use crate::types::{AggregateRecord, ExpenseRecord, JoinedRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Where one discovered archive came from and what was staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveProvenance {
    pub file_name: String,
    pub url: String,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    pub error: Option<String>,
}

/// Everything a caller needs to judge a run: per-stage summaries, the
/// join warning, artifacts written and the terminal error if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub year: Option<String>,
    pub archives: Vec<ArchiveProvenance>,
    pub stages: Vec<StageSummary>,
    pub join_warning: Option<JoinIntegrityWarning>,
    pub match_rate: Option<f64>,
    pub artifacts: BTreeMap<String, PathBuf>,
    pub error: Option<String>,
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            year: None,
            archives: Vec::new(),
            stages: Vec::new(),
            join_warning: None,
            match_rate: None,
            artifacts: BTreeMap::new(),
            error: None,
        }
    }

    pub fn finish<T>(&mut self, result: &Result<T>) {
        self.finished_at = Some(Utc::now());
        if let Err(e) = result {
            self.error = Some(format!("{}: {}", e.kind(), e));
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

/// Runs the stages in order, each consuming its predecessor's artifact.
pub struct PipelineOrchestrator {
    config: Config,
    http: Arc<dyn HttpClientPort>,
}

impl PipelineOrchestrator {
    pub fn new(config: Config, http: Arc<dyn HttpClientPort>) -> Self {
        Self { config, http }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.config.paths.output_dir.join(LEDGER_FILENAME)
    }

    pub fn joined_path(&self) -> PathBuf {
        self.config.paths.output_dir.join(JOINED_FILENAME)
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.config.paths.output_dir.join(AGGREGATE_FILENAME)
    }

    fn fetcher(&self) -> ArchiveFetcher {
        ArchiveFetcher::new(
            Arc::clone(&self.http),
            &self.config.paths.staging_dir,
            self.config.http.max_concurrent_downloads,
            Duration::from_secs(self.config.http.timeout_seconds),
        )
    }

    /// Resolves the latest year and its archive links, trimmed to the last
    /// `archive_limit` entries when configured.
    pub async fn crawl(&self, report: &mut PipelineReport) -> Result<CrawlResult> {
        let _timer = time_stage("crawl");
        let crawler = IndexCrawler::new(Arc::clone(&self.http), &self.config.source.index_url);
        let mut result = crawler.crawl().await?;
        report.year = Some(result.year.clone());

        let mut summary = StageSummary::new("crawl");
        if let Some(limit) = self.config.consolidation.archive_limit {
            if result.archives.len() > limit {
                let dropped = result.archives.len() - limit;
                result.archives.drain(..dropped);
                summary.record_skips("archive_limit", dropped);
            }
        }
        summary.record_skips("unsafe_archive_name", result.rejected);
        summary.record_processed(result.archives.len());
        summary.note(format!("year {}", result.year));
        summary.log();
        report.stages.push(summary);

        if result.archives.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no archives listed under {}",
                result.year_url
            )));
        }
        Ok(result)
    }

    /// Downloads and unpacks the crawled archives. Aborts only when no
    /// archive could be downloaded or none held a delimited file.
    pub async fn fetch(&self, crawl: &CrawlResult, report: &mut PipelineReport) -> Result<Vec<PathBuf>> {
        let _timer = time_stage("fetch");
        let fetcher = self.fetcher();
        let outcome = fetcher.fetch_all(&crawl.archives).await?;

        for staged in &outcome.staged {
            report.archives.push(ArchiveProvenance {
                file_name: staged.file_name.clone(),
                url: crawl
                    .archives
                    .iter()
                    .find(|l| l.file_name == staged.file_name)
                    .map(|l| l.url.clone())
                    .unwrap_or_default(),
                size_bytes: Some(staged.size_bytes),
                sha256: Some(staged.sha256.clone()),
                error: None,
            });
        }
        for failure in &outcome.failures {
            report.archives.push(ArchiveProvenance {
                file_name: failure.file_name.clone(),
                url: failure.url.clone(),
                size_bytes: None,
                sha256: None,
                error: Some(failure.reason.clone()),
            });
        }
        report.stages.push(outcome.summary.clone());

        if outcome.staged.is_empty() {
            return Err(PipelineError::fetch(
                &crawl.year_url,
                format!("none of {} archives could be downloaded", crawl.archives.len()),
            ));
        }
        if !outcome.failures.is_empty() {
            warn!(
                "{} of {} archives failed to download",
                outcome.failures.len(),
                crawl.archives.len()
            );
        }

        let extracted = fetcher.extract_all(&outcome.staged);
        report.stages.push(extracted.summary);
        if extracted.files.is_empty() {
            return Err(PipelineError::NotFound(
                "downloaded archives contain no delimited text files".to_string(),
            ));
        }
        Ok(extracted.files)
    }

    /// Consolidates, deduplicates and persists the ledger (plain and zipped).
    pub fn consolidate(
        &self,
        files: &[PathBuf],
        crawled_year: Option<i32>,
        report: &mut PipelineReport,
    ) -> Result<Vec<ExpenseRecord>> {
        let _timer = time_stage("consolidate");
        let settings = &self.config.consolidation;
        let consolidator = QuarterConsolidator::new(
            settings.value_derivation,
            crawled_year.or(settings.fallback_year),
        );
        let mut summary = StageSummary::new("consolidate");
        let records = match consolidator.consolidate_into(files, &mut summary) {
            Ok((records, _)) => records,
            Err(e) => {
                report.stages.push(summary);
                return Err(e);
            }
        };

        let (records, dropped) = deduplicate(records);
        summary.record_skips("duplicate_key", dropped);
        if records.is_empty() {
            warn!("Consolidation produced an empty ledger");
            summary.note("ledger is empty");
        }
        report.stages.push(summary);

        let ledger_path = self.ledger_path();
        write_ledger(&ledger_path, &records)?;
        let archive_path = self.config.paths.output_dir.join(LEDGER_ARCHIVE_FILENAME);
        zip_artifact(&ledger_path, &archive_path)?;
        report.artifacts.insert("ledger".to_string(), ledger_path);
        report.artifacts.insert("ledger_archive".to_string(), archive_path);
        Ok(records)
    }

    /// Consolidates whatever an earlier `fetch` left in the staging directory.
    pub fn consolidate_staged(&self, report: &mut PipelineReport) -> Result<Vec<ExpenseRecord>> {
        let files = collect_extracted(&self.config.paths.staging_dir)?;
        info!("Found {} extracted files in staging", files.len());
        self.consolidate(&files, None, report)
    }

    /// Joins the ledger against the registry, downloading the registry if
    /// it is not present yet, and persists the joined ledger.
    pub async fn join(
        &self,
        ledger: Vec<ExpenseRecord>,
        report: &mut PipelineReport,
    ) -> Result<Vec<JoinedRecord>> {
        let _timer = time_stage("join");
        let registry_path = self.config.registry_path();
        let downloaded =
            ensure_registry(&self.fetcher(), &self.config.source.registry_url, &registry_path)
                .await?;
        let (registry, registry_summary) = read_registry(&registry_path)?;
        report.stages.push(registry_summary);
        if downloaded {
            report.artifacts.insert("registry".to_string(), registry_path);
        }

        let outcome = RegistryJoiner::new(self.config.join.duplicate_policy).join(ledger, &registry);
        report.match_rate = Some(outcome.match_rate());
        report.join_warning = outcome.warning.clone();
        report.stages.push(outcome.summary);

        let joined_path = self.joined_path();
        write_joined(&joined_path, &outcome.records)?;
        report.artifacts.insert("joined".to_string(), joined_path);
        Ok(outcome.records)
    }

    /// Joins the ledger artifact written by an earlier `consolidate`.
    pub async fn join_saved(&self, report: &mut PipelineReport) -> Result<Vec<JoinedRecord>> {
        let (ledger, summary) = read_ledger(&self.ledger_path())?;
        report.stages.push(summary);
        self.join(ledger, report).await
    }

    pub fn aggregate(
        &self,
        joined: &[JoinedRecord],
        report: &mut PipelineReport,
    ) -> Result<Vec<AggregateRecord>> {
        let _timer = time_stage("aggregate");
        let outcome = aggregate(joined)?;
        report.stages.push(outcome.summary);

        let path = self.aggregate_path();
        write_aggregates(&path, &outcome.records)?;
        report.artifacts.insert("aggregates".to_string(), path);
        Ok(outcome.records)
    }

    /// Aggregates the joined artifact written by an earlier `join`.
    pub fn aggregate_saved(&self, report: &mut PipelineReport) -> Result<Vec<AggregateRecord>> {
        let (joined, summary) = read_joined(&self.joined_path())?;
        report.stages.push(summary);
        self.aggregate(&joined, report)
    }

    /// Full run: crawl, fetch, consolidate, join, aggregate.
    pub async fn run(&self, report: &mut PipelineReport) -> Result<Vec<AggregateRecord>> {
        let _timer = time_stage("run");
        info!(run_id = %report.run_id, "Starting pipeline run");
        let crawl = self.crawl(report).await?;
        let files = self.fetch(&crawl, report).await?;
        let ledger = self.consolidate(&files, crawl.year.parse().ok(), report)?;
        let joined = self.join(ledger, report).await?;
        let aggregates = self.aggregate(&joined, report)?;
        info!(
            run_id = %report.run_id,
            groups = aggregates.len(),
            "Pipeline run finished"
        );
        Ok(aggregates)
    }

    /// Writes `run_report.json` into the output directory.
    pub fn write_report(&self, report: &PipelineReport) -> Result<PathBuf> {
        let path = self.config.paths.output_dir.join(REPORT_FILENAME);
        write_json(&path, report)?;
        if let Some(e) = &report.error {
            error!(run_id = %report.run_id, "Run failed: {}", e);
        }
        Ok(path)
    }
}

fn write_json(path: &Path, report: &PipelineReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}
