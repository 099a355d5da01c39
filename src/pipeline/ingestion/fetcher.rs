use crate::app::ports::HttpClientPort;
use crate::error::{PipelineError, Result};
use crate::observability::MetricName;
use crate::pipeline::ingestion::crawler::{is_plain_file_name, ArchiveLink};
use crate::pipeline::summary::StageSummary;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// An archive saved to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub file_name: String,
    pub url: String,
    pub reason: String,
}

/// Best-effort batch result: the caller decides whether enough succeeded.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub staged: Vec<StagedArchive>,
    pub failures: Vec<FetchFailure>,
    pub summary: StageSummary,
}

#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub files: Vec<PathBuf>,
    pub summary: StageSummary,
}

pub struct ArchiveFetcher {
    http: Arc<dyn HttpClientPort>,
    staging_dir: PathBuf,
    max_concurrent: usize,
    timeout: Duration,
}

impl ArchiveFetcher {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        staging_dir: impl Into<PathBuf>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            staging_dir: staging_dir.into(),
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Downloads one URL; a non-success status is a `FetchError`.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        download_with_timeout(self.http.as_ref(), url, self.timeout).await
    }

    /// Downloads every link concurrently into the staging directory.
    /// Individual failures are collected, never raised.
    pub async fn fetch_all(&self, links: &[ArchiveLink]) -> Result<FetchOutcome> {
        fs::create_dir_all(&self.staging_dir)?;
        let mut summary = StageSummary::new("fetch");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        let mut failures = Vec::new();
        for link in links.iter().cloned() {
            if !is_plain_file_name(&link.file_name) {
                warn!("Refusing to stage {}: not a plain file name", link.file_name);
                MetricName::DownloadsError.increment(1);
                summary.record_skip("unsafe_name");
                failures.push(FetchFailure {
                    reason: format!("unsafe archive name '{}'", link.file_name),
                    file_name: link.file_name,
                    url: link.url,
                });
                continue;
            }
            let http = Arc::clone(&self.http);
            let semaphore = Arc::clone(&semaphore);
            let target = self.staging_dir.join(&link.file_name);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = stage_one(http.as_ref(), &link.url, &target, timeout).await;
                (link, target, result)
            });
        }

        let mut staged = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((link, target, Ok((size_bytes, sha256)))) => {
                    info!("Downloaded {} ({} bytes)", link.file_name, size_bytes);
                    MetricName::DownloadsSuccess.increment(1);
                    MetricName::DownloadBytes.record(size_bytes as f64);
                    summary.record_processed(1);
                    staged.push(StagedArchive {
                        file_name: link.file_name,
                        path: target,
                        size_bytes,
                        sha256,
                    });
                }
                Ok((link, _, Err(e))) => {
                    warn!("Failed to download {}: {}", link.file_name, e);
                    MetricName::DownloadsError.increment(1);
                    summary.record_skip(e.kind());
                    failures.push(FetchFailure {
                        file_name: link.file_name,
                        url: link.url,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Download task aborted: {}", e);
                    MetricName::DownloadsError.increment(1);
                    summary.record_skip("task_aborted");
                }
            }
        }

        staged.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        failures.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        summary.log();
        Ok(FetchOutcome {
            staged,
            failures,
            summary,
        })
    }

    /// Unpacks every staged archive under `<staging>/extracted/<archive stem>/`
    /// and returns the delimited-text members. Whatever an earlier run left
    /// under `extracted/` is removed first. A corrupt archive or member
    /// fails alone; everything extracted before it stays valid.
    pub fn extract_all(&self, staged: &[StagedArchive]) -> ExtractOutcome {
        let mut summary = StageSummary::new("extract");
        let mut files = Vec::new();

        let root = self.staging_dir.join("extracted");
        match fs::remove_dir_all(&root) {
            Ok(()) => debug!("Cleared previous extraction at {}", root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not clear {}: {}", root.display(), e);
                summary.note(format!("stale files may remain under {}: {}", root.display(), e));
            }
        }

        for archive in staged {
            let stem = Path::new(&archive.file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| archive.file_name.clone());
            let dest = root.join(stem);
            match extract_archive(&archive.path, &dest, &mut summary) {
                Ok(mut extracted) => files.append(&mut extracted),
                Err(e) => {
                    warn!("Could not open archive {}: {}", archive.file_name, e);
                    summary.record_skip(e.kind());
                }
            }
        }

        files.sort();
        summary.log();
        ExtractOutcome { files, summary }
    }
}

/// Delimited-text files left under `<staging>/extracted/` by the last `extract_all`.
pub fn collect_extracted(staging_dir: &Path) -> Result<Vec<PathBuf>> {
    let root = staging_dir.join("extracted");
    if !root.is_dir() {
        return Err(PipelineError::NotFound(format!(
            "no extracted disclosure files under {}",
            root.display()
        )));
    }
    let mut files = Vec::new();
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .map_or(false, |n| is_delimited_text(&n.to_string_lossy()))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

async fn download_with_timeout(
    http: &dyn HttpClientPort,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let response = tokio::time::timeout(timeout, http.get(url))
        .await
        .map_err(|_| PipelineError::fetch(url, format!("timed out after {:?}", timeout)))??;
    if !response.is_success() {
        return Err(PipelineError::fetch(
            url,
            format!("download failed with status: {}", response.status),
        ));
    }
    Ok(response.bytes)
}

async fn stage_one(
    http: &dyn HttpClientPort,
    url: &str,
    target: &Path,
    timeout: Duration,
) -> Result<(u64, String)> {
    let bytes = download_with_timeout(http, url, timeout).await?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    tokio::fs::write(target, &bytes).await?;
    Ok((bytes.len() as u64, sha256))
}

fn is_delimited_text(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".csv") || lower.ends_with(".txt")
}

fn extract_archive(path: &Path, dest: &Path, summary: &mut StageSummary) -> Result<Vec<PathBuf>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest)?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut member = match archive.by_index(i) {
            Ok(member) => member,
            Err(e) => {
                warn!("Skipping member {} of {}: {}", i, path.display(), e);
                MetricName::MembersError.increment(1);
                summary.record_skip("archive_error");
                continue;
            }
        };
        if member.is_dir() {
            continue;
        }
        let Some(relative) = member.enclosed_name() else {
            warn!("Skipping member with unsafe path: {}", member.name());
            summary.record_skip("unsafe_path");
            continue;
        };
        let member_name = member.name().to_string();
        if !is_delimited_text(&member_name) {
            summary.record_skip("not_delimited_text");
            continue;
        }

        let out_path = dest.join(relative);
        let written = out_path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| File::create(&out_path))
            .and_then(|mut out| io::copy(&mut member, &mut out));
        match written {
            Ok(_) => {
                MetricName::MembersExtracted.increment(1);
                summary.record_processed(1);
                extracted.push(out_path);
            }
            Err(e) => {
                warn!("Failed to extract {}: {}", member_name, e);
                MetricName::MembersError.increment(1);
                let _ = fs::remove_file(&out_path);
                summary.record_skip("archive_error");
            }
        }
    }

    Ok(extracted)
}
