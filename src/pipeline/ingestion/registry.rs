use crate::error::Result;
use crate::pipeline::ingestion::fetcher::ArchiveFetcher;
use std::path::Path;
use tracing::info;

/// Makes sure the operator registry file exists locally, downloading it
/// from `url` only when absent. Returns whether a download happened.
pub async fn ensure_registry(fetcher: &ArchiveFetcher, url: &str, path: &Path) -> Result<bool> {
    if path.exists() {
        info!("Reusing operator registry at {}", path.display());
        return Ok(false);
    }

    info!("Downloading operator registry from {}", url);
    let bytes = fetcher.download(url).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &bytes).await?;
    info!("Saved operator registry ({} bytes) to {}", bytes.len(), path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpClientPort, HttpGetResult};
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    struct CountingHttp {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClientPort for CountingHttp {
        async fn get(&self, _url: &str) -> Result<HttpGetResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = b"REGISTRO_OPERADORA;CNPJ;Razao_Social;Modalidade;UF\n".to_vec();
            Ok(HttpGetResult {
                status: self.status,
                content_length: body.len() as u64,
                bytes: body,
                content_type: "text/csv".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn downloads_once_then_reuses() {
        let dir = tempdir().unwrap();
        let http = Arc::new(CountingHttp {
            status: 200,
            calls: AtomicUsize::new(0),
        });
        let fetcher = ArchiveFetcher::new(http.clone(), dir.path(), 1, Duration::from_secs(5));
        let path = dir.path().join("out").join("Relatorio_cadop.csv");

        assert!(ensure_registry(&fetcher, "https://host/cadop.csv", &path).await.unwrap());
        assert!(!ensure_registry(&fetcher, "https://host/cadop.csv", &path).await.unwrap());
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn failed_registry_download_is_fetch_error() {
        let dir = tempdir().unwrap();
        let http = Arc::new(CountingHttp {
            status: 500,
            calls: AtomicUsize::new(0),
        });
        let fetcher = ArchiveFetcher::new(http, dir.path(), 1, Duration::from_secs(5));
        let path = dir.path().join("Relatorio_cadop.csv");

        let err = ensure_registry(&fetcher, "https://host/cadop.csv", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { .. }));
        assert!(!path.exists());
    }
}
