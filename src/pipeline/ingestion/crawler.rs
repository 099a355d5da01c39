use crate::app::ports::HttpClientPort;
use crate::error::{PipelineError, Result};
use crate::observability::MetricName;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{info, instrument, warn};

static YEAR_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid regex"));
static ARCHIVE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.zip$").expect("valid regex"));

/// One downloadable archive discovered in the year index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLink {
    pub file_name: String,
    pub url: String,
}

/// Result of crawling the regulator's directory listing.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub year: String,
    pub year_url: String,
    pub archives: Vec<ArchiveLink>,
    /// Archive anchors dropped because their text is not a plain file name.
    pub rejected: usize,
}

pub struct IndexCrawler {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
}

impl IndexCrawler {
    pub fn new(http: Arc<dyn HttpClientPort>, base_url: &str) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
        }
    }

    /// Resolves the most recent year directory and lists its archives.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn crawl(&self) -> Result<CrawlResult> {
        let index_html = self.fetch_page(&self.base_url).await?;
        let year = latest_year(&index_html)?;
        let year_url = format!("{}{}/", self.base_url, year);
        info!("Latest disclosure year: {} ({})", year, year_url);

        let year_html = self.fetch_page(&year_url).await?;
        let (archives, rejected) = archive_links(&year_html, &year_url);
        info!("Found {} archive links for {}", archives.len(), year);

        Ok(CrawlResult {
            year,
            year_url,
            archives,
            rejected,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        MetricName::IndexFetches.increment(1);
        let response = self.http.get(url).await?;
        if !response.is_success() {
            return Err(PipelineError::fetch(
                url,
                format!("index request failed with status: {}", response.status),
            ));
        }
        Ok(response.text())
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

fn anchor_texts(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchor = Selector::parse("a").expect("static selector");
    document
        .select(&anchor)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

/// Picks the numerically largest digit-only anchor (trailing `/` ignored).
pub fn latest_year(html: &str) -> Result<String> {
    anchor_texts(html)
        .into_iter()
        .map(|text| text.trim_end_matches('/').to_string())
        .filter(|text| YEAR_DIR.is_match(text))
        .filter_map(|text| text.parse::<u64>().ok().map(|n| (n, text)))
        .max_by_key(|(n, _)| *n)
        .map(|(_, text)| text)
        .ok_or_else(|| PipelineError::NotFound("no year directories in index listing".to_string()))
}

/// True when `name` names a file inside a directory and nothing else:
/// no separators, no parent references, not empty.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}

/// Lists anchors whose text ends in `.zip`, resolved against `base_url`.
/// Anchors that are not plain file names are dropped and counted.
pub fn archive_links(html: &str, base_url: &str) -> (Vec<ArchiveLink>, usize) {
    let base = with_trailing_slash(base_url);
    let mut rejected = 0;
    let links = anchor_texts(html)
        .into_iter()
        .filter(|text| ARCHIVE_LINK.is_match(text))
        .filter(|text| {
            let plain = is_plain_file_name(text);
            if !plain {
                warn!("Ignoring archive link with unsafe name: {}", text);
                rejected += 1;
            }
            plain
        })
        .map(|file_name| ArchiveLink {
            url: format!("{}{}", base, file_name),
            file_name,
        })
        .collect();
    (links, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpGetResult;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const ROOT_INDEX: &str = r#"<html><body><h1>Index of /demonstracoes_contabeis</h1>
        <table>
        <tr><td><a href="/FTP/PDA/">Parent Directory</a></td></tr>
        <tr><td><a href="2007/">2007/</a></td></tr>
        <tr><td><a href="2024/">2024/</a></td></tr>
        <tr><td><a href="2025/">2025/</a></td></tr>
        <tr><td><a href="2009/">2009/</a></td></tr>
        <tr><td><a href="leiame.txt">leiame.txt</a></td></tr>
        </table></body></html>"#;

    const YEAR_INDEX: &str = r#"<html><body>
        <a href="../">Parent Directory</a>
        <a href="1T2025.zip">1T2025.zip</a>
        <a href="2T2025.zip">2T2025.zip</a>
        <a href="notes.pdf">notes.pdf</a>
        </body></html>"#;

    struct FakeHttp {
        pages: HashMap<String, (u16, String)>,
    }

    #[async_trait]
    impl HttpClientPort for FakeHttp {
        async fn get(&self, url: &str) -> Result<HttpGetResult> {
            let (status, body) = self
                .pages
                .get(url)
                .cloned()
                .ok_or_else(|| PipelineError::fetch(url, "connection refused"))?;
            Ok(HttpGetResult {
                status,
                content_length: body.len() as u64,
                bytes: body.into_bytes(),
                content_type: "text/html".to_string(),
            })
        }
    }

    #[test]
    fn picks_numerically_latest_year() {
        assert_eq!(latest_year(ROOT_INDEX).unwrap(), "2025");
    }

    #[test]
    fn empty_listing_is_not_found() {
        let html = r#"<a href="../">Parent Directory</a><a href="x.txt">x.txt</a>"#;
        assert!(matches!(latest_year(html), Err(PipelineError::NotFound(_))));
        assert!(matches!(latest_year(""), Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn lists_only_zip_archives() {
        let (links, rejected) = archive_links(YEAR_INDEX, "https://host/dc/2025");
        assert_eq!(rejected, 0);
        assert_eq!(
            links,
            vec![
                ArchiveLink {
                    file_name: "1T2025.zip".to_string(),
                    url: "https://host/dc/2025/1T2025.zip".to_string(),
                },
                ArchiveLink {
                    file_name: "2T2025.zip".to_string(),
                    url: "https://host/dc/2025/2T2025.zip".to_string(),
                },
            ]
        );
    }

    #[test]
    fn archive_names_with_path_components_are_rejected() {
        let html = r#"<a href="x">../../escaped.zip</a>
            <a href="y">/etc/cron.zip</a>
            <a href="z">sub\dir.zip</a>
            <a href="1T2025.zip">1T2025.zip</a>"#;
        let (links, rejected) = archive_links(html, "https://host/dc/2025/");
        assert_eq!(rejected, 3);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].file_name, "1T2025.zip");
        assert!(!is_plain_file_name(".."));
        assert!(is_plain_file_name("4T2024.zip"));
    }

    #[tokio::test]
    async fn crawl_resolves_year_then_archives() {
        let mut pages = HashMap::new();
        pages.insert("https://host/dc/".to_string(), (200, ROOT_INDEX.to_string()));
        pages.insert("https://host/dc/2025/".to_string(), (200, YEAR_INDEX.to_string()));
        let crawler = IndexCrawler::new(Arc::new(FakeHttp { pages }), "https://host/dc");

        let result = crawler.crawl().await.unwrap();
        assert_eq!(result.year, "2025");
        assert_eq!(result.year_url, "https://host/dc/2025/");
        assert_eq!(result.archives.len(), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_error() {
        let mut pages = HashMap::new();
        pages.insert("https://host/dc/".to_string(), (503, String::new()));
        let crawler = IndexCrawler::new(Arc::new(FakeHttp { pages }), "https://host/dc/");

        let err = crawler.crawl().await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { .. }));
    }

    #[tokio::test]
    async fn transport_error_is_fetch_error() {
        let crawler = IndexCrawler::new(
            Arc::new(FakeHttp {
                pages: HashMap::new(),
            }),
            "https://unreachable/",
        );
        assert!(matches!(crawler.crawl().await, Err(PipelineError::Fetch { .. })));
    }
}
