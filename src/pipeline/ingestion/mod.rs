// Pipeline ingestion: index crawling, archive download/extraction, registry fetch

pub mod crawler;
pub mod fetcher;
pub mod registry;

pub use crawler::{ArchiveLink, CrawlResult, IndexCrawler};
pub use fetcher::{
    collect_extracted, ArchiveFetcher, ExtractOutcome, FetchFailure, FetchOutcome, StagedArchive,
};
pub use registry::ensure_registry;
