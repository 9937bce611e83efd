//! SecDigest Ingestion Stages
//!
//! Everything between the search feed and a classified record:
//! 1. Paginated feed search with a per-query completion cache
//! 2. Feed decoding, candidate insertion and pruning
//! 3. Concurrent document download
//! 4. PDF extraction and model summarization
//! 5. Relevance and project classification

pub mod classifier;
pub mod download;
pub mod feed;
pub mod pdf;
pub mod prompts;
pub mod search;
pub mod summarizer;

pub use classifier::{classify_projects, classify_relevance, reclassify_projects};
pub use download::{download_many, download_one, DocumentFetcher, DownloadReport, HttpFetcher};
pub use feed::{assemble_feeds, prune_feeds};
pub use pdf::{PdfExtractor, TextExtractor};
pub use search::{execute_searches, ArxivClient, FeedSource, SearchOptions};
pub use summarizer::{assemble_records, summarize_records, SummarizerOptions};

/// Counts reported by a record-processing stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Records visited
    pub processed: usize,
    /// Records written back
    pub updated: usize,
    /// Records whose item failed (skipped, or defaulted for classifiers)
    pub skipped: usize,
}
