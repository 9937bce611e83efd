//! Stage orchestration
//!
//! Search → assemble → prune → download → summarize → relevance →
//! projects → review → publish. Each stage reads its inputs from the
//! store, so an interrupted run resumes where it stopped.

use crate::cli::RunOptions;
use crate::context::PipelineContext;
use crate::review::ShareReview;
use chrono::{DateTime, Utc};
use secdigest_common::errors::Result;
use secdigest_common::time::window_start;
use secdigest_common::DependentField;
use secdigest_digest::{select_records, share_results, Published, ShareOptions};
use secdigest_ingestion::{
    assemble_feeds, assemble_records, classify_projects, classify_relevance, download_many,
    execute_searches, prune_feeds, reclassify_projects, summarize_records, DownloadReport,
    SearchOptions, StageReport, SummarizerOptions,
};
use tracing::{info, instrument};

/// What one run did
#[derive(Debug, Default)]
pub struct RunReport {
    pub pull_window: String,
    pub payloads: usize,
    pub candidates: usize,
    pub downloads: DownloadReport,
    pub summarized: StageReport,
    pub relevance: StageReport,
    pub projects: StageReport,
    pub published: Option<Published>,
}

#[instrument(skip_all, fields(share_only = options.share_only))]
pub async fn run(
    ctx: &mut PipelineContext,
    options: &RunOptions,
    review: &mut dyn ShareReview,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let days = options.days.unwrap_or(ctx.config.window.process_days);
    let pull_window = window_start(now, days)?;
    info!(window = %pull_window, days, "Starting run");

    let mut report = RunReport {
        pull_window: pull_window.clone(),
        ..RunReport::default()
    };

    if !options.share_only {
        ingest(ctx, options, &pull_window, &mut report).await?;
    }

    if options.reshare {
        ctx.store.clear_field(&pull_window, DependentField::Shared)?;
    }

    let share_options = ShareOptions {
        include_all: options.include_all,
        include_shared: false,
    };
    let selected = select_records(&ctx.store, &pull_window, share_options);
    if selected.is_empty() {
        info!("No papers to publish");
    } else if options.skip_review || review.confirm(&selected)? {
        report.published = share_results(
            &mut ctx.store,
            &pull_window,
            &ctx.config.paths.summaries_dir,
            share_options,
            now,
        )?;
    } else {
        info!(selected = selected.len(), "Publication declined at review");
    }

    info!(
        payloads = report.payloads,
        candidates = report.candidates,
        downloaded = report.downloads.saved,
        summarized = report.summarized.updated,
        relevance_checked = report.relevance.updated,
        project_matched = report.projects.updated,
        published = report.published.as_ref().map(|p| p.ids.len()).unwrap_or(0),
        "[$] FIN"
    );
    Ok(report)
}

/// Everything before publication
async fn ingest(
    ctx: &mut PipelineContext,
    options: &RunOptions,
    pull_window: &str,
    report: &mut RunReport,
) -> Result<()> {
    let model = ctx.model()?;
    let config = &ctx.config;

    info!("[*] Executing searches...");
    let search_options = SearchOptions::from_config(&config.search, options.force_search);
    let payloads = execute_searches(
        ctx.source.as_ref(),
        &config.search.queries,
        &mut ctx.cache,
        &search_options,
    )
    .await?;
    report.payloads = payloads.len();

    info!("[*] Assembling feeds...");
    let candidates = assemble_feeds(&payloads, &mut ctx.store)?;
    report.candidates = candidates.len();

    let valid = prune_feeds(candidates, pull_window, &config.paths.papers_dir);
    info!(count = valid.len(), "[*] Downloading papers...");
    report.downloads = download_many(
        ctx.fetcher.as_ref(),
        &valid,
        &mut ctx.store,
        &config.paths.papers_dir,
        config.download.concurrency,
    )
    .await?;

    if options.resummarize {
        let reset = ctx
            .store
            .reset_summaries(pull_window, &[DependentField::Projects])?;
        info!(reset, "Summaries cleared for re-summarization");
    }

    let records = assemble_records(&ctx.store, pull_window);
    info!(count = records.len(), "[*] Summarizing papers...");
    let summarizer_options = SummarizerOptions {
        papers_dir: config.paths.papers_dir.clone(),
        request_delay: config.model_request_delay(),
        max_input_chars: config.model.max_input_chars,
    };
    report.summarized = summarize_records(
        &records,
        &mut ctx.store,
        model.as_ref(),
        ctx.extractor.as_ref(),
        ctx.fetcher.as_ref(),
        &summarizer_options,
    )
    .await?;

    info!("[*] Classifying relevance...");
    report.relevance = classify_relevance(
        &mut ctx.store,
        model.as_ref(),
        pull_window,
        config.model_request_delay(),
    )
    .await?;

    if options.reclassify_projects {
        let cleared = reclassify_projects(&mut ctx.store, pull_window)?;
        info!(cleared, "Project matches cleared");
    }

    info!("[*] Matching projects...");
    report.projects = classify_projects(
        &mut ctx.store,
        model.as_ref(),
        &config.projects,
        pull_window,
        config.model_request_delay(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::AutoApprove;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use secdigest_common::config::ProjectConfig;
    use secdigest_common::errors::AppError;
    use secdigest_common::llm::MockModel;
    use secdigest_common::{AppConfig, ModelClient, PaperRecord, Tag};
    use secdigest_ingestion::download::FetchedDocument;
    use secdigest_ingestion::{DocumentFetcher, FeedSource, TextExtractor};
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>2</opensearch:totalResults>
  <opensearch:startIndex>0</opensearch:startIndex>
  <opensearch:itemsPerPage>200</opensearch:itemsPerPage>
  <entry>
    <id>http://arxiv.org/abs/2601.00001v1</id>
    <published>2026-01-15T10:30:00Z</published>
    <title>Jailbreaking Agents</title>
    <author><name>Alice Smith</name></author>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2601.00002v1</id>
    <published>2026-01-20T14:00:00Z</published>
    <title>Protein Folding at Scale</title>
    <author><name>Bob Jones</name></author>
  </entry>
</feed>"#;

    /// Serves the same single page for every query
    #[derive(Default)]
    struct OnePageSource {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for OnePageSource {
        async fn fetch_page(&self, _query: &str, _start: usize, _max: usize) -> Result<Vec<u8>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(FEED.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct StaticFetcher {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedDocument {
                final_url: url.to_string(),
                bytes: b"%PDF-1.4 stub".to_vec(),
            })
        }
    }

    /// Any existing file reads as its own file stem plus an author block
    struct StubExtractor;

    impl TextExtractor for StubExtractor {
        fn extract(&self, path: &Path) -> Result<String> {
            if !path.is_file() {
                return Err(AppError::DocumentMissing { path: path.display().to_string() });
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            Ok(format!("{} Alice Smith, MIT. Bob Jones. We study language models.", stem))
        }
    }

    /// Summaries tag the protein paper `general`; everything else is relevant
    fn model() -> MockModel {
        MockModel::new().with_handler(|system: &str, user: &str| -> Result<Value> {
            if system.contains("\"relevant\"") {
                return Ok(json!({"relevant": true}));
            }
            if system.contains("\"projects\"") {
                return Ok(json!({"projects": ["guard", "unknown"]}));
            }
            let general = user.contains("2601.00002v1");
            Ok(json!({
                "findings": ["One.", "Two.", "Three."],
                "one_liner": if general { "Folding proteins." } else { "Agents can be jailbroken." },
                "emoji": "🧪",
                "tag": if general { "general" } else { "security" },
                "affiliations": ["MIT"],
                "interest_score": if general { 2 } else { 8 }
            }))
        })
    }

    struct Harness {
        dir: TempDir,
        source: Arc<OnePageSource>,
        fetcher: Arc<StaticFetcher>,
        model: Arc<MockModel>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                source: Arc::new(OnePageSource::default()),
                fetcher: Arc::new(StaticFetcher::default()),
                model: Arc::new(model()),
            }
        }

        fn config(&self) -> AppConfig {
            let mut config = AppConfig::default();
            let root = self.dir.path();
            config.paths.db_path = root.join("papers.json");
            config.paths.search_state_path = root.join("search_state.json");
            config.paths.papers_dir = root.join("papers");
            config.paths.summaries_dir = root.join("summaries");
            config.search.queries = vec!["all:llm".into(), "all:agent".into()];
            config.search.page_delay_min_ms = 0;
            config.search.page_delay_max_ms = 0;
            config.model.request_delay_ms = 0;
            config.projects = vec![ProjectConfig {
                id: "guard".into(),
                description: "Prompt injection filters".into(),
            }];
            config
        }

        fn context(&self) -> PipelineContext {
            PipelineContext::with_adapters(
                self.config(),
                Some(self.model.clone() as Arc<dyn ModelClient>),
                self.source.clone(),
                self.fetcher.clone(),
                Arc::new(StubExtractor),
            )
            .unwrap()
        }

        async fn run(&self, options: RunOptions) -> RunReport {
            let mut ctx = self.context();
            run(&mut ctx, &options, &mut AutoApprove, now()).await.unwrap()
        }

        fn record(&self, id: &str) -> PaperRecord {
            let ctx = self.context();
            ctx.store.get(id).cloned().unwrap()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 9, 0, 0).unwrap()
    }

    fn approve() -> RunOptions {
        RunOptions { skip_review: true, ..RunOptions::default() }
    }

    struct Decline;

    impl ShareReview for Decline {
        fn confirm(&mut self, _records: &[PaperRecord]) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let h = Harness::new();
        let report = h.run(approve()).await;

        assert_eq!(report.pull_window, "2026-01-15T09:00:00Z");
        assert_eq!(report.payloads, 2);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.downloads.saved, 2);
        assert_eq!(report.summarized.updated, 2);

        let security = h.record("2601.00001v1");
        assert!(security.downloaded && security.summarized && security.shared);
        assert_eq!(security.tag, Some(Tag::Security));
        assert_eq!(security.affiliations, Some(vec!["MIT".to_string()]));
        assert_eq!(security.relevant, Some(true));
        assert_eq!(security.projects, Some(vec!["guard".to_string()]));

        let general = h.record("2601.00002v1");
        assert_eq!(general.relevant, Some(false));
        assert_eq!(general.projects, None);
        assert!(!general.shared);

        let published = report.published.unwrap();
        assert_eq!(published.ids, vec!["2601.00001v1".to_string()]);
        let md = std::fs::read_to_string(&published.markdown_path).unwrap();
        assert!(md.contains("**Jailbreaking Agents**"));
        assert!(md.contains("📌 Projects: guard"));
        assert!(!md.contains("Protein"));
        assert!(h.dir.path().join("summaries/2026-01-22.eml").is_file());
        assert!(h.dir.path().join("papers/2601.00001v1.pdf").is_file());
    }

    #[tokio::test]
    async fn test_rerun_does_no_repeated_work() {
        let h = Harness::new();
        h.run(approve()).await;
        let searches = h.source.requests.load(Ordering::SeqCst);
        let downloads = h.fetcher.requests.load(Ordering::SeqCst);
        let model_calls = h.model.call_count();

        let second = h.run(approve()).await;
        assert_eq!(h.source.requests.load(Ordering::SeqCst), searches);
        assert_eq!(h.fetcher.requests.load(Ordering::SeqCst), downloads);
        assert_eq!(h.model.call_count(), model_calls);
        assert!(second.published.is_none());
    }

    #[tokio::test]
    async fn test_include_all_publishes_irrelevant() {
        let h = Harness::new();
        let report = h
            .run(RunOptions { include_all: true, ..approve() })
            .await;
        let ids = report.published.unwrap().ids;
        assert_eq!(ids, vec!["2601.00001v1".to_string(), "2601.00002v1".to_string()]);
    }

    #[tokio::test]
    async fn test_declined_review_leaves_records_unshared() {
        let h = Harness::new();
        let mut ctx = h.context();
        let report = run(&mut ctx, &RunOptions::default(), &mut Decline, now())
            .await
            .unwrap();

        assert!(report.published.is_none());
        assert!(!ctx.store.get("2601.00001v1").unwrap().shared);
        assert!(!h.dir.path().join("summaries").exists());
    }

    #[tokio::test]
    async fn test_share_only_and_reshare() {
        let h = Harness::new();
        h.run(approve()).await;
        let model_calls = h.model.call_count();

        let mut ctx = PipelineContext::with_adapters(
            h.config(),
            None,
            h.source.clone(),
            h.fetcher.clone(),
            Arc::new(StubExtractor),
        )
        .unwrap();
        let options = RunOptions { share_only: true, reshare: true, ..approve() };
        let report = run(&mut ctx, &options, &mut AutoApprove, now()).await.unwrap();

        assert_eq!(report.payloads, 0);
        assert_eq!(h.model.call_count(), model_calls);
        assert_eq!(report.published.unwrap().ids, vec!["2601.00001v1".to_string()]);
    }

    #[tokio::test]
    async fn test_resummarize_redoes_window() {
        let h = Harness::new();
        h.run(approve()).await;
        let model_calls = h.model.call_count();

        let report = h
            .run(RunOptions { resummarize: true, ..approve() })
            .await;
        assert_eq!(report.summarized.updated, 2);
        // two summaries, one relevance check, one project match
        assert_eq!(h.model.call_count(), model_calls + 4);
        let record = h.record("2601.00001v1");
        assert!(record.shared);
        assert_eq!(record.projects, Some(vec!["guard".to_string()]));
    }

    #[tokio::test]
    async fn test_search_failure_aborts_run() {
        struct Down;

        #[async_trait]
        impl FeedSource for Down {
            async fn fetch_page(&self, _q: &str, _s: usize, _m: usize) -> Result<Vec<u8>> {
                Err(AppError::Upstream {
                    service: "arxiv".into(),
                    message: "503".into(),
                })
            }
        }

        let h = Harness::new();
        let mut ctx = PipelineContext::with_adapters(
            h.config(),
            Some(h.model.clone() as Arc<dyn ModelClient>),
            Arc::new(Down),
            h.fetcher.clone(),
            Arc::new(StubExtractor),
        )
        .unwrap();
        let err = run(&mut ctx, &approve(), &mut AutoApprove, now()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(ctx.store.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_days_rejected_before_any_work() {
        let h = Harness::new();
        let mut ctx = h.context();
        for days in [-3, 100_000_000] {
            let options = RunOptions { days: Some(days), ..approve() };
            let err = run(&mut ctx, &options, &mut AutoApprove, now()).await.unwrap_err();
            assert!(matches!(err, AppError::Configuration { .. }));
        }
        assert_eq!(h.source.requests.load(Ordering::SeqCst), 0);
    }
}
