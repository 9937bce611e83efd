//! Paginated search against the arXiv Atom API
//!
//! Each query is paged until the feed runs dry, and its completion is
//! written to the search cache before the next query starts.

use crate::feed::parse_feed;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use secdigest_common::config::SearchConfig;
use secdigest_common::errors::{AppError, Result};
use secdigest_common::metrics::record_feed_page;
use secdigest_common::time::format_utc;
use secdigest_common::SearchCache;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// One page fetch from a search feed
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Raw feed payload for `query` starting at `start`
    async fn fetch_page(&self, query: &str, start: usize, max_results: usize) -> Result<Vec<u8>>;
}

/// arXiv export API client
pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), Duration::from_secs(config.timeout_secs))
    }

    fn page_url(&self, query: &str, start: usize, max_results: usize) -> String {
        format!(
            "{}?search_query={}&start={}&max_results={}",
            self.base_url,
            encode_query(query),
            start,
            max_results
        )
    }
}

/// Percent-encode a search query, leaving the operators arXiv expects raw
/// (`:` field prefixes, `+` separators, `*` wildcards, pre-encoded `%XX`)
pub fn encode_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for byte in query.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => out.push(byte as char),
            b'-' | b'_' | b'.' | b'~' | b':' | b'+' | b'*' | b'%' => out.push(byte as char),
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[async_trait]
impl FeedSource for ArxivClient {
    async fn fetch_page(&self, query: &str, start: usize, max_results: usize) -> Result<Vec<u8>> {
        let url = self.page_url(query, start, max_results);
        debug!(url = %url, "Fetching feed page");

        let upstream = |message: String| AppError::Upstream {
            service: "arxiv".to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| upstream(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| upstream(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| upstream(format!("reading body failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Uniformly jittered pause between page requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDelay {
    min: Duration,
    max: Duration,
}

impl PageDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// Knobs for one batch of searches
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub cache_hours: u64,
    /// Ignore the cache and re-run every query
    pub force: bool,
    pub page_size: usize,
    pub start_offset: usize,
    pub page_delay: PageDelay,
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig, force: bool) -> Self {
        Self {
            cache_hours: config.cache_hours,
            force,
            page_size: config.page_size,
            start_offset: config.start_offset,
            page_delay: PageDelay::new(
                Duration::from_millis(config.page_delay_min_ms),
                Duration::from_millis(config.page_delay_max_ms),
            ),
        }
    }
}

/// Run every query and return all raw page payloads in request order.
///
/// A query completed within `cache_hours` is skipped unless forced. Any
/// transport or envelope error aborts the batch; queries that finished
/// before it keep their cache entries.
#[instrument(skip_all, fields(queries = queries.len(), force = options.force))]
pub async fn execute_searches(
    source: &dyn FeedSource,
    queries: &[String],
    cache: &mut SearchCache,
    options: &SearchOptions,
) -> Result<Vec<Vec<u8>>> {
    let now = Utc::now();
    let cutoff = SearchCache::cutoff_for(now, options.cache_hours);
    let stamp = format_utc(now);
    let page_size = options.page_size.max(1);

    let mut payloads = Vec::new();
    let mut skipped = 0usize;

    for (i, query) in queries.iter().enumerate() {
        if !options.force && !cache.is_stale(query, &cutoff) {
            info!(n = i + 1, total = queries.len(), query = %query, "Skipping (cached)");
            skipped += 1;
            continue;
        }

        info!(n = i + 1, total = queries.len(), query = %query, "Searching");
        let mut start = options.start_offset;

        loop {
            tokio::time::sleep(options.page_delay.sample()).await;

            let payload = source.fetch_page(query, start, page_size).await?;
            let feed = parse_feed(&payload)?;
            let returned = feed.entries.len();
            record_feed_page();

            debug!(
                total = feed.total_results,
                start = feed.start_index,
                batch = returned,
                "Feed page"
            );
            payloads.push(payload);

            if returned < page_size || feed.start_index + returned >= feed.total_results {
                break;
            }

            let next = feed.start_index + returned;
            if next <= start {
                // the feed did not advance; stop rather than loop forever
                break;
            }
            start = next;
        }

        cache.mark_complete(query, &stamp)?;
        debug!(query = %query, "Completed search");
    }

    info!(pages = payloads.len(), skipped, "Searches finished");
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page(total: usize, start: usize, ids: &[&str]) -> Vec<u8> {
        let mut xml = format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
<opensearch:totalResults>{}</opensearch:totalResults>
<opensearch:startIndex>{}</opensearch:startIndex>"#,
            total, start
        );
        for id in ids {
            xml.push_str(&format!(
                "<entry><id>http://arxiv.org/abs/{}</id><published>2026-01-15T10:30:00Z</published><title>T {}</title></entry>",
                id, id
            ));
        }
        xml.push_str("</feed>");
        xml.into_bytes()
    }

    /// Serves scripted pages keyed by (query, start); unknown keys fail
    #[derive(Default)]
    struct ScriptedSource {
        pages: HashMap<(String, usize), Vec<u8>>,
        requests: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedSource {
        fn with(mut self, query: &str, start: usize, payload: Vec<u8>) -> Self {
            self.pages.insert((query.to_string(), start), payload);
            self
        }

        fn requests(&self) -> Vec<(String, usize)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch_page(&self, query: &str, start: usize, _max: usize) -> Result<Vec<u8>> {
            self.requests.lock().unwrap().push((query.to_string(), start));
            self.pages
                .get(&(query.to_string(), start))
                .cloned()
                .ok_or_else(|| AppError::Upstream {
                    service: "arxiv".into(),
                    message: "connection reset".into(),
                })
        }
    }

    fn options(page_size: usize) -> SearchOptions {
        SearchOptions {
            cache_hours: 1,
            force: false,
            page_size,
            start_offset: 0,
            page_delay: PageDelay::none(),
        }
    }

    #[tokio::test]
    async fn test_paginates_until_total_reached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SearchCache::open(dir.path().join("state.json")).unwrap();
        let source = ScriptedSource::default()
            .with("q", 0, page(4, 0, &["1", "2"]))
            .with("q", 2, page(4, 2, &["3", "4"]));

        let payloads = execute_searches(&source, &["q".to_string()], &mut cache, &options(2))
            .await
            .unwrap();

        assert_eq!(payloads.len(), 2);
        assert_eq!(source.requests(), vec![("q".to_string(), 0), ("q".to_string(), 2)]);
        assert!(cache.completed_at("q").is_some());
    }

    #[tokio::test]
    async fn test_short_page_ends_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SearchCache::open(dir.path().join("state.json")).unwrap();
        // total over-reported; the short page still stops the loop
        let source = ScriptedSource::default().with("q", 0, page(50, 0, &["1"]));

        let payloads = execute_searches(&source, &["q".to_string()], &mut cache, &options(2))
            .await
            .unwrap();
        assert_eq!(payloads.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_query_skipped_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SearchCache::open(dir.path().join("state.json")).unwrap();
        let source = ScriptedSource::default().with("q", 0, page(1, 0, &["1"]));
        let queries = vec!["q".to_string()];

        execute_searches(&source, &queries, &mut cache, &options(2)).await.unwrap();
        let second = execute_searches(&source, &queries, &mut cache, &options(2)).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(source.requests().len(), 1);

        let mut forced = options(2);
        forced.force = true;
        let third = execute_searches(&source, &queries, &mut cache, &forced).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_cache_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SearchCache::open(dir.path().join("state.json")).unwrap();
        let source = ScriptedSource::default()
            .with("q1", 0, page(1, 0, &["1"]))
            .with("q2", 0, page(1, 0, &["2"]));
        let queries: Vec<String> = ["q1", "q2", "q3", "q4"].iter().map(|s| s.to_string()).collect();

        let err = execute_searches(&source, &queries, &mut cache, &options(2))
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        let reopened = SearchCache::open(dir.path().join("state.json")).unwrap();
        assert!(reopened.completed_at("q1").is_some());
        assert!(reopened.completed_at("q2").is_some());
        assert!(reopened.completed_at("q3").is_none());
        assert!(reopened.completed_at("q4").is_none());
    }

    #[test]
    fn test_encode_query_keeps_operators() {
        assert_eq!(
            encode_query(r#"all:"prompt%20injection"+AND+cat:cs.*"#),
            "all:%22prompt%20injection%22+AND+cat:cs.*"
        );
    }

    #[tokio::test]
    async fn test_arxiv_client_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "0"))
            .and(query_param("max_results", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(page(0, 0, &[])))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArxivClient::new(format!("{}/api/query", server.uri()), Duration::from_secs(5)).unwrap();
        let body = client.fetch_page("all:llm", 0, 200).await.unwrap();
        assert_eq!(parse_feed(&body).unwrap().total_results, 0);
    }

    #[tokio::test]
    async fn test_arxiv_client_http_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ArxivClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.fetch_page("all:llm", 0, 200).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
