//! Metrics and observability utilities
//!
//! Counters and histograms for each pipeline stage. Descriptions are
//! registered once at startup; without an installed recorder the macros
//! are no-ops.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SecDigest metrics
pub const METRICS_PREFIX: &str = "secdigest";

/// Register all metric descriptions
pub fn register_metrics() {
    // Discovery
    describe_counter!(
        format!("{}_feed_pages_total", METRICS_PREFIX),
        Unit::Count,
        "Total feed pages fetched"
    );

    describe_counter!(
        format!("{}_papers_discovered_total", METRICS_PREFIX),
        Unit::Count,
        "Total new papers inserted into the store"
    );

    // Acquisition
    describe_counter!(
        format!("{}_downloads_total", METRICS_PREFIX),
        Unit::Count,
        "Total document downloads by outcome"
    );

    // Model stages
    describe_counter!(
        format!("{}_model_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total language model requests by stage and outcome"
    );

    describe_histogram!(
        format!("{}_model_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Language model request latency in seconds"
    );

    describe_counter!(
        format!("{}_papers_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total records updated by each stage"
    );

    // Publication
    describe_counter!(
        format!("{}_papers_shared_total", METRICS_PREFIX),
        Unit::Count,
        "Total papers included in a published digest"
    );

    // Cache
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Times a single model call
pub struct ModelTimer {
    start: Instant,
    stage: &'static str,
}

impl ModelTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn finish(self, success: bool) {
        let status = if success { "success" } else { "error" };

        counter!(
            format!("{}_model_requests_total", METRICS_PREFIX),
            "stage" => self.stage,
            "status" => status
        )
        .increment(1);

        histogram!(
            format!("{}_model_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

pub fn record_feed_page() {
    counter!(format!("{}_feed_pages_total", METRICS_PREFIX)).increment(1);
}

pub fn record_discovered(count: usize) {
    counter!(format!("{}_papers_discovered_total", METRICS_PREFIX)).increment(count as u64);
}

pub fn record_download(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_downloads_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Records updated by a stage (`summarize`, `relevance`, `projects`)
pub fn record_processed(stage: &'static str, count: usize) {
    counter!(
        format!("{}_papers_processed_total", METRICS_PREFIX),
        "stage" => stage
    )
    .increment(count as u64);
}

pub fn record_shared(count: usize) {
    counter!(format!("{}_papers_shared_total", METRICS_PREFIX)).increment(count as u64);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_without_recorder() {
        register_metrics();
        let timer = ModelTimer::start("summarize");
        timer.finish(true);
        record_download(false);
        record_processed("relevance", 3);
        record_cache(true, "search");
        // Just verify it runs without panic
    }
}
