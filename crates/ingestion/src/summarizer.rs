//! Extraction and summarization stage
//!
//! For each unsummarized record in the window: load the document (fetching
//! it once if missing), extract its text, ask the model for structured
//! findings, validate them and apply the whole summary in one update.
//! Any item-level failure leaves the record untouched for the next run.

use crate::download::{document_path, download_one, DocumentFetcher};
use crate::pdf::TextExtractor;
use crate::prompts::SUMMARY_PROMPT;
use crate::StageReport;
use secdigest_common::db::models::{DEFAULT_EMOJI, DEFAULT_INTEREST_SCORE};
use secdigest_common::errors::{AppError, Result};
use secdigest_common::metrics::{record_processed, ModelTimer};
use secdigest_common::{ModelClient, PaperPatch, PaperQuery, PaperRecord, PaperStore, Summary, Tag};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Characters of extracted text searched for author surnames
pub const AFFILIATION_SCAN_CHARS: usize = 3000;

/// Fraction of authors that must be found for affiliations to be kept
pub const AFFILIATION_MIN_MATCH: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct SummarizerOptions {
    pub papers_dir: PathBuf,
    /// Pause between model submissions
    pub request_delay: Duration,
    /// Truncate submitted text to this many characters (0 = unlimited)
    pub max_input_chars: usize,
}

/// Records in the window still waiting for a summary
pub fn assemble_records(store: &PaperStore, pull_window: &str) -> Vec<PaperRecord> {
    store.find(&PaperQuery::new().published_gte(pull_window).summarized(false))
}

/// Coerce the model's score to 1..=10, falling back to the default
fn coerce_score(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(score) if score.is_finite() => score.round().clamp(1.0, 10.0) as u8,
        _ => DEFAULT_INTEREST_SCORE,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Validate a summarization reply and apply per-field defaults
pub fn parse_summary(value: &Value) -> Result<Summary> {
    let points = string_list(value.get("findings"));
    if points.is_empty() {
        return Err(AppError::MissingField { field: "findings".into() });
    }
    if points.len() != 3 {
        warn!(count = points.len(), "Expected 3 findings");
    }

    let one_liner = value
        .get("one_liner")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MissingField { field: "one_liner".into() })?
        .to_string();

    let emoji = value
        .get("emoji")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_EMOJI)
        .to_string();

    let tag = value
        .get("tag")
        .and_then(Value::as_str)
        .and_then(Tag::parse)
        .unwrap_or_default();

    Ok(Summary {
        points,
        one_liner,
        emoji,
        tag,
        affiliations: string_list(value.get("affiliations")),
        interest_score: coerce_score(value.get("interest_score")),
    })
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Last name token of an author, split into its alphanumeric words
/// (`Smith-Jones` gives `smith`, `jones`)
fn surname(author: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = words(author.split_whitespace().last()?).collect();
    (!parts.is_empty()).then_some(parts)
}

/// Keep `affiliations` only when enough author surnames appear as whole
/// words near the start of the text; with no authors the model is trusted
pub fn validate_affiliations(authors: &[String], text: &str, affiliations: Vec<String>) -> Vec<String> {
    if authors.is_empty() || affiliations.is_empty() {
        return affiliations;
    }

    let head: String = text.chars().take(AFFILIATION_SCAN_CHARS).collect();
    let present: HashSet<String> = words(&head).collect();
    let matched = authors
        .iter()
        .filter_map(|a| surname(a))
        .filter(|parts| parts.iter().all(|p| present.contains(p)))
        .count();
    let ratio = matched as f64 / authors.len() as f64;

    if ratio < AFFILIATION_MIN_MATCH {
        debug!(matched, authors = authors.len(), "Discarding unverified affiliations");
        Vec::new()
    } else {
        affiliations
    }
}

async fn load_text(
    record: &PaperRecord,
    store: &mut PaperStore,
    extractor: &dyn TextExtractor,
    fetcher: &dyn DocumentFetcher,
    options: &SummarizerOptions,
) -> Result<String> {
    let path = document_path(&options.papers_dir, record);
    match extractor.extract(&path) {
        Err(AppError::DocumentMissing { .. }) => {
            download_one(fetcher, record, store, &options.papers_dir).await?;
            extractor.extract(&path)
        }
        other => other,
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    if max == 0 {
        return text;
    }
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

/// Summarize every given record; returns per-stage counts.
///
/// Only fatal errors (store persistence) propagate.
#[instrument(skip_all, fields(records = records.len()))]
pub async fn summarize_records(
    records: &[PaperRecord],
    store: &mut PaperStore,
    model: &dyn ModelClient,
    extractor: &dyn TextExtractor,
    fetcher: &dyn DocumentFetcher,
    options: &SummarizerOptions,
) -> Result<StageReport> {
    let mut report = StageReport::default();
    let mut submitted = false;

    for record in records {
        report.processed += 1;
        debug!(id = %record.id, "Processing");

        let text = match load_text(record, store, extractor, fetcher, options).await {
            Ok(text) => truncate_chars(text, options.max_input_chars),
            Err(e) if !e.is_fatal() => {
                error!(
                    id = %record.id,
                    code = e.code().as_code(),
                    error = %e,
                    "Document unavailable, skipping"
                );
                report.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if submitted {
            tokio::time::sleep(options.request_delay).await;
        }
        submitted = true;

        let timer = ModelTimer::start("summarize");
        let reply = model.complete_json(SUMMARY_PROMPT, &text).await;
        timer.finish(reply.is_ok());

        let summary = match reply.and_then(|value| parse_summary(&value)) {
            Ok(mut summary) => {
                summary.affiliations =
                    validate_affiliations(&record.authors, &text, std::mem::take(&mut summary.affiliations));
                summary
            }
            Err(e) if !e.is_fatal() => {
                error!(
                    id = %record.id,
                    code = e.code().as_code(),
                    error = %e,
                    "Summarization failed, skipping"
                );
                report.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        store.update(&record.id, PaperPatch::new().summary(summary))?;
        debug!(id = %record.id, "Processed");
        report.updated += 1;
    }

    record_processed("summarize", report.updated);
    info!(
        processed = report.processed,
        summarized = report.updated,
        skipped = report.skipped,
        "Summarization finished"
    );
    Ok(report)
}
