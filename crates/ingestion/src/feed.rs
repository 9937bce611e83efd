//! Atom feed decoding and candidate assembly
//!
//! Turns raw search-feed payloads into candidate paper records, inserts
//! unseen ones into the store and narrows the list to what still needs
//! downloading.

use crate::download::document_path;
use quick_xml::events::Event;
use quick_xml::Reader;
use secdigest_common::errors::{AppError, Result};
use secdigest_common::metrics::record_discovered;
use secdigest_common::time::normalize_timestamp;
use secdigest_common::{PaperRecord, PaperStore};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// One `<entry>` as it appears in the feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    /// Raw Atom id, e.g. `http://arxiv.org/abs/2601.00001v1`
    pub id: String,
    pub published: String,
    pub title: String,
    pub authors: Vec<String>,
}

/// A decoded feed page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub total_results: usize,
    pub start_index: usize,
    pub items_per_page: Option<usize>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    TotalResults,
    StartIndex,
    ItemsPerPage,
    EntryId,
    Published,
    Title,
    AuthorName,
}

fn decode_error(message: impl Into<String>) -> AppError {
    AppError::FeedDecode { message: message.into() }
}

fn parse_count(field: &str, value: Option<String>) -> Result<usize> {
    let raw = value.ok_or_else(|| decode_error(format!("missing opensearch:{}", field)))?;
    raw.trim()
        .parse()
        .map_err(|_| decode_error(format!("opensearch:{} is not a number: {}", field, raw)))
}

/// Decode one Atom payload including its OpenSearch envelope
pub fn parse_feed(payload: &[u8]) -> Result<Feed> {
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut total = None;
    let mut start = None;
    let mut per_page = None;
    let mut entries = Vec::new();

    let mut entry: Option<FeedEntry> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                text.clear();
                field = match name.as_ref() {
                    b"entry" => {
                        entry = Some(FeedEntry::default());
                        None
                    }
                    b"author" if entry.is_some() => {
                        in_author = true;
                        None
                    }
                    b"totalResults" if entry.is_none() => Some(Field::TotalResults),
                    b"startIndex" if entry.is_none() => Some(Field::StartIndex),
                    b"itemsPerPage" if entry.is_none() => Some(Field::ItemsPerPage),
                    b"id" if entry.is_some() && !in_author => Some(Field::EntryId),
                    b"published" if entry.is_some() => Some(Field::Published),
                    b"title" if entry.is_some() => Some(Field::Title),
                    b"name" if in_author => Some(Field::AuthorName),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) if field.is_some() => {
                let value = t.unescape().map_err(|e| decode_error(e.to_string()))?;
                text.push_str(&value);
            }
            Ok(Event::CData(c)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(done) = entry.take() {
                            entries.push(done);
                        }
                    }
                    b"author" => in_author = false,
                    _ => {}
                }

                if let Some(current) = field.take() {
                    let value = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    match (current, entry.as_mut()) {
                        (Field::TotalResults, _) => total = Some(value),
                        (Field::StartIndex, _) => start = Some(value),
                        (Field::ItemsPerPage, _) => per_page = Some(value),
                        (Field::EntryId, Some(en)) => en.id = value,
                        (Field::Published, Some(en)) => en.published = value,
                        (Field::Title, Some(en)) => en.title = value,
                        (Field::AuthorName, Some(en)) if !value.is_empty() => en.authors.push(value),
                        _ => {}
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(decode_error(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
        buf.clear();
    }

    Ok(Feed {
        total_results: parse_count("totalResults", total)?,
        start_index: parse_count("startIndex", start)?,
        items_per_page: per_page.and_then(|v| v.parse().ok()),
        entries,
    })
}

/// Append `.pdf` unless the locator already ends with exactly that
pub fn ensure_pdf_extension(url: &str) -> String {
    let mut trimmed = url;
    while let Some(stripped) = trimmed.strip_suffix(".pdf.pdf") {
        trimmed = &trimmed[..stripped.len() + 4];
    }
    if trimmed.ends_with(".pdf") {
        trimmed.to_string()
    } else {
        format!("{}.pdf", trimmed)
    }
}

/// PDF locator for an abstract-page id
pub fn document_url(abs_id: &str) -> Result<String> {
    if !abs_id.contains("/abs/") {
        return Err(AppError::InvalidFormat {
            message: format!("entry id is not an abstract link: {}", abs_id),
        });
    }
    Ok(ensure_pdf_extension(&abs_id.replacen("/abs/", "/pdf/", 1)))
}

impl FeedEntry {
    /// Build an unprocessed candidate record from this entry
    pub fn to_candidate(&self) -> Result<PaperRecord> {
        let id = self
            .id
            .rsplit_once("/abs/")
            .map(|(_, tail)| tail.trim())
            .filter(|tail| !tail.is_empty())
            .ok_or_else(|| AppError::MissingField { field: "id".into() })?;

        Ok(PaperRecord::discovered(
            id,
            document_url(&self.id)?,
            normalize_timestamp(&self.published)?,
            self.title.clone(),
            self.authors.clone(),
        ))
    }
}

/// Decode every payload, insert unseen candidates and return all candidates
/// deduplicated by url in first-seen order.
///
/// Undecodable payloads and bad entries are logged and skipped; only store
/// persistence failures propagate.
pub fn assemble_feeds(payloads: &[Vec<u8>], store: &mut PaperStore) -> Result<Vec<PaperRecord>> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut inserted = 0usize;

    for (idx, payload) in payloads.iter().enumerate() {
        let feed = match parse_feed(payload) {
            Ok(feed) => feed,
            Err(e) => {
                warn!(payload = idx, error = %e, "Skipping undecodable feed payload");
                continue;
            }
        };

        for entry in &feed.entries {
            let candidate = match entry.to_candidate() {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        entry = %entry.id,
                        code = e.code().as_code(),
                        error = %e,
                        "Skipping feed entry"
                    );
                    continue;
                }
            };

            if !store.has_url(&candidate.url) {
                match store.insert(candidate.clone()) {
                    Ok(()) => inserted += 1,
                    Err(e) if !e.is_fatal() => {
                        warn!(
                            id = %candidate.id,
                            code = e.code().as_code(),
                            error = %e,
                            "Candidate not stored"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            if seen.insert(candidate.url.clone()) {
                candidates.push(candidate);
            }
        }
    }

    record_discovered(inserted);
    info!(
        payloads = payloads.len(),
        candidates = candidates.len(),
        inserted,
        "Assembled feeds"
    );
    Ok(candidates)
}

/// Keep candidates published at or after `pull_window` whose document is
/// not on disk yet; order is preserved
pub fn prune_feeds(candidates: Vec<PaperRecord>, pull_window: &str, papers_dir: &Path) -> Vec<PaperRecord> {
    let before = candidates.len();
    let kept: Vec<_> = candidates
        .into_iter()
        .filter(|c| c.published.as_str() >= pull_window)
        .filter(|c| !document_path(papers_dir, c).is_file())
        .collect();

    debug!(before, after = kept.len(), window = pull_window, "Pruned candidates");
    kept
}
