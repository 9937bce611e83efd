//! Publication stage
//!
//! Selects records that are ready to go out, writes the dated markdown
//! archive and an unsent e-mail draft, then flags the records as shared.

use crate::render::{render_digest, Digest};
use chrono::{DateTime, Utc};
use secdigest_common::db::write_files_atomic;
use secdigest_common::errors::Result;
use secdigest_common::metrics::record_shared;
use secdigest_common::time::{rfc2822, run_date};
use secdigest_common::{PaperQuery, PaperRecord, PaperStore};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const SUBJECT_SUFFIX: &str = "AI Security Research Digest";

#[derive(Debug, Clone, Copy, Default)]
pub struct ShareOptions {
    /// Publish records regardless of relevance
    pub include_all: bool,
    /// Publish records that already went out in an earlier digest
    pub include_shared: bool,
}

/// Artifacts written by one publication
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub markdown_path: PathBuf,
    pub eml_path: PathBuf,
    pub ids: Vec<String>,
}

/// Records eligible for the digest, highest interest first.
///
/// The sort is stable so equal scores keep store order.
pub fn select_records(store: &PaperStore, pull_window: &str, options: ShareOptions) -> Vec<PaperRecord> {
    let mut query = PaperQuery::new().published_gte(pull_window).summarized(true);
    if !options.include_shared {
        query = query.shared(false);
    }
    if !options.include_all {
        query = query.relevant(true);
    }

    let mut records = store.find(&query);
    records.sort_by(|a, b| b.effective_score().cmp(&a.effective_score()));
    records
}

pub fn subject(date: &str) -> String {
    format!("[{}] {}", date, SUBJECT_SUFFIX)
}

/// Unsent multipart/alternative draft carrying the plain and HTML bodies
pub fn compose_eml(digest: &Digest, now: DateTime<Utc>) -> String {
    let date = run_date(now);
    let boundary = format!("secdigest-{}", now.timestamp());
    let html = format!(
        concat!(
            "<html><body style=\"font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;",
            "max-width:720px;margin:auto;\">\n{}\n</body></html>"
        ),
        digest.html
    );

    let mut eml = String::new();
    eml.push_str(&format!("Subject: {}\r\n", subject(&date)));
    eml.push_str(&format!("Date: {}\r\n", rfc2822(now)));
    eml.push_str("X-Unsent: 1\r\n");
    eml.push_str("MIME-Version: 1.0\r\n");
    eml.push_str(&format!(
        "Content-Type: multipart/alternative; boundary=\"{}\"\r\n\r\n",
        boundary
    ));
    for (content_type, body) in [("text/plain", digest.plain.as_str()), ("text/html", html.as_str())] {
        eml.push_str(&format!("--{}\r\n", boundary));
        eml.push_str(&format!("Content-Type: {}; charset=\"utf-8\"\r\n", content_type));
        eml.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
        eml.push_str(body);
        eml.push_str("\r\n");
    }
    eml.push_str(&format!("--{}--\r\n", boundary));
    eml
}

/// Publish the digest for the window.
///
/// Nothing is written unless every selected record renders. Returns `None`
/// when no record is eligible.
#[instrument(skip_all, fields(window = pull_window, output = %output_dir.display()))]
pub fn share_results(
    store: &mut PaperStore,
    pull_window: &str,
    output_dir: &Path,
    options: ShareOptions,
    now: DateTime<Utc>,
) -> Result<Option<Published>> {
    let records = select_records(store, pull_window, options);
    if records.is_empty() {
        info!("Nothing to share");
        return Ok(None);
    }

    let digest = render_digest(&records)?;
    let date = run_date(now);
    let markdown_path = output_dir.join(format!("{}.md", date));
    let eml_path = output_dir.join(format!("{}.eml", date));

    let eml = compose_eml(&digest, now);
    write_files_atomic(&[
        (markdown_path.as_path(), digest.markdown.as_bytes()),
        (eml_path.as_path(), eml.as_bytes()),
    ])?;

    let ids: Vec<String> = records.into_iter().map(|r| r.id).collect();
    let flagged = store.mark_shared(&ids)?;
    record_shared(ids.len());

    info!(
        shared = ids.len(),
        newly_flagged = flagged,
        markdown = %markdown_path.display(),
        "Digest published"
    );

    Ok(Some(Published {
        markdown_path,
        eml_path,
        ids,
    }))
}
