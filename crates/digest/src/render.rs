//! Per-record formatting for the digest
//!
//! Three representations are produced from the same record: markdown for
//! the archive file, HTML and plain text for the e-mail body.

use secdigest_common::db::models::DEFAULT_EMOJI;
use secdigest_common::errors::{AppError, Result};
use secdigest_common::PaperRecord;

/// Authors listed before eliding the rest
pub const MAX_LISTED_AUTHORS: usize = 3;

/// Rendered digest bodies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Digest {
    pub markdown: String,
    pub html: String,
    pub plain: String,
}

/// The summary fields a record needs to be rendered
struct View<'a> {
    emoji: &'a str,
    tag: &'a str,
    one_liner: &'a str,
    points: &'a [String],
    byline: Option<String>,
    projects: Option<String>,
}

impl<'a> View<'a> {
    fn new(record: &'a PaperRecord) -> Result<Self> {
        let one_liner = record
            .one_liner
            .as_deref()
            .filter(|_| record.summarized)
            .ok_or_else(|| AppError::MissingField {
                field: format!("one_liner ({})", record.id),
            })?;

        let projects = record
            .projects
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| p.join(", "));

        Ok(Self {
            emoji: record.emoji.as_deref().unwrap_or(DEFAULT_EMOJI),
            tag: record.tag.map(|t| t.as_str()).unwrap_or("general"),
            one_liner,
            points: record.points.as_deref().unwrap_or_default(),
            byline: byline(record),
            projects,
        })
    }
}

/// `A, B, C et al.` for long author lists
pub fn format_authors(authors: &[String]) -> String {
    let listed = authors
        .iter()
        .take(MAX_LISTED_AUTHORS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if authors.len() > MAX_LISTED_AUTHORS {
        format!("{} et al.", listed)
    } else {
        listed
    }
}

/// Authors followed by parenthesised affiliations, if either is known
pub fn byline(record: &PaperRecord) -> Option<String> {
    let affiliations = record.affiliations.as_deref().unwrap_or_default();
    let mut parts = Vec::new();
    if !record.authors.is_empty() {
        parts.push(format_authors(&record.authors));
    }
    if !affiliations.is_empty() {
        parts.push(format!("({})", affiliations.join(", ")));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn render_markdown(record: &PaperRecord) -> Result<String> {
    let v = View::new(record)?;

    let mut out = format!(
        "{} **{}** [source]({}) #{}",
        v.emoji, record.title, record.url, v.tag
    );
    if let Some(score) = record.interest_score {
        out.push_str(&format!(" `{}/10`", score));
    }
    out.push_str(" \n");
    if let Some(ref byline) = v.byline {
        out.push_str(&format!("\n *{}*", byline));
    }
    out.push_str(&format!("\n\n {}", v.one_liner));
    for point in v.points {
        out.push_str(&format!("\n - {}", point));
    }
    if let Some(ref projects) = v.projects {
        out.push_str(&format!("\n\n📌 Projects: {}", projects));
    }
    out.push_str("\n\n<br>\n\n");
    Ok(out)
}

pub fn render_html(record: &PaperRecord) -> Result<String> {
    let v = View::new(record)?;

    let badge = record
        .interest_score
        .map(|score| {
            format!(
                r#" <span style="color:#fff;background:#555;border-radius:3px;padding:0 4px;font-size:0.8em;">{}/10</span>"#,
                score
            )
        })
        .unwrap_or_default();

    let byline = v
        .byline
        .as_deref()
        .map(|b| {
            format!(
                r#"<p style="margin:0 0 4px 0;color:#888;font-size:0.85em;">{}</p>"#,
                escape_html(b)
            )
        })
        .unwrap_or_default();

    let points: String = v
        .points
        .iter()
        .map(|p| format!(r#"<li style="margin-bottom:4px;">{}</li>"#, escape_html(p)))
        .collect();

    let projects = v
        .projects
        .as_deref()
        .map(|p| {
            format!(
                r#"<p style="margin:6px 0 0 0;color:#555;font-size:0.85em;">📌 Projects: {}</p>"#,
                escape_html(p)
            )
        })
        .unwrap_or_default();

    Ok(format!(
        concat!(
            r#"<div style="margin-bottom:24px;">"#,
            r#"<p style="margin:0 0 6px 0;">{emoji} "#,
            r#"<b><a href="{url}" style="color:#1a0dab;text-decoration:none;">{title}</a></b> "#,
            r#"<span style="color:#666;font-size:0.85em;">#{tag}</span>{badge}</p>"#,
            "{byline}",
            r#"<p style="margin:0 0 6px 0;color:#333;">{one_liner}</p>"#,
            r#"<ul style="margin:0 0 0 18px;padding:0;color:#444;">{points}</ul>"#,
            "{projects}",
            r#"<hr style="border:none;border-top:1px solid #e0e0e0;margin-top:16px;"/>"#,
            "</div>"
        ),
        emoji = v.emoji,
        url = escape_html(&record.url),
        title = escape_html(&record.title),
        tag = v.tag,
        badge = badge,
        byline = byline,
        one_liner = escape_html(v.one_liner),
        points = points,
        projects = projects,
    ))
}

pub fn render_plain(record: &PaperRecord) -> Result<String> {
    let v = View::new(record)?;

    let mut out = format!("{} {}\n {} - #{}", v.emoji, record.title, record.url, v.tag);
    if let Some(score) = record.interest_score {
        out.push_str(&format!(" [{}/10]", score));
    }
    out.push('\n');
    if let Some(ref byline) = v.byline {
        out.push_str(&format!(" {}\n", byline));
    }
    out.push_str(&format!(" - {}\n", v.one_liner));
    for point in v.points {
        out.push_str(&format!("- {}\n", point));
    }
    if let Some(ref projects) = v.projects {
        out.push_str(&format!("📌 Projects: {}\n", projects));
    }
    out.push_str("\n\n");
    Ok(out)
}

/// Render every record; any failure means nothing is rendered
pub fn render_digest(records: &[PaperRecord]) -> Result<Digest> {
    let mut digest = Digest::default();
    for record in records {
        digest.markdown.push_str(&render_markdown(record)?);
        digest.html.push_str(&render_html(record)?);
        digest.plain.push_str(&render_plain(record)?);
    }
    Ok(digest)
}
