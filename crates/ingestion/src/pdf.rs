//! PDF text extraction module
//!
//! Extracts text content from downloaded papers using lopdf.

use secdigest_common::errors::{AppError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Full-text extraction from a local document
pub trait TextExtractor: Send + Sync {
    /// Text of every readable page.
    ///
    /// A missing file is [`AppError::DocumentMissing`]; anything that cannot
    /// be parsed or yields no text is [`AppError::DocumentUnreadable`].
    fn extract(&self, path: &Path) -> Result<String>;
}

/// lopdf-backed extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        extract_text_from_pdf(path)
    }
}

fn unreadable(path: &Path, message: impl Into<String>) -> AppError {
    AppError::DocumentUnreadable {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Extract text content from a PDF file
pub fn extract_text_from_pdf(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(AppError::DocumentMissing {
            path: path.display().to_string(),
        });
    }

    let doc = lopdf::Document::load(path)
        .map_err(|e| unreadable(path, format!("Failed to load PDF: {}", e)))?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for (page_num, page_id) in pages.iter() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) if !page_text.trim().is_empty() => {
                text.push_str(&page_text);
                text.push(' ');
            }
            other => {
                if let Err(ref e) = other {
                    debug!(page = page_num, error = %e, "Falling back to content stream scan");
                }
                match doc.get_page_content(*page_id) {
                    Ok(content) => {
                        text.push_str(&extract_text_from_content(&content));
                        text.push(' ');
                    }
                    Err(e) => {
                        warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
                    }
                }
            }
        }
    }

    if text.trim().is_empty() {
        return Err(unreadable(path, "No text content extracted from PDF"));
    }

    let cleaned = clean_text(&text);
    debug!(
        original_len = text.len(),
        cleaned_len = cleaned.len(),
        "Text extraction complete"
    );

    Ok(cleaned)
}

/// Scan a content stream for text shown between `BT` and `ET`
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push(' ');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Text operand of a `Tj`, `'`, `"` or `TJ` operator
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        if end > start {
            return Some(decode_pdf_string(&line[start + 1..end]));
        }
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' => in_paren = true,
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Collapse whitespace and normalize typographic quotes
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}
