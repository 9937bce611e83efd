//! Paper record

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Glyph used when the model does not pick one
pub const DEFAULT_EMOJI: &str = "🔍";

/// Score assumed for records without one (also used for sorting)
pub const DEFAULT_INTEREST_SCORE: u8 = 5;

/// Topic tag assigned at summarization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    /// Security of AI systems
    Security,
    /// AI applied to cybersecurity tasks
    Cyber,
    /// Everything else
    #[default]
    General,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Security => "security",
            Tag::Cyber => "cyber",
            Tag::General => "general",
        }
    }

    /// Case-insensitive parse; unknown words yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "security" => Some(Tag::Security),
            "cyber" => Some(Tag::Cyber),
            "general" => Some(Tag::General),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered paper and everything the pipeline learned about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub url: String,
    /// Always `YYYY-MM-DDTHH:MM:SSZ`
    pub published: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub summarized: bool,

    // Present only while `summarized` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_liner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_score: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<String>>,

    #[serde(default)]
    pub shared: bool,
}

impl PaperRecord {
    /// A freshly discovered, unprocessed paper
    pub fn discovered(
        id: impl Into<String>,
        url: impl Into<String>,
        published: impl Into<String>,
        title: impl Into<String>,
        authors: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            published: published.into(),
            title: title.into(),
            authors,
            downloaded: false,
            summarized: false,
            points: None,
            one_liner: None,
            emoji: None,
            tag: None,
            affiliations: None,
            interest_score: None,
            relevant: None,
            projects: None,
            shared: false,
        }
    }

    /// Score used for ordering in the digest
    pub fn effective_score(&self) -> u8 {
        self.interest_score.unwrap_or(DEFAULT_INTEREST_SCORE)
    }

    fn apply_summary(&mut self, summary: Summary) {
        self.summarized = true;
        self.points = Some(summary.points);
        self.one_liner = Some(summary.one_liner);
        self.emoji = Some(summary.emoji);
        self.tag = Some(summary.tag);
        self.affiliations = Some(summary.affiliations);
        self.interest_score = Some(summary.interest_score);
    }

    pub(crate) fn clear_summary(&mut self) {
        self.summarized = false;
        self.points = None;
        self.one_liner = None;
        self.emoji = None;
        self.tag = None;
        self.affiliations = None;
        self.interest_score = None;
    }

    pub(crate) fn clear_dependent(&mut self, field: DependentField) {
        match field {
            // projects only exist on relevant records
            DependentField::Relevant => {
                self.relevant = None;
                self.projects = None;
            }
            DependentField::Projects => self.projects = None,
            DependentField::Shared => self.shared = false,
        }
    }

    fn check_invariants(&self) -> Result<()> {
        if self.relevant.is_some() && !self.summarized {
            return Err(AppError::InvalidFormat {
                message: format!("{}: relevance set on an unsummarized record", self.id),
            });
        }
        if self.projects.is_some() && self.relevant != Some(true) {
            return Err(AppError::InvalidFormat {
                message: format!("{}: projects set on a record not marked relevant", self.id),
            });
        }
        Ok(())
    }
}

/// Everything the summarization stage produces, applied in one step
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub points: Vec<String>,
    pub one_liner: String,
    pub emoji: String,
    pub tag: Tag,
    pub affiliations: Vec<String>,
    pub interest_score: u8,
}

/// Fields derived from a summary that can be cleared independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependentField {
    /// Clearing relevance also clears projects
    Relevant,
    Projects,
    Shared,
}

#[derive(Debug, Clone)]
enum FieldChange {
    Downloaded(bool),
    Summary(Summary),
    Relevant(bool),
    Projects(Vec<String>),
    Shared(bool),
    Clear(DependentField),
}

/// Keyed partial update of a record
///
/// ```ignore
/// store.update(&id, PaperPatch::new().relevant(true))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PaperPatch {
    changes: Vec<FieldChange>,
}

impl PaperPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downloaded(mut self, value: bool) -> Self {
        self.changes.push(FieldChange::Downloaded(value));
        self
    }

    /// Sets every summary field and `summarized = true`
    pub fn summary(mut self, summary: Summary) -> Self {
        self.changes.push(FieldChange::Summary(summary));
        self
    }

    pub fn relevant(mut self, value: bool) -> Self {
        self.changes.push(FieldChange::Relevant(value));
        self
    }

    pub fn projects(mut self, ids: Vec<String>) -> Self {
        self.changes.push(FieldChange::Projects(ids));
        self
    }

    pub fn shared(mut self, value: bool) -> Self {
        self.changes.push(FieldChange::Shared(value));
        self
    }

    pub fn clear(mut self, field: DependentField) -> Self {
        self.changes.push(FieldChange::Clear(field));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Apply to a copy of `record`, returning the merged record if it still
    /// satisfies the lifecycle invariants
    pub(crate) fn merged(&self, record: &PaperRecord) -> Result<PaperRecord> {
        let mut merged = record.clone();
        for change in &self.changes {
            match change {
                FieldChange::Downloaded(value) => merged.downloaded = *value,
                FieldChange::Summary(summary) => merged.apply_summary(summary.clone()),
                FieldChange::Relevant(value) => merged.relevant = Some(*value),
                FieldChange::Projects(ids) => merged.projects = Some(ids.clone()),
                FieldChange::Shared(value) => merged.shared = *value,
                FieldChange::Clear(field) => merged.clear_dependent(*field),
            }
        }
        merged.check_invariants()?;
        Ok(merged)
    }
}
