//! File-backed paper store
//!
//! The whole collection lives in memory and every mutation rewrites the
//! JSON snapshot before returning, so a crash never loses a committed update.

use crate::db::models::{DependentField, PaperPatch, PaperRecord};
use crate::db::{read_snapshot, write_snapshot};
use crate::errors::{AppError, Result};
use crate::time::normalize_timestamp;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Conjunction of optional predicates over records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperQuery {
    pub published_gte: Option<String>,
    pub summarized: Option<bool>,
    pub relevant: Option<bool>,
    pub shared: Option<bool>,
}

impl PaperQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published at or after this canonical timestamp
    pub fn published_gte(mut self, timestamp: impl Into<String>) -> Self {
        self.published_gte = Some(timestamp.into());
        self
    }

    pub fn summarized(mut self, value: bool) -> Self {
        self.summarized = Some(value);
        self
    }

    /// `true` matches records classified relevant, `false` those classified
    /// not relevant; unclassified records match neither
    pub fn relevant(mut self, value: bool) -> Self {
        self.relevant = Some(value);
        self
    }

    pub fn shared(mut self, value: bool) -> Self {
        self.shared = Some(value);
        self
    }

    pub fn matches(&self, record: &PaperRecord) -> bool {
        // canonical timestamps order lexicographically
        if let Some(ref from) = self.published_gte {
            if record.published.as_str() < from.as_str() {
                return false;
            }
        }
        if let Some(summarized) = self.summarized {
            if record.summarized != summarized {
                return false;
            }
        }
        if let Some(relevant) = self.relevant {
            if record.relevant != Some(relevant) {
                return false;
            }
        }
        if let Some(shared) = self.shared {
            if record.shared != shared {
                return false;
            }
        }
        true
    }
}

/// Durable collection of paper records keyed by id
#[derive(Debug)]
pub struct PaperStore {
    path: PathBuf,
    records: Vec<PaperRecord>,
    by_id: HashMap<String, usize>,
    urls: HashSet<String>,
}

impl PaperStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<PaperRecord> = read_snapshot(&path)?.unwrap_or_default();

        let mut by_id = HashMap::with_capacity(records.len());
        let mut urls = HashSet::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            by_id.insert(record.id.clone(), idx);
            urls.insert(record.url.clone());
        }

        info!(path = %path.display(), records = records.len(), "Opened paper store");

        Ok(Self { path, records, by_id, urls })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn get(&self, id: &str) -> Option<&PaperRecord> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    /// Insert a new record after normalizing its publication timestamp
    pub fn insert(&mut self, mut record: PaperRecord) -> Result<()> {
        if record.id.is_empty() {
            return Err(AppError::MissingField { field: "id".into() });
        }
        if record.url.is_empty() {
            return Err(AppError::MissingField { field: "url".into() });
        }
        if self.by_id.contains_key(&record.id) {
            return Err(AppError::Duplicate {
                message: format!("id {} already stored", record.id),
            });
        }
        if self.urls.contains(&record.url) {
            return Err(AppError::Duplicate {
                message: format!("url {} already stored", record.url),
            });
        }

        record.published = normalize_timestamp(&record.published)?;

        let idx = self.records.len();
        self.by_id.insert(record.id.clone(), idx);
        self.urls.insert(record.url.clone());
        self.records.push(record);

        if let Err(e) = self.save() {
            if let Some(record) = self.records.pop() {
                self.by_id.remove(&record.id);
                self.urls.remove(&record.url);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Merge `patch` into the record with `id`.
    ///
    /// Returns `false` without writing when no such record exists.
    pub fn update(&mut self, id: &str, patch: PaperPatch) -> Result<bool> {
        let Some(&idx) = self.by_id.get(id) else {
            debug!(id, "Update for unknown paper ignored");
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(true);
        }

        let merged = patch.merged(&self.records[idx])?;
        let previous = std::mem::replace(&mut self.records[idx], merged);
        if let Err(e) = self.save() {
            self.records[idx] = previous;
            return Err(e);
        }
        Ok(true)
    }

    /// Copies of every record matching `query`, in insertion order
    pub fn find(&self, query: &PaperQuery) -> Vec<PaperRecord> {
        self.records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect()
    }

    /// Mark every summarized record published at or after `published_gte`
    /// as unsummarized, dropping its summary fields and the dependent fields
    /// listed in `cascade`. Writes once; nothing is written when no record
    /// changes.
    pub fn reset_summaries(
        &mut self,
        published_gte: &str,
        cascade: &[DependentField],
    ) -> Result<usize> {
        let mut count = 0;
        for record in self.records.iter_mut() {
            if record.summarized && record.published.as_str() >= published_gte {
                record.clear_summary();
                for field in cascade {
                    record.clear_dependent(*field);
                }
                // relevance cannot outlive the summary it was derived from
                if record.relevant.is_some() {
                    record.clear_dependent(DependentField::Relevant);
                }
                count += 1;
            }
        }

        if count > 0 {
            self.save()?;
        }
        info!(count, from = published_gte, "Reset summaries");
        Ok(count)
    }

    /// Clear one dependent field on records published at or after
    /// `published_gte`. Returns how many records changed.
    pub fn clear_field(&mut self, published_gte: &str, field: DependentField) -> Result<usize> {
        let mut count = 0;
        for record in self.records.iter_mut() {
            if record.published.as_str() < published_gte {
                continue;
            }
            let before = (record.relevant, record.projects.is_some(), record.shared);
            record.clear_dependent(field);
            if before != (record.relevant, record.projects.is_some(), record.shared) {
                count += 1;
            }
        }

        if count > 0 {
            self.save()?;
        }
        info!(count, ?field, from = published_gte, "Cleared field");
        Ok(count)
    }

    /// Set `shared = true` on each listed record; unknown ids are skipped
    pub fn mark_shared(&mut self, ids: &[String]) -> Result<usize> {
        let mut count = 0;
        for id in ids {
            if let Some(&idx) = self.by_id.get(id) {
                if !self.records[idx].shared {
                    self.records[idx].shared = true;
                    count += 1;
                }
            }
        }

        if count > 0 {
            self.save()?;
        }
        Ok(count)
    }

    fn save(&self) -> Result<()> {
        write_snapshot(&self.path, &self.records)
    }
}
