//! Search cache
//!
//! Remembers when each feed query last ran to completion so repeated runs
//! within the freshness window skip the upstream feed. Persisted as a flat
//! JSON object of `query -> completion timestamp`.

use crate::db::{read_snapshot, write_snapshot};
use crate::errors::Result;
use crate::metrics::record_cache;
use crate::time::cache_cutoff;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-query completion timestamps
#[derive(Debug)]
pub struct SearchCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl SearchCache {
    /// Load the cache at `path`; a missing file is an empty cache
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_snapshot(&path)?.unwrap_or_default();
        Ok(Self { path, entries })
    }

    /// Oldest completion time still fresh at `now`
    pub fn cutoff_for(now: DateTime<Utc>, cache_hours: u64) -> String {
        cache_cutoff(now, cache_hours)
    }

    /// True when `query` has never completed or last completed before
    /// `cutoff` (a canonical timestamp)
    pub fn is_stale(&self, query: &str, cutoff: &str) -> bool {
        let stale = match self.entries.get(query) {
            Some(completed) => completed.as_str() < cutoff,
            None => true,
        };
        record_cache(!stale, "search");
        stale
    }

    /// Last completion time for `query`
    pub fn completed_at(&self, query: &str) -> Option<&str> {
        self.entries.get(query).map(String::as_str)
    }

    /// Record that `query` finished at `timestamp` and persist immediately
    pub fn mark_complete(&mut self, query: &str, timestamp: &str) -> Result<()> {
        self.entries.insert(query.to_string(), timestamp.to_string());
        write_snapshot(&self.path, &self.entries)?;
        debug!(query, timestamp, "Search marked complete");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
