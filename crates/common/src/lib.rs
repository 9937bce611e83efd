//! SecDigest Common Library
//!
//! Shared code for all SecDigest stages including:
//! - The file-backed paper store and its record model
//! - The search completion cache
//! - Language model client abstraction
//! - Error types and handling
//! - Configuration management
//! - Timestamp normalization
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod time;

// Re-export commonly used types
pub use cache::SearchCache;
pub use config::AppConfig;
pub use db::models::{DependentField, PaperPatch, PaperRecord, Summary, Tag};
pub use db::{PaperQuery, PaperStore};
pub use errors::{AppError, Result, Severity};
pub use llm::ModelClient;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
