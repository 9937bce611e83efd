//! Configuration management for the SecDigest pipeline
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with SECDIGEST__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, Result};
use crate::time::MAX_WINDOW_DAYS;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Search feed configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Active processing window
    #[serde(default)]
    pub window: WindowConfig,

    /// Language model endpoint configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Document download configuration
    #[serde(default)]
    pub download: DownloadConfig,

    /// Project catalog used by project classification
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Record store snapshot
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Search cache snapshot
    #[serde(default = "default_search_state_path")]
    pub search_state_path: PathBuf,

    /// Downloaded source documents
    #[serde(default = "default_papers_dir")]
    pub papers_dir: PathBuf,

    /// Rendered digests
    #[serde(default = "default_summaries_dir")]
    pub summaries_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Feed endpoint
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Raw search_query expressions, one request series per entry
    #[serde(default = "default_search_queries")]
    pub queries: Vec<String>,

    /// Results requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Offset of the first page
    #[serde(default)]
    pub start_offset: usize,

    /// A query completed within this many hours is not re-issued
    #[serde(default = "default_cache_hours")]
    pub cache_hours: u64,

    /// Lower bound of the jittered delay between page requests
    #[serde(default = "default_page_delay_min_ms")]
    pub page_delay_min_ms: u64,

    /// Upper bound of the jittered delay between page requests
    #[serde(default = "default_page_delay_max_ms")]
    pub page_delay_max_ms: u64,

    /// Request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    /// Papers published within this many days are processed and published
    #[serde(default = "default_process_days")]
    pub process_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Provider: azure, openai, mock
    #[serde(default = "default_model_provider")]
    pub provider: String,

    /// Endpoint base (Azure resource URL or OpenAI-compatible base URL)
    pub endpoint: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Model (OpenAI) or deployment name (Azure)
    #[serde(default = "default_model_name")]
    pub model: String,

    /// Azure API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Pause between consecutive model submissions
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Truncate extracted text to this many characters (0 = unlimited)
    #[serde(default)]
    pub max_input_chars: usize,

    /// Give up retrying transient failures after this many seconds
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_secs: u64,

    /// Optional request timeout; model calls are unbounded when unset
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Per-document request timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// Maximum documents fetched at the same time
    #[serde(default = "default_download_concurrency")]
    pub concurrency: usize,

    /// User-Agent header sent with document and feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// One entry of the project catalog
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProjectConfig {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,
}

// Default value functions
fn default_db_path() -> PathBuf { PathBuf::from("papers.json") }
fn default_search_state_path() -> PathBuf { PathBuf::from("search_state.json") }
fn default_papers_dir() -> PathBuf { PathBuf::from("papers") }
fn default_summaries_dir() -> PathBuf { PathBuf::from("summaries") }
fn default_search_base_url() -> String { "https://export.arxiv.org/api/query".to_string() }
fn default_page_size() -> usize { 200 }
fn default_cache_hours() -> u64 { 1 }
fn default_page_delay_min_ms() -> u64 { 500 }
fn default_page_delay_max_ms() -> u64 { 1500 }
fn default_search_timeout() -> u64 { 60 }
fn default_process_days() -> i64 { 7 }
fn default_model_provider() -> String { "azure".to_string() }
fn default_model_name() -> String { "gpt-4o-mini".to_string() }
fn default_api_version() -> String { "2025-01-01-preview".to_string() }
fn default_request_delay_ms() -> u64 { 1000 }
fn default_retry_max_elapsed() -> u64 { 60 }
fn default_download_timeout() -> u64 { 20 }
fn default_download_concurrency() -> usize { 8 }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 6.3; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/33.0.1750.117 Safari/537.36".to_string()
}
fn default_log_level() -> String { "info".to_string() }

fn default_search_queries() -> Vec<String> {
    const TOPICS: &[(&str, &str)] = &[
        ("jailbreak", "llm"),
        ("abuse", "llm"),
        ("attack", "llm"),
        ("vulnerability", "llm"),
        ("malware", "llm"),
        ("phishing", "llm"),
        ("hack", "llm"),
        ("hijack", "llm"),
        ("backdoor", "llm"),
        ("trojan", "llm"),
        ("exploit", "agent"),
        ("vulnerability", "agent"),
        ("hijack", "agent"),
        ("attack", "agent"),
        ("backdoor", "agent"),
        ("malware", "agent"),
        ("phishing", "agent"),
        ("hack", "agent"),
        ("trojan", "agent"),
    ];

    let mut queries = vec![r#"all:"prompt%20injection"+AND+cat:cs.*"#.to_string()];
    queries.extend(
        TOPICS
            .iter()
            .map(|(term, scope)| format!(r#"all:"{}"+AND+"{}"+AND+cat:cs.*"#, term, scope)),
    );
    queries
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            search_state_path: default_search_state_path(),
            papers_dir: default_papers_dir(),
            summaries_dir: default_summaries_dir(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            queries: default_search_queries(),
            page_size: default_page_size(),
            start_offset: 0,
            cache_hours: default_cache_hours(),
            page_delay_min_ms: default_page_delay_min_ms(),
            page_delay_max_ms: default_page_delay_max_ms(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { process_days: default_process_days() }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            endpoint: None,
            api_key: None,
            model: default_model_name(),
            api_version: default_api_version(),
            request_delay_ms: default_request_delay_ms(),
            max_input_chars: 0,
            retry_max_elapsed_secs: default_retry_max_elapsed(),
            timeout_secs: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            concurrency: default_download_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            search: SearchConfig::default(),
            window: WindowConfig::default(),
            model: ModelConfig::default(),
            download: DownloadConfig::default(),
            projects: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with SECDIGEST__ prefix
            // e.g., SECDIGEST__MODEL__API_KEY=...
            .add_source(
                Environment::with_prefix("SECDIGEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file, still honouring environment overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("SECDIGEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.search.page_size == 0 {
            return Err(AppError::Configuration {
                message: "search.page_size must be greater than zero".to_string(),
            });
        }
        if self.search.page_delay_min_ms > self.search.page_delay_max_ms {
            return Err(AppError::Configuration {
                message: "search.page_delay_min_ms exceeds search.page_delay_max_ms".to_string(),
            });
        }
        if self.download.concurrency == 0 {
            return Err(AppError::Configuration {
                message: "download.concurrency must be greater than zero".to_string(),
            });
        }
        if !(0..=MAX_WINDOW_DAYS).contains(&self.window.process_days) {
            return Err(AppError::Configuration {
                message: format!("window.process_days must be within 0..={MAX_WINDOW_DAYS}"),
            });
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.id.trim().is_empty() {
                return Err(AppError::Configuration {
                    message: "project ids must not be empty".to_string(),
                });
            }
            if !seen.insert(project.id.as_str()) {
                return Err(AppError::Configuration {
                    message: format!("duplicate project id '{}'", project.id),
                });
            }
        }

        Ok(())
    }

    /// Pause between consecutive model submissions
    pub fn model_request_delay(&self) -> Duration {
        Duration::from_millis(self.model.request_delay_ms)
    }
}
