//! Run context
//!
//! Everything a run touches is opened once here and handed to the stages
//! explicitly.

use crate::cli::RunOptions;
use secdigest_common::errors::{AppError, Result};
use secdigest_common::llm::create_model_client;
use secdigest_common::{AppConfig, ModelClient, PaperStore, SearchCache};
use secdigest_ingestion::{ArxivClient, DocumentFetcher, FeedSource, HttpFetcher, PdfExtractor, TextExtractor};
use std::sync::Arc;
use tracing::info;

pub struct PipelineContext {
    pub config: AppConfig,
    pub store: PaperStore,
    pub cache: SearchCache,
    /// Absent for runs that never call the model (`--share-only`)
    pub model: Option<Arc<dyn ModelClient>>,
    pub source: Arc<dyn FeedSource>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl PipelineContext {
    /// Open the store and cache and build the production adapters
    pub fn from_config(config: AppConfig, options: &RunOptions) -> Result<Self> {
        let model = if options.share_only {
            None
        } else {
            Some(create_model_client(&config.model)?)
        };
        let source: Arc<dyn FeedSource> = Arc::new(ArxivClient::from_config(&config.search)?);
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(HttpFetcher::new(&config.download)?);

        Self::with_adapters(config, model, source, fetcher, Arc::new(PdfExtractor))
    }

    /// Open the store and cache around caller-supplied adapters
    pub fn with_adapters(
        config: AppConfig,
        model: Option<Arc<dyn ModelClient>>,
        source: Arc<dyn FeedSource>,
        fetcher: Arc<dyn DocumentFetcher>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        let store = PaperStore::open(&config.paths.db_path)?;
        let cache = SearchCache::open(&config.paths.search_state_path)?;

        info!(
            records = store.len(),
            cached_queries = cache.len(),
            model = model.as_ref().map(|m| m.model_name()).unwrap_or("none"),
            "Pipeline context ready"
        );

        Ok(Self {
            config,
            store,
            cache,
            model,
            source,
            fetcher,
            extractor,
        })
    }

    pub fn model(&self) -> Result<Arc<dyn ModelClient>> {
        self.model.clone().ok_or_else(|| AppError::Configuration {
            message: "no model client configured for this run".to_string(),
        })
    }
}
