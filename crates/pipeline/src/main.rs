//! SecDigest batch runner
//!
//! One invocation runs the whole pipeline once:
//! 1. Searches arXiv and records new candidates
//! 2. Downloads and summarizes papers in the window
//! 3. Classifies relevance and project matches
//! 4. Publishes the dated digest after review

mod cli;
mod context;
mod review;
mod runner;

use anyhow::Context as _;
use clap::Parser;
use cli::Cli;
use context::PipelineContext;
use review::{AutoApprove, PromptReview, ShareReview};
use secdigest_common::config::{AppConfig, ObservabilityConfig};
use secdigest_common::{metrics, VERSION};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let options = cli.run_options();

    let config = match cli.config {
        Some(ref path) => AppConfig::from_file(&path.to_string_lossy())
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::load().context("loading configuration")?,
    };
    config.validate()?;

    init_tracing(&config.observability);
    info!("Starting SecDigest v{}", VERSION);

    metrics::register_metrics();

    let mut ctx = PipelineContext::from_config(config, &options)?;

    let mut review: Box<dyn ShareReview> = if options.skip_review {
        Box::new(AutoApprove)
    } else {
        Box::new(PromptReview::stdio())
    };

    let report = runner::run(&mut ctx, &options, review.as_mut(), chrono::Utc::now()).await?;
    if let Some(published) = report.published {
        info!(
            window = %report.pull_window,
            markdown = %published.markdown_path.display(),
            eml = %published.eml_path.display(),
            papers = published.ids.len(),
            "Digest written"
        );
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logging {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
