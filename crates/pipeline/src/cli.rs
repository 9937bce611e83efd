//! Command line interface

use clap::Parser;
use secdigest_common::time::MAX_WINDOW_DAYS;
use std::path::PathBuf;

/// Track AI-security papers on arXiv and publish a digest
#[derive(Debug, Parser)]
#[command(name = "secdigest", version, about)]
pub struct Cli {
    /// Re-run every search query even if it completed recently
    #[arg(long)]
    pub force_search: bool,

    /// Discard summaries in the window and summarize again
    #[arg(long)]
    pub resummarize: bool,

    /// Publish every summarized paper, relevant or not
    #[arg(long)]
    pub include_all: bool,

    /// Skip search, download, summarization and classification
    #[arg(long)]
    pub share_only: bool,

    /// Forget project matches in the window and match again
    #[arg(long)]
    pub reclassify_projects: bool,

    /// Clear the shared flag in the window so papers are published again
    #[arg(long)]
    pub reshare: bool,

    /// Process papers published in the last N days
    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(i64).range(0..=MAX_WINDOW_DAYS)
    )]
    pub days: Option<i64>,

    /// Configuration file to load instead of the config/ directory
    #[arg(long, value_name = "PATH", env = "SECDIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Publish without the interactive review
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Behaviour switches for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub force_search: bool,
    pub resummarize: bool,
    pub include_all: bool,
    pub share_only: bool,
    pub reclassify_projects: bool,
    pub reshare: bool,
    /// Overrides `window.process_days`
    pub days: Option<i64>,
    pub skip_review: bool,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            force_search: self.force_search,
            resummarize: self.resummarize,
            include_all: self.include_all,
            share_only: self.share_only,
            reclassify_projects: self.reclassify_projects,
            reshare: self.reshare,
            days: self.days,
            skip_review: self.yes,
        }
    }
}
