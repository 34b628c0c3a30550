//! Command-line surface and the knobs handed to the crawl engine.

use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Tunable knobs that bound one crawl.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlControls {
    seed_url: String,
    workers: usize,
    request_timeout: Duration,
}

impl CrawlControls {
    /// Constructs controls for `seed_url`; worker counts below 1 are raised to 1.
    pub fn new(seed_url: &str, workers: usize, request_timeout: Duration) -> Self {
        Self {
            seed_url: seed_url.to_string(),
            workers: workers.max(1),
            request_timeout,
        }
    }

    /// Seed URL whose host bounds the crawl.
    pub fn seed_url(&self) -> &str {
        &self.seed_url
    }

    /// Number of concurrent workers, always at least 1.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Per-request HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Output encodings for the stdout reporter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable blocks, one per page.
    Text,
    /// One JSON object per line.
    Json,
}

/// Command-line interface for the hostbound binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "hostbound", about = "Bounded single-host web crawler")]
pub struct Cli {
    /// Seed URL; the crawl never leaves its host
    #[arg(long, env = "HOSTBOUND_URL")]
    pub url: String,

    /// Number of concurrent crawl workers
    #[arg(long, env = "HOSTBOUND_WORKERS", default_value_t = 10)]
    pub workers: usize,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "HOSTBOUND_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Result output format
    #[arg(long, env = "HOSTBOUND_OUTPUT", default_value = "text")]
    pub output: ReportFormat,
}

impl Cli {
    /// Converts the parsed CLI into `CrawlControls`.
    pub fn build_controls(&self) -> CrawlControls {
        CrawlControls::new(
            &self.url,
            self.workers,
            Duration::from_secs(self.timeout_secs),
        )
    }
}
