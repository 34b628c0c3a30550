//! Crawl results and the sinks that consume them.

use crate::controls::ReportFormat;
use crate::fetch::FetchError;
use crate::html::LinkParseError;
use crate::registry::CanonicalUrl;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc::Receiver;
use tracing::warn;

/// One entry in the crawl report: what a claimed URL produced.
#[derive(Debug)]
pub enum PageResult {
    /// The page was fetched and scanned.
    Visited {
        /// Canonical URL of the page.
        url: CanonicalUrl,
        /// Every link on the page, raw and in document order.
        links: Vec<String>,
    },
    /// The page was claimed but could not be processed.
    Failed {
        /// Canonical URL of the page.
        url: CanonicalUrl,
        /// What went wrong.
        error: PageError,
    },
}

impl PageResult {
    /// The claimed URL this result describes.
    pub fn url(&self) -> &CanonicalUrl {
        match self {
            Self::Visited { url, .. } | Self::Failed { url, .. } => url,
        }
    }
}

impl Serialize for PageResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Visited { url, links } => {
                let mut state = serializer.serialize_struct("PageResult", 2)?;
                state.serialize_field("url", url.as_str())?;
                state.serialize_field("links", links)?;
                state.end()
            }
            Self::Failed { url, error } => {
                let mut state = serializer.serialize_struct("PageResult", 2)?;
                state.serialize_field("url", url.as_str())?;
                state.serialize_field("error", &error.to_string())?;
                state.end()
            }
        }
    }
}

/// Failure cause attached to a failed result.
#[derive(Debug)]
pub enum PageError {
    /// Fetching the page failed.
    Fetch(FetchError),
    /// Scanning the fetched markup failed.
    Parse(LinkParseError),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "fetch failed: {err}"),
            Self::Parse(err) => write!(f, "scan failed: {err}"),
        }
    }
}

impl Error for PageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Parse(err) => Some(err),
        }
    }
}

/// Consumes the stream of crawl results until the crawler closes it.
pub trait ResultSink: Send + 'static {
    /// Drains `results` to completion.
    fn run(self, results: Receiver<PageResult>) -> impl Future<Output = ()> + Send;
}

/// Sink that prints each result to stdout as it arrives.
///
/// Diagnostics go to stderr through `tracing`, so stdout stays parseable.
#[derive(Debug, Clone, Copy)]
pub struct StdoutReporter {
    format: ReportFormat,
}

impl StdoutReporter {
    /// Creates a reporter emitting `format` output.
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    fn print_text(result: &PageResult) {
        match result {
            PageResult::Visited { url, links } => {
                println!("Visited: {url}");
                if links.is_empty() {
                    println!("No links found.");
                } else {
                    println!("Found {} link(s):", links.len());
                    for link in links {
                        println!("  - {link}");
                    }
                }
                println!();
            }
            PageResult::Failed { url, error } => {
                println!("Failed: {url}");
                println!("  cause: {error}");
                println!();
            }
        }
    }

    fn print_json(result: &PageResult) {
        match serde_json::to_string(result) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "could not encode result"),
        }
    }
}

impl ResultSink for StdoutReporter {
    async fn run(self, mut results: Receiver<PageResult>) {
        while let Some(result) = results.recv().await {
            match self.format {
                ReportFormat::Text => Self::print_text(&result),
                ReportFormat::Json => Self::print_json(&result),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UrlRegistry;
    use serde_json::json;

    fn seed_url() -> CanonicalUrl {
        UrlRegistry::new("https://x.com")
            .expect("seed parses")
            .seed()
            .clone()
    }

    #[test]
    fn visited_results_encode_url_and_links() {
        let result = PageResult::Visited {
            url: seed_url(),
            links: vec!["/about".to_string(), "blog.html".to_string()],
        };
        let value = serde_json::to_value(&result).expect("encodes");
        assert_eq!(
            value,
            json!({"url": "https://x.com", "links": ["/about", "blog.html"]})
        );
    }

    #[test]
    fn failed_results_encode_the_cause() {
        let result = PageResult::Failed {
            url: seed_url(),
            error: PageError::Fetch(FetchError::Status(500)),
        };
        let value = serde_json::to_value(&result).expect("encodes");
        assert_eq!(
            value,
            json!({"url": "https://x.com", "error": "fetch failed: unexpected status 500"})
        );
    }
}
