#![warn(missing_docs)]
//! Core library entry points for the hostbound crawler.

pub mod controls;
pub mod fetch;
pub mod frontier;
pub mod html;
pub mod registry;
pub mod report;
pub mod runtime;

pub use controls::{Cli, CrawlControls, ReportFormat};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use frontier::{Frontier, FrontierClosed};
pub use html::{HtmlLinkParser, LinkParseError, LinkParser};
pub use registry::{CanonicalUrl, MalformedLink, SeedError, UrlRegistry};
pub use report::{PageError, PageResult, ResultSink, StdoutReporter};
pub use runtime::{CrawlStats, Crawler, StopHandle};
