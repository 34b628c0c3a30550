//! Page fetching over HTTP.

use reqwest::redirect::Policy;
use reqwest::Client;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

const USER_AGENT: &str = "hostbound/0.1";
const MAX_REDIRECTS: usize = 5;

/// Retrieves page bytes for the crawl workers.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches `url`, yielding the response body or a per-URL failure.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Errors raised while fetching one page.
#[derive(Debug)]
pub enum FetchError {
    /// The request could not complete (connect failure, timeout, body read).
    Http(reqwest::Error),
    /// The server answered with a non-success status code.
    Status(u16),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Status(code) => write!(f, "unexpected status {code}"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::Status(_) => None,
        }
    }
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a fetcher with bounded redirects and `timeout` per request.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(FetchError::Http)?;
        Ok(body.to_vec())
    }
}
