//! Canonical URL form, crawl scope, and claim-once bookkeeping.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use tokio::sync::Mutex;
use url::{Position, Url};

/// A URL in canonical form, usable as a deduplication key.
///
/// Canonical form is absolute, fragment-free, and carries at most the path it
/// was written with minus one trailing slash. The bare root collapses to just
/// scheme and authority, so `https://x.com/` and `https://x.com` share one
/// canonical form. Query strings are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    parsed: Url,
    text: String,
}

impl CanonicalUrl {
    /// Canonical string form; two URLs are the same page iff these match.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Errors raised while validating the seed URL.
#[derive(Debug)]
pub enum SeedError {
    /// The seed could not be parsed as a URL.
    Invalid(url::ParseError),
    /// The seed parsed but names no host to bound the crawl.
    MissingHost(String),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "invalid seed url: {err}"),
            Self::MissingHost(seed) => write!(f, "seed url {seed} names no host"),
        }
    }
}

impl Error for SeedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            Self::MissingHost(_) => None,
        }
    }
}

/// Error produced when a discovered link cannot be canonicalized.
#[derive(Debug)]
pub struct MalformedLink {
    link: String,
    source: url::ParseError,
}

impl MalformedLink {
    fn new(link: &str, source: url::ParseError) -> Self {
        Self {
            link: link.to_string(),
            source,
        }
    }
}

impl fmt::Display for MalformedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed link {:?}: {}", self.link, self.source)
    }
}

impl Error for MalformedLink {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Scope policy, canonical form, and the claimed set for one crawl.
#[derive(Debug)]
pub struct UrlRegistry {
    seed: CanonicalUrl,
    host: String,
    claimed: Mutex<HashSet<String>>,
}

impl UrlRegistry {
    /// Builds a registry bounded to the host of `seed`.
    ///
    /// A seed without a scheme is retried with `https://` prefixed; a seed
    /// that still names no host is rejected.
    pub fn new(seed: &str) -> Result<Self, SeedError> {
        let parsed = match Url::parse(seed) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(&format!("https://{seed}")).map_err(SeedError::Invalid)?
            }
            Err(err) => return Err(SeedError::Invalid(err)),
        };
        let host = parsed
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| SeedError::MissingHost(seed.to_string()))?;

        Ok(Self {
            seed: canonical_form(parsed),
            host,
            claimed: Mutex::new(HashSet::new()),
        })
    }

    /// The canonicalized seed URL the crawl starts from.
    pub fn seed(&self) -> &CanonicalUrl {
        &self.seed
    }

    /// Hostname every in-scope URL must match.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Resolves `raw` into canonical form.
    ///
    /// Scheme-less links resolve against `base`, the page they were found on,
    /// or against the seed when no base is supplied. Fails only when the link
    /// cannot be parsed as a URL at all.
    pub fn canonicalize(
        &self,
        raw: &str,
        base: Option<&CanonicalUrl>,
    ) -> Result<CanonicalUrl, MalformedLink> {
        let resolved = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = base.map_or(&self.seed.parsed, |page| &page.parsed);
                base.join(raw)
                    .map_err(|source| MalformedLink::new(raw, source))?
            }
            Err(source) => return Err(MalformedLink::new(raw, source)),
        };
        Ok(canonical_form(resolved))
    }

    /// True when `url` sits on the seed's host.
    ///
    /// The hostname comparison is exact: subdomains and other hosts are out
    /// of scope, as are links carrying no host at all (`mailto:` and
    /// friends). Ports and schemes are not compared.
    pub fn in_scope(&self, url: &CanonicalUrl) -> bool {
        url.parsed.host_str() == Some(self.host.as_str())
    }

    /// Claims `url` for the caller.
    ///
    /// The check and the insert happen under one lock, so at most one claim
    /// ever succeeds per canonical form no matter how many workers race.
    pub async fn try_claim(&self, url: &CanonicalUrl) -> bool {
        self.claimed.lock().await.insert(url.text.clone())
    }
}

fn canonical_form(mut url: Url) -> CanonicalUrl {
    url.set_fragment(None);
    if url.cannot_be_a_base() {
        // Opaque schemes (mailto:, data:) have no path hierarchy to trim and
        // never pass the scope check anyway.
        let text = url.as_str().to_string();
        return CanonicalUrl { parsed: url, text };
    }
    if let Some(trimmed) = url.path().strip_suffix('/') {
        let trimmed = trimmed.to_owned();
        url.set_path(&trimmed);
    }
    let text = render(&url);
    CanonicalUrl { parsed: url, text }
}

// Serializes scheme, authority, path, and query while leaving the bare root
// path out entirely, so the host by itself reads `https://x.com`.
fn render(url: &Url) -> String {
    let mut text = url[..Position::BeforePath].to_string();
    let path = url.path();
    if path != "/" {
        text.push_str(path);
    }
    if let Some(query) = url.query() {
        text.push('?');
        text.push_str(query);
    }
    text
}
