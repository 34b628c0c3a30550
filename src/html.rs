//! Anchor extraction built on `lol_html`.

use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use std::cell::RefCell;
use std::error::Error;
use std::fmt;

/// Pulls raw link strings out of fetched page bytes.
pub trait LinkParser: Send + Sync + 'static {
    /// Returns every link found in `body`, in document order, untouched.
    fn parse_links(&self, body: &[u8]) -> Result<Vec<String>, LinkParseError>;
}

/// [`LinkParser`] backed by the `lol_html` streaming rewriter.
///
/// Collects the `href` of every anchor element exactly as written. No
/// resolution or filtering happens here; canonicalization runs later against
/// the page the link was found on.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLinkParser;

impl LinkParser for HtmlLinkParser {
    fn parse_links(&self, body: &[u8]) -> Result<Vec<String>, LinkParseError> {
        let collected = RefCell::new(Vec::new());

        let handler = element!("a[href]", |el| {
            if let Some(href) = el.get_attribute("href") {
                collected.borrow_mut().push(href);
            }
            Ok(())
        });

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![handler],
                ..Settings::default()
            },
            NoopSink,
        );
        rewriter.write(body).map_err(LinkParseError::Rewrite)?;
        rewriter.end().map_err(LinkParseError::Rewrite)?;

        Ok(collected.into_inner())
    }
}

/// Errors surfaced while scanning page markup.
#[derive(Debug)]
pub enum LinkParseError {
    /// The HTML rewriter encountered markup it could not process.
    Rewrite(lol_html::errors::RewritingError),
}

impl fmt::Display for LinkParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewrite(err) => write!(f, "html scan error: {err}"),
        }
    }
}

impl Error for LinkParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rewrite(err) => Some(err),
        }
    }
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}
