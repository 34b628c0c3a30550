//! Crawl orchestration: the worker pool, completion detection, and metrics.

use crate::controls::CrawlControls;
use crate::fetch::Fetcher;
use crate::frontier::{Frontier, FrontierClosed};
use crate::html::LinkParser;
use crate::registry::{CanonicalUrl, SeedError, UrlRegistry};
use crate::report::{PageError, PageResult, ResultSink};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RESULT_CHANNEL_CAPACITY: usize = 1024;

struct CrawlState<F, P> {
    registry: UrlRegistry,
    frontier: Arc<Frontier>,
    fetcher: F,
    parser: P,
    outstanding: Arc<AtomicUsize>,
    stop_requested: Arc<AtomicBool>,
    metrics: CrawlMetrics,
}

impl<F, P> CrawlState<F, P> {
    fn stopped(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.frontier.close();
    }

    async fn enqueue(&self, url: CanonicalUrl) {
        // Counted before the push so the detector can never observe a zero
        // while the URL is in flight toward the queue.
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        match self.frontier.push(url).await {
            Ok(()) => self.metrics.record_enqueued(),
            Err(FrontierClosed(_)) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

/// Crawl driver owning the worker pool for one bounded crawl.
pub struct Crawler<F, P> {
    state: Arc<CrawlState<F, P>>,
    workers: usize,
}

impl<F: Fetcher, P: LinkParser> Crawler<F, P> {
    /// Builds a crawler for the seed in `controls`.
    ///
    /// Fails only on an unusable seed; everything after this point is a
    /// per-URL error, never a fatal one.
    pub fn new(controls: &CrawlControls, fetcher: F, parser: P) -> Result<Self, SeedError> {
        let registry = UrlRegistry::new(controls.seed_url())?;
        let state = Arc::new(CrawlState {
            registry,
            frontier: Arc::new(Frontier::new()),
            fetcher,
            parser,
            outstanding: Arc::new(AtomicUsize::new(0)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            metrics: CrawlMetrics::default(),
        });
        Ok(Self {
            state,
            workers: controls.workers(),
        })
    }

    /// Handle for requesting a graceful stop from outside the run.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_requested: Arc::clone(&self.state.stop_requested),
            frontier: Arc::clone(&self.state.frontier),
        }
    }

    /// Runs the crawl to completion, delivering every result to `sink`.
    ///
    /// Returns once the workers, the completion detector, and the sink have
    /// all wound down, so every emitted result has been consumed.
    pub async fn run<S: ResultSink>(self, sink: S) -> CrawlStats {
        let start = Instant::now();
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let sink_task = tokio::spawn(sink.run(results_rx));

        let seed = self.state.registry.seed().clone();
        debug!(seed = %seed, workers = self.workers, "starting crawl");
        self.state.enqueue(seed).await;

        let mut workers = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            workers.push(tokio::spawn(worker_loop(
                id,
                Arc::clone(&self.state),
                results_tx.clone(),
            )));
        }
        drop(results_tx);
        let detector = tokio::spawn(detect_completion(Arc::clone(&self.state)));

        join_all(workers).await;
        let _ = detector.await;
        let _ = sink_task.await;

        self.state.metrics.snapshot(start.elapsed())
    }
}

/// Requests a graceful stop of a running crawl.
#[derive(Clone)]
pub struct StopHandle {
    stop_requested: Arc<AtomicBool>,
    frontier: Arc<Frontier>,
}

impl StopHandle {
    /// Signals the workers and the detector to wind down.
    ///
    /// Workers finish the URL in hand without reporting it, stop pulling
    /// new work, and exit; whatever is still queued is discarded.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.frontier.close();
    }
}

async fn worker_loop<F: Fetcher, P: LinkParser>(
    worker_id: usize,
    state: Arc<CrawlState<F, P>>,
    results: mpsc::Sender<PageResult>,
) {
    while let Some(url) = state.frontier.pop().await {
        let _in_flight = InFlightGuard::new(state.outstanding.as_ref());
        if state.stopped() {
            break;
        }
        if !state.registry.try_claim(&url).await {
            state.metrics.record_duplicate();
            trace!(worker = worker_id, url = %url, "url already claimed");
            continue;
        }

        let result = process_page(state.as_ref(), &url).await;
        if state.stopped() {
            break;
        }
        if results.send(result).await.is_err() {
            warn!(worker = worker_id, "result sink dropped; stopping crawl");
            state.request_stop();
            break;
        }
    }
    debug!(worker = worker_id, "worker exiting");
}

async fn process_page<F: Fetcher, P: LinkParser>(
    state: &CrawlState<F, P>,
    url: &CanonicalUrl,
) -> PageResult {
    trace!(url = %url, "fetching");
    let body = match state.fetcher.fetch(url.as_str()).await {
        Ok(body) => body,
        Err(err) => {
            warn!(url = %url, error = %err, "fetch failed");
            state.metrics.record_fetch_error();
            return PageResult::Failed {
                url: url.clone(),
                error: PageError::Fetch(err),
            };
        }
    };

    let links = match state.parser.parse_links(&body) {
        Ok(links) => links,
        Err(err) => {
            warn!(url = %url, error = %err, "page scan failed");
            state.metrics.record_parse_error();
            return PageResult::Failed {
                url: url.clone(),
                error: PageError::Parse(err),
            };
        }
    };

    state.metrics.record_links_discovered(links.len());
    for raw in &links {
        match state.registry.canonicalize(raw, Some(url)) {
            Ok(child) => {
                if state.registry.in_scope(&child) {
                    state.enqueue(child).await;
                } else {
                    state.metrics.record_out_of_scope();
                    trace!(link = %raw, "out of scope");
                }
            }
            Err(err) => {
                state.metrics.record_malformed();
                debug!(link = %raw, error = %err, "unusable link");
            }
        }
    }

    state.metrics.record_page_visited();
    PageResult::Visited {
        url: url.clone(),
        links,
    }
}

async fn detect_completion<F, P>(state: Arc<CrawlState<F, P>>) {
    loop {
        sleep(COMPLETION_POLL_INTERVAL).await;
        if state.stopped() {
            return;
        }
        if state.outstanding.load(Ordering::Acquire) == 0 && state.frontier.is_empty() {
            debug!("no outstanding work; closing frontier");
            state.frontier.close();
            return;
        }
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    // The increment happened at enqueue time; the guard only releases that
    // slot once the popped URL is fully handled.
    fn new(counter: &'a AtomicUsize) -> Self {
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct CrawlMetrics {
    pages_visited: AtomicUsize,
    fetch_errors: AtomicUsize,
    parse_errors: AtomicUsize,
    links_discovered: AtomicUsize,
    urls_enqueued: AtomicUsize,
    duplicates_skipped: AtomicUsize,
    out_of_scope_links: AtomicUsize,
    malformed_links: AtomicUsize,
}

impl CrawlMetrics {
    fn record_page_visited(&self) {
        self.pages_visited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_links_discovered(&self, count: usize) {
        self.links_discovered.fetch_add(count, Ordering::Relaxed);
    }

    fn record_enqueued(&self) {
        self.urls_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_out_of_scope(&self) {
        self.out_of_scope_links.fetch_add(1, Ordering::Relaxed);
    }

    fn record_malformed(&self) {
        self.malformed_links.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, elapsed: Duration) -> CrawlStats {
        CrawlStats {
            pages_visited: self.pages_visited.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            links_discovered: self.links_discovered.load(Ordering::Relaxed),
            urls_enqueued: self.urls_enqueued.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            out_of_scope_links: self.out_of_scope_links.load(Ordering::Relaxed),
            malformed_links: self.malformed_links.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Counters describing a finished crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    /// Pages fetched and scanned successfully.
    pub pages_visited: usize,
    /// Fetches that failed outright.
    pub fetch_errors: usize,
    /// Pages whose markup could not be scanned.
    pub parse_errors: usize,
    /// Raw links seen across all visited pages.
    pub links_discovered: usize,
    /// In-scope links handed to the frontier.
    pub urls_enqueued: usize,
    /// Pops skipped because another worker already claimed the URL.
    pub duplicates_skipped: usize,
    /// Links dropped for leaving the seed host.
    pub out_of_scope_links: usize,
    /// Links that could not be canonicalized.
    pub malformed_links: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl CrawlStats {
    /// Prints the end-of-run summary.
    pub fn report(&self) {
        let secs = self.elapsed.as_secs_f32().max(f32::EPSILON);
        println!("--- crawl summary ({secs:.2}s) ---");
        println!("pages visited: {}", self.pages_visited);
        println!("pages/sec: {:.2}", self.pages_visited as f32 / secs);
        println!("links discovered: {}", self.links_discovered);
        println!("urls enqueued: {}", self.urls_enqueued);
        println!("duplicate skips: {}", self.duplicates_skipped);
        println!("out-of-scope links: {}", self.out_of_scope_links);
        println!("malformed links: {}", self.malformed_links);
        println!("fetch errors: {}", self.fetch_errors);
        println!("parse errors: {}", self.parse_errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::html::HtmlLinkParser;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::mpsc::Receiver;
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    struct SiteFetcher {
        pages: HashMap<String, String>,
        broken: HashSet<String>,
    }

    impl SiteFetcher {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
                broken: HashSet::new(),
            }
        }

        fn with_broken(mut self, url: &str) -> Self {
            self.broken.insert(url.to_string());
            self
        }
    }

    impl Fetcher for SiteFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            if self.broken.contains(url) {
                return Err(FetchError::Status(500));
            }
            match self.pages.get(url) {
                Some(body) => Ok(body.clone().into_bytes()),
                None => Ok(b"<html><body>nothing here</body></html>".to_vec()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct CollectSink {
        results: Arc<Mutex<Vec<PageResult>>>,
    }

    impl ResultSink for CollectSink {
        async fn run(self, mut results: Receiver<PageResult>) {
            while let Some(result) = results.recv().await {
                self.results.lock().await.push(result);
            }
        }
    }

    fn controls(workers: usize) -> CrawlControls {
        CrawlControls::new("https://x.com", workers, Duration::from_secs(5))
    }

    async fn crawl(fetcher: SiteFetcher, workers: usize) -> (Vec<String>, CrawlStats) {
        let sink = CollectSink::default();
        let collected = Arc::clone(&sink.results);
        let crawler =
            Crawler::new(&controls(workers), fetcher, HtmlLinkParser).expect("seed accepted");
        let stats = timeout(Duration::from_secs(5), crawler.run(sink))
            .await
            .expect("crawl terminates");
        let urls = collected
            .lock()
            .await
            .iter()
            .map(|result| result.url().as_str().to_string())
            .collect();
        (urls, stats)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn aliased_urls_are_visited_once() {
        let fetcher = SiteFetcher::new(&[(
            "https://x.com",
            r#"<a href="/about/">a</a><a href="/about#team">b</a><a href="/about">c</a>"#,
        )]);
        let (urls, stats) = crawl(fetcher, 2).await;

        let unique: HashSet<&String> = urls.iter().collect();
        assert_eq!(urls.len(), 2);
        assert!(unique.contains(&"https://x.com/about".to_string()));
        assert_eq!(stats.pages_visited, 2);
        assert_eq!(stats.duplicates_skipped, 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn offsite_links_are_dropped_silently() {
        let fetcher = SiteFetcher::new(&[(
            "https://x.com",
            concat!(
                r#"<a href="https://y.com/">off</a>"#,
                r#"<a href="https://sub.x.com/">sub</a>"#,
                r#"<a href="mailto:team@x.com">mail</a>"#,
            ),
        )]);
        let (urls, stats) = crawl(fetcher, 2).await;

        assert_eq!(urls, ["https://x.com"]);
        assert_eq!(stats.out_of_scope_links, 3);
        assert_eq!(stats.urls_enqueued, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cyclic_graphs_terminate() {
        let fetcher = SiteFetcher::new(&[
            ("https://x.com", r#"<a href="/a">a</a>"#),
            ("https://x.com/a", r#"<a href="/b">b</a><a href="/a">self</a>"#),
            ("https://x.com/b", r#"<a href="/a">back</a><a href="/">home</a>"#),
        ]);
        let (urls, stats) = crawl(fetcher, 4).await;

        let unique: HashSet<String> = urls.iter().cloned().collect();
        assert_eq!(urls.len(), 3);
        assert_eq!(
            unique,
            HashSet::from([
                "https://x.com".to_string(),
                "https://x.com/a".to_string(),
                "https://x.com/b".to_string(),
            ])
        );
        assert!(stats.duplicates_skipped >= 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn one_failing_page_does_not_stop_the_crawl() {
        let fetcher = SiteFetcher::new(&[(
            "https://x.com",
            r#"<a href="/broken">broken</a><a href="/fine">fine</a>"#,
        )])
        .with_broken("https://x.com/broken");

        let sink = CollectSink::default();
        let collected = Arc::clone(&sink.results);
        let crawler =
            Crawler::new(&controls(2), fetcher, HtmlLinkParser).expect("seed accepted");
        let stats = timeout(Duration::from_secs(5), crawler.run(sink))
            .await
            .expect("crawl terminates");

        let results = collected.lock().await;
        assert_eq!(results.len(), 3);
        let failed: Vec<&PageResult> = results
            .iter()
            .filter(|result| matches!(result, PageResult::Failed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].url().as_str(), "https://x.com/broken");
        assert_eq!(stats.fetch_errors, 1);
        assert_eq!(stats.pages_visited, 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unusable_seed_fails_construction() {
        let controls = CrawlControls::new("mailto:team@x.com", 2, Duration::from_secs(5));
        let fetcher = SiteFetcher::new(&[]);
        match Crawler::new(&controls, fetcher, HtmlLinkParser) {
            Err(SeedError::MissingHost(_)) => {}
            Err(other) => panic!("expected missing host, got {other:?}"),
            Ok(_) => panic!("seed without a host must be rejected"),
        }
    }
}
