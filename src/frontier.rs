//! Work queue feeding canonical URLs to the crawl workers.

use crate::registry::CanonicalUrl;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore};

/// Error returned when the frontier no longer accepts work.
///
/// Carries the rejected URL back to the caller so any bookkeeping done ahead
/// of the push can be rolled back.
#[derive(Debug)]
pub struct FrontierClosed(
    /// The URL the frontier refused.
    pub CanonicalUrl,
);

impl fmt::Display for FrontierClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frontier closed; rejected {}", self.0)
    }
}

impl Error for FrontierClosed {}

/// Unbounded FIFO queue of URLs awaiting a worker.
///
/// Producers never block. Consumers park in [`Frontier::pop`] until an item
/// arrives or the frontier closes; after close, whatever is still queued is
/// drained in order before `pop` starts returning `None`.
pub struct Frontier {
    queue: Mutex<VecDeque<CanonicalUrl>>,
    ready: Semaphore,
    pending: AtomicUsize,
    closed: AtomicBool,
}

impl Frontier {
    /// Constructs a new, open, empty frontier.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of URLs waiting inside the queue.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// True once [`Frontier::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Appends `url` to the back of the queue.
    ///
    /// Never blocks on capacity. Fails only after close, handing the URL
    /// back to the caller.
    pub async fn push(&self, url: CanonicalUrl) -> Result<(), FrontierClosed> {
        if self.is_closed() {
            return Err(FrontierClosed(url));
        }
        let mut queue = self.queue.lock().await;
        // Rechecked under the lock; close may have won the race.
        if self.is_closed() {
            return Err(FrontierClosed(url));
        }
        queue.push_back(url);
        self.pending.fetch_add(1, Ordering::Release);
        self.ready.add_permits(1);
        Ok(())
    }

    /// Takes the oldest queued URL, parking until one exists.
    ///
    /// Returns `None` only once the frontier is closed and fully drained.
    pub async fn pop(&self) -> Option<CanonicalUrl> {
        loop {
            match self.ready.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    if let Some(url) = self.take_front().await {
                        return Some(url);
                    }
                }
                // Closed: the semaphore stops handing out permits outright,
                // so drain straight from the queue instead.
                Err(_) => return self.take_front().await,
            }
        }
    }

    async fn take_front(&self) -> Option<CanonicalUrl> {
        let mut queue = self.queue.lock().await;
        let next = queue.pop_front();
        if next.is_some() {
            self.pending.fetch_sub(1, Ordering::Release);
        }
        next
    }

    /// Closes the frontier and wakes every parked [`Frontier::pop`].
    ///
    /// Idempotent; later pushes are rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.close();
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}
