use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::request::RequestContext;

/// External rate-limit predicate consulted by the bot scorer.
///
/// Closures `Fn(&RequestContext) -> bool` implement it directly.
pub trait RateLimiter: Send + Sync {
    fn is_rate_limited(&self, request: &RequestContext) -> bool;
}

impl<F> RateLimiter for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn is_rate_limited(&self, request: &RequestContext) -> bool {
        self(request)
    }
}

/// Per-client request counter within a fixed window
#[derive(Debug, Clone)]
struct WindowEntry {
    request_count: u64,
    window_start: Instant,
}

impl WindowEntry {
    fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            window_start: now,
        }
    }

    fn increment(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) > window {
            self.request_count = 1;
            self.window_start = now;
        } else {
            self.request_count += 1;
        }
    }
}

/// In-process fixed-window limiter keyed by remote IP.
///
/// Every call counts the request. Tracked clients are capped by an LRU so a
/// spray of addresses cannot grow memory without bound. Requests without a
/// remote IP share one bucket.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    limit: u64,
    window: Duration,
    entries: Arc<Mutex<LruCache<String, WindowEntry>>>,
}

impl FixedWindowLimiter {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(limit: u64, window: Duration) -> Self {
        Self::with_capacity(limit, window, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(limit: u64, window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            limit,
            window,
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Count a request from `client` and report whether it is over the limit
    pub fn hit(&self, client: &str, now: Instant) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => {
                error!("SECURITY: rate limiter lock poisoned - recovering");
                poisoned.into_inner()
            }
        };
        let entry = entries.get_or_insert_mut(client.to_string(), || WindowEntry::new(now));
        entry.increment(now, self.window);
        let limited = entry.request_count > self.limit;
        if limited {
            debug!(
                "Client {} over rate limit: {} requests in {:?}",
                client, entry.request_count, self.window
            );
        }
        limited
    }

    /// Requests counted in the current window for `client`
    pub fn count(&self, client: &str) -> Option<u64> {
        let mut entries = self.entries.lock().ok()?;
        entries.get(client).map(|entry| entry.request_count)
    }

    pub fn reset(&self, client: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(client);
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn is_rate_limited(&self, request: &RequestContext) -> bool {
        let client = request
            .remote_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.hit(&client, Instant::now())
    }
}
