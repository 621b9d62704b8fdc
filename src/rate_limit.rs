//! Token-bucket admission control for broker HTTP APIs.
//!
//! A [`RateLimiter`] is configured either up front with a fixed limit per
//! interval, or lazily from the first server response's rate-limit headers.
//! In the header-driven mode the first request runs alone so that the
//! baseline is established before any parallel traffic starts.
//!
//! Each admitted request spends one token, which returns to the bucket one
//! interval after it was spent. Bursts across a window boundary therefore
//! never exceed the limit.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{BarfeedError, Result};

/// How often a blocked [`RateLimiter::wait`] re-checks for a free slot.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Minimum delay before retrying after an HTTP 429.
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Window assumed when the server reports a limit without one.
const DEFAULT_HEADER_WINDOW: Duration = Duration::from_secs(60);

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";
const RETRY_AFTER_HEADER: &str = "retry-after";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Manual,
    Headers,
}

#[derive(Debug)]
struct Bucket {
    limit: u32,
    interval: Duration,
    /// When each token still out was spent, oldest first.
    spent: VecDeque<Instant>,
}

impl Bucket {
    fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit,
            interval,
            spent: VecDeque::new(),
        }
    }

    /// Returns tokens spent at least one interval before `now`.
    fn refill(&mut self, now: Instant) {
        while self
            .spent
            .front()
            .is_some_and(|&at| now.duration_since(at) >= self.interval)
        {
            self.spent.pop_front();
        }
    }

    fn in_use(&self) -> u32 {
        u32::try_from(self.spent.len()).unwrap_or(u32::MAX)
    }

    fn available(&self) -> u32 {
        self.limit.saturating_sub(self.in_use())
    }

    /// Marks tokens as spent at `at` until `used` are out.
    fn spend_up_to(&mut self, used: u32, at: Instant) {
        let missing = used.saturating_sub(self.in_use());
        if missing == 0 {
            return;
        }
        self.spent.extend((0..missing).map(|_| at));
        self.spent.make_contiguous().sort_unstable();
    }
}

#[derive(Debug)]
struct LimiterState {
    bucket: Option<Bucket>,
    /// A response has been observed, so no request needs to run alone.
    learned: bool,
}

/// Limits read from one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderLimits {
    limit: Option<u32>,
    window: Option<Duration>,
    remaining: Option<u32>,
    reset: Option<Duration>,
}

impl HeaderLimits {
    fn parse(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let limit_text = text(LIMIT_HEADER);
        Self {
            limit: limit_text
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok()),
            window: limit_text.and_then(parse_window),
            remaining: text(REMAINING_HEADER).and_then(|v| v.trim().parse().ok()),
            reset: text(RESET_HEADER)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Extracts the `w=SECS` window from a policy such as `100, 100;w=60`.
fn parse_window(value: &str) -> Option<Duration> {
    value
        .split([',', ';'])
        .filter_map(|part| part.trim().strip_prefix("w="))
        .find_map(|secs| secs.parse().ok())
        .map(Duration::from_secs)
}

/// Token-bucket rate limiter shared by all requests to one API.
#[derive(Debug)]
pub struct RateLimiter {
    mode: Mode,
    state: Mutex<LimiterState>,
    learning: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    /// A limiter admitting `limit` requests per `interval`.
    pub fn manual(limit: u32, interval: Duration) -> Self {
        Self {
            mode: Mode::Manual,
            state: Mutex::new(LimiterState {
                bucket: Some(Bucket::new(limit, interval)),
                learned: true,
            }),
            learning: tokio::sync::Mutex::new(()),
        }
    }

    /// A limiter that learns its limits from response headers.
    pub fn from_headers() -> Self {
        Self {
            mode: Mode::Headers,
            state: Mutex::new(LimiterState {
                bucket: None,
                learned: false,
            }),
            learning: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns `true` once a limit is known.
    pub fn is_configured(&self) -> bool {
        self.state.lock().bucket.is_some()
    }

    fn needs_learning(&self) -> bool {
        self.mode == Mode::Headers && !self.state.lock().learned
    }

    /// Requests that may start right now, or `None` when no limit has been
    /// established (unlimited).
    pub fn remaining(&self) -> Option<u32> {
        let mut state = self.state.lock();
        let bucket = state.bucket.as_mut()?;
        bucket.refill(Instant::now());
        Some(bucket.available())
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let Some(bucket) = state.bucket.as_mut() else {
            return true;
        };
        let now = Instant::now();
        bucket.refill(now);
        if bucket.available() > 0 {
            bucket.spent.push_back(now);
            true
        } else {
            false
        }
    }

    /// Waits until a request slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::Cancelled`] if `cancel` fires first.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(BarfeedError::Cancelled);
            }
            if self.try_acquire() {
                return Ok(());
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(BarfeedError::Cancelled),
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Updates the bucket from a response and maps 429 to an error.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::RateLimited`] for `429 Too Many Requests`,
    /// with a retry delay of at least [`MIN_RETRY_BACKOFF`].
    pub fn observe_response(&self, status: StatusCode, headers: &HeaderMap) -> Result<()> {
        let limits = HeaderLimits::parse(headers);
        let now = Instant::now();

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let first = !state.learned;
            state.learned = true;

            match (self.mode, state.bucket.as_mut(), limits.limit) {
                (Mode::Headers, None, Some(limit)) => {
                    let interval = limits.window.unwrap_or(DEFAULT_HEADER_WINDOW);
                    info!(limit, interval_secs = interval.as_secs(), "learned rate limit");
                    state.bucket = Some(Bucket::new(limit, interval));
                }
                (Mode::Headers, Some(bucket), Some(limit)) => {
                    bucket.limit = limit;
                    if let Some(window) = limits.window {
                        bucket.interval = window;
                    }
                }
                (Mode::Headers, None, None) if first => {
                    info!("server sent no rate limit headers, requests are unlimited");
                }
                _ => {}
            }

            if let Some(bucket) = state.bucket.as_mut() {
                bucket.refill(now);
                if let Some(remaining) = limits.remaining {
                    // Server-side usage returns at the reported reset, or a
                    // full interval from now when no reset is given.
                    let spent_at = limits
                        .reset
                        .filter(|reset| *reset <= bucket.interval)
                        .and_then(|reset| now.checked_sub(bucket.interval - reset))
                        .unwrap_or(now);
                    bucket.spend_up_to(bucket.limit.saturating_sub(remaining), spent_at);
                }
                if status == StatusCode::TOO_MANY_REQUESTS {
                    bucket.spend_up_to(bucket.limit, now);
                }
            }
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = headers
                .get(RETRY_AFTER_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(MIN_RETRY_BACKOFF)
                .max(MIN_RETRY_BACKOFF);
            warn!(retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
            return Err(BarfeedError::RateLimited { retry_after });
        }

        debug!(remaining = ?self.remaining(), "rate limit headroom");
        Ok(())
    }

    /// Performs one rate-limited request.
    ///
    /// In header mode, the first request runs alone to learn the limits;
    /// every other request waits for a slot first. A server that sends no
    /// limit headers leaves later requests unlimited.
    ///
    /// # Errors
    ///
    /// Returns [`BarfeedError::Cancelled`] if `cancel` fires, the request's
    /// own error, or [`BarfeedError::RateLimited`] on a 429 response.
    pub async fn call<F, Fut>(&self, cancel: &CancellationToken, request: F) -> Result<reqwest::Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = reqwest::Result<reqwest::Response>>,
    {
        if self.needs_learning() {
            let _guard = tokio::select! {
                () = cancel.cancelled() => return Err(BarfeedError::Cancelled),
                guard = self.learning.lock() => guard,
            };
            if self.needs_learning() {
                debug!("sending rate limit learning request");
                let response = send(cancel, request()).await?;
                self.observe_response(response.status(), response.headers())?;
                return Ok(response);
            }
        }

        self.wait(cancel).await?;
        let response = send(cancel, request()).await?;
        self.observe_response(response.status(), response.headers())?;
        Ok(response)
    }
}

async fn send<Fut>(cancel: &CancellationToken, fut: Fut) -> Result<reqwest::Response>
where
    Fut: Future<Output = reqwest::Result<reqwest::Response>>,
{
    tokio::select! {
        () = cancel.cancelled() => Err(BarfeedError::Cancelled),
        r = fut => Ok(r?),
    }
}
