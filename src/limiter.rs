//! Per-client sliding-window request limiter.
//!
//! # Algorithm
//!
//! Every client key owns a `RequestLog` holding the instants of its admitted
//! requests. On each request the log is pruned of everything at least one
//! window old, then compared against the configured maximum:
//!
//! ```text
//!            window
//!   ◄──────────────────────►
//!   ──(────x──x─────x──────]──► time
//!  now-window             now
//!
//!   expired: now - t >= window   (dropped)
//!   retained: now - t <  window  (counted)
//! ```
//!
//! Rejected requests are never recorded, so a client that keeps hammering
//! the endpoint regains capacity as soon as its oldest admitted request
//! leaves the window.
//!
//! # Concurrency
//!
//! State lives in a [`DashMap`]. The prune/check/append sequence for a key
//! runs while holding that key's shard write guard, so two concurrent
//! requests for the same key can never both observe spare capacity for the
//! last slot. Different keys only contend when they hash to the same shard.
//!
//! # Memory
//!
//! Keys are created lazily and `admit` never removes them. Long-running
//! processes should call [`SlidingWindowLimiter::sweep`] periodically (the
//! application state does this in a background task) to drop idle clients.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

/// Default number of requests admitted per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 60;

const DEFAULT_MAX_NONZERO: NonZeroU32 = match NonZeroU32::new(DEFAULT_MAX_REQUESTS) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Error type for limiter construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// `max_requests` was zero.
    #[error("max_requests must be greater than 0")]
    ZeroMaxRequests,

    /// The window was zero-length.
    #[error("window must be longer than 0 seconds")]
    ZeroWindow,
}

/// Outcome of a single [`SlidingWindowLimiter::admit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request was recorded and may proceed.
    Admit {
        /// Slots still free in the window after this request.
        remaining: u32,
    },
    /// The window is full; nothing was recorded.
    Reject {
        /// Time until the oldest retained request expires.
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }
}

/// Admitted-request instants for a single client.
///
/// Instants are appended in call order. They are monotonic when produced by
/// [`SlidingWindowLimiter::check`]; callers of `admit` may pass arbitrary
/// instants, so pruning filters the whole log instead of only its front.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestLog {
    entries: VecDeque<Instant>,
}

impl RequestLog {
    /// Drop every entry at least `window` older than `now`.
    fn prune(&mut self, now: Instant, window: Duration) {
        self.entries
            .retain(|&t| now.saturating_duration_since(t) < window);
    }

    fn record(&mut self, now: Instant) {
        self.entries.push_back(now);
    }

    /// Time until the oldest retained entry leaves the window.
    fn time_until_slot_frees(&self, now: Instant, window: Duration) -> Duration {
        self.entries
            .iter()
            .min()
            .map(|&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or_default()
    }

    /// Number of retained entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether every entry has been pruned.
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory sliding-window limiter keyed by client identifier.
///
/// # Example
///
/// ```rust
/// use std::time::{Duration, Instant};
/// use solar_epc_api::limiter::SlidingWindowLimiter;
///
/// let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60)).unwrap();
/// let t0 = Instant::now();
///
/// assert!(limiter.admit("10.0.0.1", t0).is_admitted());
/// assert!(limiter.admit("10.0.0.1", t0).is_admitted());
/// assert!(!limiter.admit("10.0.0.1", t0).is_admitted());
/// ```
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    logs: DashMap<String, RequestLog>,
    max_requests: NonZeroU32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per `window` for each key.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if either parameter is zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        let max_requests = NonZeroU32::new(max_requests).ok_or(RateLimitError::ZeroMaxRequests)?;
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            logs: DashMap::new(),
            max_requests,
            window,
        })
    }

    /// Configured maximum requests per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests.get()
    }

    /// Configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a request from `key` observed at `now` may proceed.
    ///
    /// The whole read-prune-check-append sequence runs under the key's
    /// write guard.
    pub fn admit(&self, key: &str, now: Instant) -> Decision {
        let mut log = self.entry(key);
        self.decide(&mut log, now)
    }

    /// Like [`admit`](Self::admit), sampling the clock once the key's guard
    /// is held so that each log stays in arrival order.
    pub fn check(&self, key: &str) -> Decision {
        let mut log = self.entry(key);
        self.decide(&mut log, Instant::now())
    }

    fn entry(&self, key: &str) -> dashmap::mapref::one::RefMut<'_, String, RequestLog> {
        // Avoid allocating the key on the hot path for clients already tracked.
        match self.logs.get_mut(key) {
            Some(log) => log,
            None => self.logs.entry(key.to_owned()).or_default(),
        }
    }

    fn decide(&self, log: &mut RequestLog, now: Instant) -> Decision {
        log.prune(now, self.window);

        let limit = self.max_requests.get() as usize;
        if log.len() >= limit {
            return Decision::Reject {
                retry_after: log.time_until_slot_frees(now, self.window),
            };
        }

        log.record(now);
        let remaining = u32::try_from(limit - log.len()).unwrap_or(u32::MAX);
        Decision::Admit { remaining }
    }

    /// Drop every client whose log is empty after pruning at `now`.
    ///
    /// Returns the number of clients removed. A removed client is
    /// indistinguishable from one never seen.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.logs.retain(|_, log| {
            log.prune(now, self.window);
            if log.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.logs.len()
    }

    /// Retained request count for `key` as of its last prune.
    pub fn logged_requests(&self, key: &str) -> usize {
        self.logs.get(key).map(|log| log.len()).unwrap_or(0)
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self {
            logs: DashMap::new(),
            max_requests: DEFAULT_MAX_NONZERO,
            window: DEFAULT_WINDOW,
        }
    }
}
