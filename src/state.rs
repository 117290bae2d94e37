//! Shared application state for Axum handlers and middleware.
//!
//! The state owns the one [`SlidingWindowLimiter`] of the process. It is
//! created explicitly at startup and handed to the router, so tests can build
//! as many isolated instances as they like.
//!
//! # Structured Concurrency
//!
//! The idle-client sweep runs as a background task tracked by a
//! `tokio_util::task::TaskTracker` and stopped through a
//! `CancellationToken`. Call `shutdown()` before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::AppResult;
use crate::limiter::SlidingWindowLimiter;
use crate::metrics;

/// Shared application state, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Per-client request limiter shared with the middleware layer
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// Must be called inside a Tokio runtime when the sweep is enabled,
    /// since the sweep task is spawned here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RateLimit` if the limiter parameters are zero.
    pub fn new(config: Config) -> AppResult<Self> {
        let limiter = SlidingWindowLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
        )?;

        let state = Self {
            limiter: Arc::new(limiter),
            started_at: Instant::now(),
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.sweep_enabled() {
            state.spawn_sweep_task(state.config.rate_limit_sweep_interval);
        }

        Ok(state)
    }

    /// Spawn the periodic idle-client sweep.
    fn spawn_sweep_task(&self, period: Duration) {
        let limiter = self.limiter.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep_idle_clients(&limiter);
                    }
                }
            }

            debug!("Sweep task shutting down");
        });
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Run one sweep pass and publish the result.
fn sweep_idle_clients(limiter: &SlidingWindowLimiter) -> usize {
    let removed = limiter.sweep(Instant::now());
    let remaining = limiter.tracked_clients();

    metrics::record_swept_clients(removed);
    metrics::set_tracked_clients(remaining);

    if removed > 0 {
        debug!(removed, remaining, "Swept idle rate limit clients");
    } else {
        trace!(remaining, "Sweep found no idle clients");
    }
    removed
}
