//! Rate limiting middleware backed by [`SlidingWindowLimiter`].
//!
//! Every request is keyed by client address (see [`super::ip`]) and passed
//! through the limiter before the inner service is called. Admitted requests
//! go straight through; rejected ones are answered here and never reach a
//! handler.
//!
//! # Rejection Response
//!
//! ```text
//! HTTP/1.1 429 Too Many Requests
//! content-type: application/json
//! retry-after: 17
//! x-ratelimit-limit: 60
//! x-ratelimit-remaining: 0
//!
//! {"detail":"Too Many Requests"}
//! ```
//!
//! `Retry-After` is the number of whole seconds (rounded up, at least 1)
//! until the client's oldest admitted request leaves the window.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, client_key};
use crate::limiter::{Decision, SlidingWindowLimiter};
use crate::metrics;
use crate::models::ErrorDetail;

/// Rate limiting layer for the Tower middleware stack.
///
/// The limiter is shared, not owned: the same instance is also held by
/// `AppState` so the background sweep operates on live state.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(SlidingWindowLimiter::new(60, Duration::from_secs(60))?);
/// let app = Router::new()
///     .route("/healthz", get(handler))
///     .layer(RateLimitLayer::new(limiter, TrustedProxyConfig::default()));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<SlidingWindowLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = client_key(&req, &self.trusted_proxies);

        // Decided synchronously: the limiter never awaits.
        let decision = self.limiter.check(&key);
        metrics::record_decision(decision.is_admitted());

        match decision {
            Decision::Admit { .. } => {
                // Take the instance that was polled ready, leave a fresh clone behind.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move { inner.call(req).await })
            }
            Decision::Reject { retry_after } => {
                let retry_after_secs = retry_after_secs(retry_after);
                warn!(
                    client_key = %key,
                    path = %req.uri().path(),
                    retry_after_secs,
                    "Rate limit exceeded"
                );

                let response = too_many_requests(retry_after_secs, self.limiter.max_requests());
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

/// Whole seconds to advertise in `Retry-After`, rounded up and at least 1.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Build the 429 response sent to throttled clients.
pub fn too_many_requests(retry_after_secs: u64, limit: u32) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("Retry-After", retry_after_secs.to_string()),
            ("X-RateLimit-Limit", limit.to_string()),
            ("X-RateLimit-Remaining", "0".to_string()),
        ],
        Json(ErrorDetail::too_many_requests()),
    )
        .into_response()
}
