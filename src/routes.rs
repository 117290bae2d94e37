//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging, 429s included
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if the client's window is full
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Answers preflights, decorates admitted responses
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! The limiter sees every inbound request, preflights included. A rejected
//! request never reaches the CORS layer, so its 429 carries no CORS headers.

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handlers;
use crate::middleware::{RateLimitLayer, TrustedProxyConfig};
use crate::state::AppState;

/// Methods permitted for cross-origin requests.
pub const CORS_ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Build the application router with all routes and middleware configured.
///
/// The router's rate limiter is the one held by `state`, so the background
/// sweep and the middleware see the same client logs.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let mut router = Router::new().route("/healthz", get(handlers::healthz));

    // =========================================================================
    // Apply Middleware Stack (order matters - last layer added runs first)
    // =========================================================================

    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    info!(
        max_requests = state.limiter.max_requests(),
        window_secs = state.limiter.window().as_secs(),
        trusted_proxies = config.trusted_proxies.len(),
        "Rate limiting enabled"
    );
    router = router.layer(RateLimitLayer::new(
        state.limiter.clone(),
        TrustedProxyConfig::new(&config.trusted_proxies),
    ));

    router = router.layer(TraceLayer::new_for_http());

    router.with_state(state)
}

/// Build CORS layer from configuration.
///
/// Any origin and any header are allowed when `*` is listed; otherwise only
/// the listed origins (unparsable entries are skipped with a warning).
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o.escape_debug(), "Skipping unparsable CORS origin");
                    None
                }
            })
            .collect();
        if origins.is_empty() {
            warn!("No valid CORS origins configured, cross-origin requests will be refused");
        }
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(CORS_ALLOWED_METHODS)
        .allow_headers(Any)
}
