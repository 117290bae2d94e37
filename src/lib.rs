//! # Solar EPC Manager API
//!
//! HTTP API scaffold for the Solar EPC Manager backend:
//!
//! - **Liveness**: `GET /healthz` for orchestrator health checks
//! - **CORS**: Any origin, `GET/POST/PUT/DELETE/OPTIONS`, any header
//! - **Rate Limiting**: In-memory sliding window per client address
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Trace → Rate Limit → CORS)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (healthz)                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SlidingWindowLimiter (DashMap<client, RequestLog>)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rate-limit state lives in process memory only. Every instance of the
//! service keeps its own view, so a deployment with N replicas admits up to
//! N times the configured rate per client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use solar_epc_api::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let addr = config.server_addr();
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::{Config, LogFormat};
pub use error::{AppError, AppResult};
pub use limiter::{Decision, RateLimitError, SlidingWindowLimiter};
pub use routes::build_router;
pub use state::AppState;
