//! HTTP middleware.
//!
//! - **Rate Limiting**: Per-client sliding window, 429 when exceeded
//! - **Client Keys**: Peer address extraction with trusted proxy support
//!
//! # Architecture
//!
//! ```text
//! Request → Trace → Rate Limiter → CORS → Handler → Response
//!                      ↓
//!             429 Too Many Requests
//! ```

pub mod ip;
pub mod rate_limit;

pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_CLIENT, client_key};
pub use rate_limit::{RateLimitLayer, RateLimitService, too_many_requests};
