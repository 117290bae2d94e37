//! Client key extraction for rate limiting.
//!
//! The key is the IP address of the direct TCP peer, taken from axum's
//! `ConnectInfo<SocketAddr>` request extension. The port is dropped so that
//! a client opening many connections still maps to one bucket.
//!
//! # Reverse Proxies
//!
//! Behind a reverse proxy every request arrives from the proxy's address,
//! which would put all clients into a single bucket. Operators can list the
//! proxy networks in `TRUSTED_PROXIES`; for peers inside those ranges the
//! first `X-Forwarded-For` entry (or `X-Real-IP`) becomes the key instead.
//! Forwarding headers from any other peer are ignored, since a client talking
//! to the service directly could otherwise pick its own bucket.
//!
//! ```text
//!   peer in TRUSTED_PROXIES? ──yes──► X-Forwarded-For[0] / X-Real-IP / peer IP
//!            │
//!            no
//!            ▼
//!        peer IP ─── no ConnectInfo ───► "unknown"
//! ```
//!
//! ## The "unknown" Fallback
//!
//! Requests without a resolvable peer share the `"unknown"` key with any
//! client whose forwarded address is literally `unknown`. They are limited
//! collectively.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback key when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation ("10.0.0.0/8", "::1/128") or a bare address.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|&p| p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an address lies within this range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Set of proxy networks whose forwarding headers are believed.
///
/// An empty set trusts nobody, so the direct peer address is always used.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings; invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` belongs to a configured proxy network.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Key Extraction
// =============================================================================

/// First address from `X-Forwarded-For`, falling back to `X-Real-IP`.
fn forwarded_address<B>(req: &Request<B>) -> Option<&str> {
    let xff = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    xff.or_else(|| {
        req.headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

/// Peer address recorded by `into_make_service_with_connect_info`.
fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Derive the rate-limit key for a request.
///
/// Returns a borrowed `"unknown"` when no peer address is available.
pub fn client_key<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    let Some(peer) = peer_ip(req) else {
        return Cow::Borrowed(UNKNOWN_CLIENT);
    };

    if trusted_proxies.is_trusted(&peer) {
        if let Some(forwarded) = forwarded_address(req) {
            return Cow::Owned(forwarded.to_string());
        }
    } else if trusted_proxies.is_enabled() && forwarded_address(req).is_some() {
        debug!(peer = %peer, "Ignoring forwarding headers from untrusted peer");
    }

    Cow::Owned(peer.to_string())
}
