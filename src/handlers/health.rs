//! Liveness endpoint.
//!
//! `GET /healthz` answers `{"status": "ok"}` for as long as the process can
//! serve HTTP. It deliberately checks nothing else, so orchestrators only
//! restart the process when it is truly wedged.

use axum::Json;
use tracing::instrument;

use crate::models::HealthResponse;

/// Liveness check for Kubernetes or load balancers.
///
/// ```yaml
/// livenessProbe:
///   httpGet:
///     path: /healthz
///     port: 8000
/// ```
#[instrument]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_reports_ok() {
        let Json(body) = healthz().await;
        assert_eq!(body.status, "ok");
    }
}
