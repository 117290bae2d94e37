mod api;

pub use api::{ErrorDetail, HealthResponse};
