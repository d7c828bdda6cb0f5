// src/routes/health.rs
//! Liveness endpoint for the water quality service.
//!
//! Container orchestrators and CI probe `/health` to confirm the process is
//! up and serving HTTP. It reports the crate version alongside the status
//! and never touches the reading source or the alert manager.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a subrouter containing the `/health` route.
///
/// Generic over the application state so it merges cleanly with the
/// gateway router whatever reading source the state carries.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
