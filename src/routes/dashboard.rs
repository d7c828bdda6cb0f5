use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::AppState;
use crate::projection::{BoundingRegion, DashboardSummary, MarkerDescriptor};
use crate::{LocationSummary, ReadingSource};

// ---

pub fn router<S: ReadingSource>() -> Router<AppState<S>> {
    // ---
    Router::new()
        .route("/dashboard", get(summary::<S>))
        .route("/dashboard/markers", get(markers::<S>))
        .route("/dashboard/locations", get(locations::<S>))
        .route("/dashboard/refresh", post(refresh::<S>))
}

#[derive(Serialize)]
struct SummaryResponse {
    generation: u64,
    fetched_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    summary: DashboardSummary,
}

async fn summary<S: ReadingSource>(State(state): State<AppState<S>>) -> impl IntoResponse {
    // ---
    let snapshot = state.dashboard.snapshot();
    Json(SummaryResponse {
        generation: snapshot.generation,
        fetched_at: snapshot.fetched_at,
        summary: snapshot.summary.clone(),
    })
}

#[derive(Serialize)]
struct MarkersResponse {
    markers: Vec<MarkerDescriptor>,
    bounds: Option<BoundingRegion>,
    /// The map should only refit its view when there is something to show.
    fit_bounds: bool,
}

async fn markers<S: ReadingSource>(State(state): State<AppState<S>>) -> impl IntoResponse {
    // ---
    let snapshot = state.dashboard.snapshot();
    Json(MarkersResponse {
        markers: snapshot.markers.markers.clone(),
        bounds: snapshot.markers.bounds,
        fit_bounds: snapshot.markers.fit_bounds(),
    })
}

async fn locations<S: ReadingSource>(
    State(state): State<AppState<S>>,
) -> Json<Vec<LocationSummary>> {
    Json(state.dashboard.snapshot().locations.clone())
}

/// Start a fetch in the background. A slower, older fetch finishing later
/// is discarded by the dashboard's generation check.
async fn refresh<S: ReadingSource>(State(state): State<AppState<S>>) -> StatusCode {
    // ---
    info!("POST /dashboard/refresh - Starting refresh");

    let dashboard = state.dashboard.clone();
    tokio::spawn(async move {
        if let Ok(applied) = dashboard.refresh().await {
            debug!("Manual refresh applied: {}", applied);
        }
    });
    StatusCode::ACCEPTED
}
