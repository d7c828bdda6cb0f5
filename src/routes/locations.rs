use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, response::Response,
    routing::get, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{upstream_error, AppState};
use crate::projection::{distinct_locations, location_name, location_statistics, LocationStatistics};
use crate::{LocationKey, PredictionLabel, ReadingSource};

// ---

const DEFAULT_LIMIT: u32 = 1000;

pub fn router<S: ReadingSource>() -> Router<AppState<S>> {
    // ---
    Router::new()
        .route("/locations", get(list::<S>))
        .route("/locations/stats", get(stats::<S>))
        .route("/anomalies", get(anomalies::<S>))
}

async fn list<S: ReadingSource>(State(state): State<AppState<S>>) -> Response {
    // ---
    match state.dashboard.source().fetch_all().await {
        Ok(readings) => (StatusCode::OK, Json(distinct_locations(&readings))).into_response(),
        Err(e) => {
            error!("Failed to fetch locations: {:#}", e);
            upstream_error(e)
        }
    }
}

/// Query parameters selecting one location.
#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct StatsResponse {
    name: String,
    latitude: f64,
    longitude: f64,
    statistics: LocationStatistics,
}

async fn stats<S: ReadingSource>(
    Query(params): Query<LocationQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    info!("GET /locations/stats - {:?}", params);

    let readings = match state
        .dashboard
        .source()
        .fetch_by_location(params.latitude, params.longitude)
        .await
    {
        Ok(readings) => readings,
        Err(e) => {
            error!("Failed to fetch sensor data by location: {:#}", e);
            return upstream_error(e);
        }
    };

    let key = LocationKey::new(params.latitude, params.longitude);
    let address = readings.iter().find_map(|r| r.address.as_deref());

    let body = StatsResponse {
        name: location_name(key, address),
        latitude: params.latitude,
        longitude: params.longitude,
        statistics: location_statistics(&readings),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Query parameters for the anomaly review list.
#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    limit: Option<u32>,
}

/// The view an alert's action navigates to: every reading labelled anomalous.
async fn anomalies<S: ReadingSource>(
    Query(params): Query<AnomalyQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    match state
        .dashboard
        .source()
        .fetch_by_prediction(PredictionLabel::Anomaly)
        .await
    {
        Ok(mut readings) => {
            readings.truncate(params.limit.unwrap_or(DEFAULT_LIMIT) as usize);
            info!("Returning {} anomalous readings", readings.len());
            (StatusCode::OK, Json(readings)).into_response()
        }
        Err(e) => {
            error!("Failed to fetch sensor data by prediction: {:#}", e);
            upstream_error(e)
        }
    }
}
