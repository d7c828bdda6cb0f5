//! Alert banner endpoints: list, dismiss and primary action.

use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, response::Response,
    routing::delete, routing::get, routing::post, Json, Router,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use super::AppState;
use crate::{AlertEvent, ReadingSource};

// ---

pub fn router<S: ReadingSource>() -> Router<AppState<S>> {
    // ---
    Router::new()
        .route("/alerts", get(list::<S>))
        .route("/alerts/{id}", delete(dismiss::<S>))
        .route("/alerts/{id}/action", post(action::<S>))
}

async fn list<S: ReadingSource>(State(state): State<AppState<S>>) -> Json<Vec<AlertEvent>> {
    Json(state.alerts.active())
}

/// Dismissing an alert that is already gone is not an error.
async fn dismiss<S: ReadingSource>(
    Path(id): Path<Uuid>,
    State(state): State<AppState<S>>,
) -> StatusCode {
    // ---
    match state.alerts.dismiss(id).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!("Failed to dismiss alert {}: {:#}", id, e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Serialize)]
struct ActionResponse {
    navigate_to: &'static str,
}

/// Resolve the alert's navigation target. The alert stays active.
async fn action<S: ReadingSource>(
    Path(id): Path<Uuid>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    match state.alerts.action(id) {
        Some(target) => Json(ActionResponse {
            navigate_to: target.route(),
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
