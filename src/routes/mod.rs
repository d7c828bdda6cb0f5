//! Presentation API gateway.
//!
//! Each sibling module owns one concern and exports a subrouter; this module
//! merges them and attaches the shared [`AppState`]. `main.rs` only sees
//! [`router`].

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde::Serialize;

use crate::{AlertHandle, Dashboard, ReadingSource};

mod alerts;
mod dashboard;
mod health;
mod locations;

// ---

/// State shared by every route.
pub struct AppState<S> {
    pub dashboard: Arc<Dashboard<S>>,
    pub alerts: AlertHandle,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            dashboard: self.dashboard.clone(),
            alerts: self.alerts.clone(),
        }
    }
}

pub fn router<S: ReadingSource>(state: AppState<S>) -> Router {
    // ---
    Router::new()
        .merge(dashboard::router())
        .merge(locations::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state(state)
}

/// JSON error body returned when the reading source fails.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn upstream_error(e: anyhow::Error) -> Response {
    // ---
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorResponse {
            error: format!("{e:#}"),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::alerts::{AlertManager, DEFAULT_ALERT_TTL};
    use crate::models::fixtures::reading;
    use crate::models::PredictionLabel::{Anomaly, Drinkable, NotDrinkable};
    use crate::source::testing::StaticSource;
    use crate::AnomalyBatch;

    struct Harness {
        app: Router,
        state: AppState<StaticSource>,
        lifetime: CancellationToken,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.lifetime.cancel();
        }
    }

    fn harness() -> Harness {
        // ---
        let source = StaticSource::new(vec![
            reading("a", 42.619447, 21.234465, Drinkable),
            reading("b", 42.821412, 21.308285, NotDrinkable),
            reading("c", 42.821412, 21.308285, Anomaly),
            reading("d", 10.0, 10.0, Anomaly),
        ]);
        let lifetime = CancellationToken::new();
        let (alerts, _task) = AlertManager::spawn(DEFAULT_ALERT_TTL, lifetime.clone());
        let state = AppState {
            dashboard: Arc::new(Dashboard::new(source)),
            alerts,
        };

        Harness {
            app: router(state.clone()),
            state,
            lifetime,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        // ---
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_is_ok() {
        // ---
        let h = harness();
        let (status, json) = call(&h.app, "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn dashboard_before_first_pass_is_empty_and_good() {
        // ---
        let h = harness();
        let (status, json) = call(&h.app, "GET", "/dashboard").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["generation"], 0);
        assert_eq!(json["water_quality_good"], true);
        assert_eq!(json["total_locations"], 0);

        let (_, markers) = call(&h.app, "GET", "/dashboard/markers").await;
        assert_eq!(markers["fit_bounds"], false);
        assert!(markers["bounds"].is_null());
    }

    #[tokio::test]
    async fn dashboard_reflects_refresh() {
        // ---
        let h = harness();
        h.state.dashboard.refresh().await.unwrap();

        let (_, json) = call(&h.app, "GET", "/dashboard").await;
        assert_eq!(json["total_locations"], 3);
        // Latest-distinct keeps one reading per location, so nothing is mixed.
        assert_eq!(json["distribution"]["drinkable"], 1);
        assert_eq!(json["distribution"]["not_drinkable"], 1);
        assert_eq!(json["distribution"]["anomaly"], 1);
        assert_eq!(json["distribution"]["mixed"], 0);
        assert_eq!(json["water_quality_good"], false);
        assert_eq!(json["sensors"]["total"], 12);

        let (_, markers) = call(&h.app, "GET", "/dashboard/markers").await;
        assert_eq!(markers["markers"].as_array().unwrap().len(), 3);
        assert_eq!(markers["fit_bounds"], true);

        let (_, locations) = call(&h.app, "GET", "/dashboard/locations").await;
        assert_eq!(locations.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn manual_refresh_is_accepted() {
        // ---
        let h = harness();
        let (status, _) = call(&h.app, "POST", "/dashboard/refresh").await;

        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn locations_are_named() {
        // ---
        let h = harness();
        let (status, json) = call(&h.app, "GET", "/locations").await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Liqeni I Badovcit", "Liqeni I Batllaves", "Unknown"]);
    }

    #[tokio::test]
    async fn location_stats_split_predictions() {
        // ---
        let h = harness();
        let (status, json) = call(
            &h.app,
            "GET",
            "/locations/stats?latitude=42.821412&longitude=21.308285",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Liqeni I Batllaves");
        assert_eq!(json["statistics"]["split"]["not_drinkable"], 1);
        assert_eq!(json["statistics"]["split"]["drinkable"], 0);
        assert_eq!(
            json["statistics"]["series"]["timestamps"].as_array().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn anomaly_review_lists_anomalies() {
        // ---
        let h = harness();
        let (_, json) = call(&h.app, "GET", "/anomalies").await;
        assert_eq!(json.as_array().unwrap().len(), 2);

        let (_, limited) = call(&h.app, "GET", "/anomalies?limit=1").await;
        assert_eq!(limited.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_is_bad_gateway() {
        // ---
        let h = harness();
        h.state.dashboard.source().set_failing(true);

        let (status, json) = call(&h.app, "GET", "/anomalies").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json["error"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn alert_lifecycle_over_http() {
        // ---
        let h = harness();
        let alert = h
            .state
            .alerts
            .raise(AnomalyBatch {
                count: 3,
                received_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let (_, list) = call(&h.app, "GET", "/alerts").await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert!(list[0]["message"].as_str().unwrap().contains('3'));

        let action_uri = format!("/alerts/{}/action", alert.id);
        let (status, action) = call(&h.app, "POST", &action_uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(action["navigate_to"], "/airiskalerts");

        // The action does not dismiss.
        let (_, list) = call(&h.app, "GET", "/alerts").await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let dismiss_uri = format!("/alerts/{}", alert.id);
        let (status, _) = call(&h.app, "DELETE", &dismiss_uri).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&h.app, "DELETE", &dismiss_uri).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, list) = call(&h.app, "GET", "/alerts").await;
        assert!(list.as_array().unwrap().is_empty());

        let (status, _) = call(&h.app, "POST", &action_uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
