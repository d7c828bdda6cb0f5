//! Application entry point for the `water-quality-monitor` service.
//!
//! This binary orchestrates the full startup sequence for the water quality
//! dashboard backend, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Starting the dashboard refresher against the reading source
//! - Starting the alert manager and subscribing it to the anomaly channel
//! - Mounting all presentation routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `READINGS_API_URL` (**required**) – reading source base URL
//! - `ANOMALY_CHANNEL_URL` (**required**) – anomaly push channel URL
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining tunables.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod aggregate;
mod alerts;
mod channel;
mod config;
mod dashboard;
mod models;
mod projection;
mod routes;
mod source;

// Re-exported so sibling modules depend on their parent (main.rs) rather
// than reaching into each other.
pub use aggregate::{LocationKey, LocationSummary};
pub use alerts::{AlertEvent, AlertHandle, AlertManager, DEFAULT_ALERT_TTL};
pub use channel::{AnomalyBatch, HttpPushChannel};
pub use dashboard::{run_refresher, Dashboard};
pub use models::{PredictionLabel, SensorReading};
pub use source::{HttpReadingSource, ReadingSource};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let lifetime = CancellationToken::new();

    let source = HttpReadingSource::new(&cfg.readings_url, cfg.api_timeout)?;
    let dashboard = Arc::new(Dashboard::new(source));
    let refresher = tokio::spawn(run_refresher(
        dashboard.clone(),
        cfg.refresh_interval,
        lifetime.child_token(),
    ));

    let (alerts, alert_manager) = AlertManager::spawn(cfg.alert_ttl, lifetime.child_token());
    let push_channel = HttpPushChannel::new(&cfg.channel_url, cfg.api_timeout, cfg.reconnect_max)?;
    let anomaly_listener = channel::subscribe(push_channel, alerts.clone());

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(routes::AppState { dashboard, alerts });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(lifetime.clone()))
        .await?;

    lifetime.cancel();
    let _ = tokio::join!(refresher, alert_manager, anomaly_listener);
    tracing::info!("Shutdown complete");

    Ok(())
}

// ---

/// Resolve on Ctrl-C, or when something else cancels `lifetime`.
async fn shutdown_signal(lifetime: CancellationToken) {
    // ---
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Unable to listen for Ctrl-C: {}", e);
                lifetime.cancelled().await;
            }
        }
        _ = lifetime.cancelled() => {}
    }
    tracing::info!("Shutdown requested");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
