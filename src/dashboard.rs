//! Dashboard state: the latest aggregation pass and its projections.
//!
//! Every fetch is stamped with a generation number when it starts. A
//! completed fetch is applied only if no newer fetch has been applied
//! already, so a slow, superseded response can never overwrite fresher
//! data. A failed fetch leaves the current snapshot untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregate::{aggregate, LocationSummary};
use crate::projection::{project_markers, DashboardSummary, MarkerProjection};
use crate::{ReadingSource, SensorReading};

// ---

/// Result of one aggregation pass, replaced wholesale by the next.
#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    /// Generation of the fetch that produced this snapshot; 0 before the first.
    pub generation: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub locations: Vec<LocationSummary>,
    pub summary: DashboardSummary,
    pub markers: MarkerProjection,
}

impl DashboardSnapshot {
    fn from_readings(generation: u64, readings: &[SensorReading]) -> Self {
        // ---
        let locations = aggregate(readings);
        Self {
            generation,
            fetched_at: Some(Utc::now()),
            summary: DashboardSummary::from_summaries(&locations),
            markers: project_markers(&locations),
            locations,
        }
    }
}

pub struct Dashboard<S> {
    source: S,
    issued: AtomicU64,
    current: RwLock<Arc<DashboardSnapshot>>,
}

impl<S: ReadingSource> Dashboard<S> {
    // ---
    pub fn new(source: S) -> Self {
        Self {
            source,
            issued: AtomicU64::new(0),
            current: RwLock::new(Arc::new(DashboardSnapshot::default())),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stamp a new fetch. Generations are strictly increasing.
    pub fn begin_fetch(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Install the pass for `readings` unless a newer fetch already landed.
    ///
    /// Returns whether the snapshot was replaced.
    pub fn complete_fetch(&self, generation: u64, readings: &[SensorReading]) -> bool {
        // ---
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if generation <= current.generation {
            debug!(
                "Discarding stale fetch {} (current generation {})",
                generation, current.generation
            );
            return false;
        }

        let snapshot = DashboardSnapshot::from_readings(generation, readings);
        info!(
            generation,
            readings = readings.len(),
            locations = snapshot.locations.len(),
            "Dashboard refreshed"
        );
        *current = Arc::new(snapshot);
        true
    }

    /// Fetch the latest reading per location and apply it.
    pub async fn refresh(&self) -> Result<bool> {
        // ---
        let generation = self.begin_fetch();

        match self.source.fetch_latest_distinct().await {
            Ok(readings) => Ok(self.complete_fetch(generation, &readings)),
            Err(e) => {
                error!("Failed to fetch sensor data (fetch {}): {:#}", generation, e);
                Err(e)
            }
        }
    }
}

/// Refresh now, then every `every` until cancelled. A zero period means
/// refresh once and stop.
pub async fn run_refresher<S: ReadingSource>(
    dashboard: Arc<Dashboard<S>>,
    every: Duration,
    lifetime: CancellationToken,
) {
    // ---
    if every.is_zero() {
        let _ = dashboard.refresh().await;
        return;
    }

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = lifetime.cancelled() => break,
            _ = interval.tick() => {
                // Errors are already logged; the previous snapshot stays.
                let _ = dashboard.refresh().await;
            }
        }
    }
    info!("Dashboard refresher stopped");
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::fixtures::reading;
    use crate::models::PredictionLabel::{Drinkable, NotDrinkable};
    use crate::source::testing::StaticSource;

    #[test]
    fn test_initial_snapshot_is_empty() {
        // ---
        let dashboard = Dashboard::new(StaticSource::default());
        let snapshot = dashboard.snapshot();

        assert_eq!(snapshot.generation, 0);
        assert!(snapshot.fetched_at.is_none());
        assert!(snapshot.summary.water_quality_good);
        assert!(snapshot.markers.bounds.is_none());
    }

    #[test]
    fn test_stale_fetch_is_discarded() {
        // ---
        let dashboard = Dashboard::new(StaticSource::default());
        let older = dashboard.begin_fetch();
        let newer = dashboard.begin_fetch();

        assert!(dashboard.complete_fetch(newer, &[reading("new", 1.0, 1.0, Drinkable)]));
        assert!(!dashboard.complete_fetch(older, &[reading("old", 2.0, 2.0, NotDrinkable)]));

        let snapshot = dashboard.snapshot();
        assert_eq!(snapshot.generation, newer);
        assert_eq!(snapshot.locations.len(), 1);
        assert_eq!(snapshot.locations[0].readings[0].id, "new");
    }

    #[test]
    fn test_new_pass_replaces_previous() {
        // ---
        let dashboard = Dashboard::new(StaticSource::default());

        let first = dashboard.begin_fetch();
        dashboard.complete_fetch(first, &[reading("a", 1.0, 1.0, Drinkable)]);
        let second = dashboard.begin_fetch();
        dashboard.complete_fetch(second, &[]);

        let snapshot = dashboard.snapshot();
        assert!(snapshot.locations.is_empty());
        assert_eq!(snapshot.summary.sensors.total, 0);
    }

    #[tokio::test]
    async fn test_refresh_uses_latest_distinct() {
        // ---
        let mut later = reading("later", 1.0, 1.0, NotDrinkable);
        later.timestamp += chrono::Duration::hours(1);
        let source = StaticSource::new(vec![reading("early", 1.0, 1.0, Drinkable), later]);
        let dashboard = Dashboard::new(source);

        assert!(dashboard.refresh().await.unwrap());

        let snapshot = dashboard.snapshot();
        assert_eq!(snapshot.summary.distribution.not_drinkable, 1);
        assert!(!snapshot.summary.water_quality_good);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_state() {
        // ---
        let dashboard = Dashboard::new(StaticSource::new(vec![reading("a", 1.0, 1.0, Drinkable)]));
        dashboard.refresh().await.unwrap();
        let before = dashboard.snapshot();

        dashboard.source().set_failing(true);
        assert!(dashboard.refresh().await.is_err());

        let after = dashboard.snapshot();
        assert_eq!(after.generation, before.generation);
        assert_eq!(after.locations, before.locations);
    }

    #[tokio::test]
    async fn test_refresher_runs_once_with_zero_period() {
        // ---
        let dashboard = Arc::new(Dashboard::new(StaticSource::new(vec![reading(
            "a", 1.0, 1.0, Drinkable,
        )])));

        run_refresher(dashboard.clone(), Duration::ZERO, CancellationToken::new()).await;

        assert_eq!(dashboard.snapshot().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_ticks_until_cancelled() {
        // ---
        let dashboard = Arc::new(Dashboard::new(StaticSource::default()));
        let lifetime = CancellationToken::new();
        let task = tokio::spawn(run_refresher(
            dashboard.clone(),
            Duration::from_secs(30),
            lifetime.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(dashboard.snapshot().generation, 3);

        lifetime.cancel();
        task.await.unwrap();
    }
}
