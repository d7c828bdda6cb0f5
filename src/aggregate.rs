//! Location aggregation for a batch of sensor readings.
//!
//! An aggregation pass is a pure reduction: readings are grouped by a
//! canonical coordinate key, each group is classified, and sensor-health
//! counts are computed from scratch. Nothing is carried over between passes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{PredictionLabel, SensorReading, CHANNELS_PER_READING};

// ---

/// Coordinates are canonicalized to micro-degrees (six decimal places).
const COORDINATE_SCALE: f64 = 1_000_000.0;

/// Canonical grouping key for a reading's coordinate.
///
/// Two readings share a location when their latitude and longitude agree
/// to six decimal places (about 0.1 m). This absorbs float noise picked up
/// in serialization, and `-0.0` and `0.0` map to the same key.
///
/// Coordinates must be finite. A NaN would land on `(0, 0)` and an infinity
/// would saturate, merging unrelated readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey {
    lat_micro: i64,
    lon_micro: i64,
}

impl LocationKey {
    // ---
    pub fn new(latitude: f64, longitude: f64) -> Self {
        debug_assert!(
            latitude.is_finite() && longitude.is_finite(),
            "non-finite coordinate ({latitude}, {longitude})"
        );
        Self {
            lat_micro: (latitude * COORDINATE_SCALE).round() as i64,
            lon_micro: (longitude * COORDINATE_SCALE).round() as i64,
        }
    }

    pub fn of(reading: &SensorReading) -> Self {
        Self::new(reading.latitude, reading.longitude)
    }

    pub fn latitude(&self) -> f64 {
        self.lat_micro as f64 / COORDINATE_SCALE
    }

    pub fn longitude(&self) -> f64 {
        self.lon_micro as f64 / COORDINATE_SCALE
    }
}

/// Classification bucket of one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Classification {
    Drinkable,
    NotDrinkable,
    Anomaly,
    /// Contributing readings disagree on their prediction label.
    Mixed,
}

impl Classification {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Drinkable => "Drinkable",
            Self::NotDrinkable => "NOT Drinkable",
            Self::Anomaly => "Anomaly",
            Self::Mixed => "Mixed",
        }
    }
}

impl From<PredictionLabel> for Classification {
    fn from(label: PredictionLabel) -> Self {
        match label {
            PredictionLabel::NotDrinkable => Self::NotDrinkable,
            PredictionLabel::Drinkable => Self::Drinkable,
            PredictionLabel::Anomaly => Self::Anomaly,
        }
    }
}

/// Aggregated view of every reading taken at one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    // ---
    pub latitude: f64,
    pub longitude: f64,
    pub classification: Classification,
    /// Contributing readings in the order they were encountered.
    pub readings: Vec<SensorReading>,
    pub total_sensor_count: usize,
    pub active_sensor_count: usize,
}

impl LocationSummary {
    /// The reading shown for this location on the map.
    pub fn representative(&self) -> Option<&SensorReading> {
        self.readings.first()
    }
}

/// Group `readings` by location and summarize each group.
///
/// The result is ordered by [`LocationKey`], so it does not depend on the
/// order of the input batch. Readings keep their encounter order within a
/// group. An empty batch yields an empty result.
pub fn aggregate(readings: &[SensorReading]) -> Vec<LocationSummary> {
    // ---
    let mut groups: BTreeMap<LocationKey, Vec<SensorReading>> = BTreeMap::new();

    for reading in readings {
        groups
            .entry(LocationKey::of(reading))
            .or_default()
            .push(reading.clone());
    }

    groups
        .into_iter()
        .filter_map(|(key, readings)| {
            let classification = classify(&readings)?;
            Some(LocationSummary {
                latitude: key.latitude(),
                longitude: key.longitude(),
                classification,
                total_sensor_count: total_sensor_count(&readings),
                active_sensor_count: active_sensor_count(&readings),
                readings,
            })
        })
        .collect()
}

/// Classify a group of readings taken at one location.
///
/// Returns `None` for an empty group. A unanimous group takes its shared
/// label; any disagreement is [`Classification::Mixed`].
pub fn classify(readings: &[SensorReading]) -> Option<Classification> {
    // ---
    let first = readings.first()?.prediction;

    if readings.iter().all(|r| r.prediction == first) {
        Some(first.into())
    } else {
        Some(Classification::Mixed)
    }
}

/// Every reading contributes one sensor per measurement channel.
pub fn total_sensor_count(readings: &[SensorReading]) -> usize {
    readings.len() * CHANNELS_PER_READING
}

/// Sensors belonging to readings whose four channels all report.
pub fn active_sensor_count(readings: &[SensorReading]) -> usize {
    readings.iter().filter(|r| r.is_fully_reporting()).count() * CHANNELS_PER_READING
}
