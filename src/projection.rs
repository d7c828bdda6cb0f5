//! Projections derived from an aggregation pass.
//!
//! Everything here reads a slice of [`LocationSummary`] (or one location's
//! readings) and produces render-ready values for the chart and map
//! collaborators. No projection holds state between passes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{Classification, LocationKey, LocationSummary};
use crate::models::{PredictionLabel, SensorReading};

// ---

/// Locations per classification bucket.
///
/// Mixed locations are kept out of the three quality buckets and counted
/// separately, so the four fields always sum to the number of locations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityDistribution {
    pub drinkable: usize,
    pub not_drinkable: usize,
    pub anomaly: usize,
    pub mixed: usize,
}

impl QualityDistribution {
    pub fn total_locations(&self) -> usize {
        self.drinkable + self.not_drinkable + self.anomaly + self.mixed
    }
}

pub fn distribution(summaries: &[LocationSummary]) -> QualityDistribution {
    // ---
    summaries
        .iter()
        .fold(QualityDistribution::default(), |mut dist, summary| {
            match summary.classification {
                Classification::Drinkable => dist.drinkable += 1,
                Classification::NotDrinkable => dist.not_drinkable += 1,
                Classification::Anomaly => dist.anomaly += 1,
                Classification::Mixed => dist.mixed += 1,
            }
            dist
        })
}

/// True when every location is drinkable; vacuously true with no locations.
pub fn is_water_quality_good(summaries: &[LocationSummary]) -> bool {
    summaries
        .iter()
        .all(|s| s.classification == Classification::Drinkable)
}

/// Sensor counts summed over all locations of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SensorHealth {
    pub total: usize,
    pub active: usize,
}

pub fn sensor_health(summaries: &[LocationSummary]) -> SensorHealth {
    SensorHealth {
        total: summaries.iter().map(|s| s.total_sensor_count).sum(),
        active: summaries.iter().map(|s| s.active_sensor_count).sum(),
    }
}

/// Everything the dashboard header and doughnut chart render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub distribution: QualityDistribution,
    pub water_quality_good: bool,
    pub total_locations: usize,
    pub sensors: SensorHealth,
}

impl DashboardSummary {
    pub fn from_summaries(summaries: &[LocationSummary]) -> Self {
        let dist = distribution(summaries);
        Self {
            distribution: dist,
            water_quality_good: is_water_quality_good(summaries),
            total_locations: dist.total_locations(),
            sensors: sensor_health(summaries),
        }
    }
}

/// The summary of an empty pass, so overall quality starts out good.
impl Default for DashboardSummary {
    fn default() -> Self {
        Self::from_summaries(&[])
    }
}

// ---

/// Marker colour tier on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Good,
    Bad,
    Warning,
    /// Readings at the location disagree.
    Indeterminate,
}

impl From<Classification> for QualityTier {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Drinkable => Self::Good,
            Classification::NotDrinkable => Self::Bad,
            Classification::Anomaly => Self::Warning,
            Classification::Mixed => Self::Indeterminate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDescriptor {
    pub latitude: f64,
    pub longitude: f64,
    pub tier: QualityTier,
    pub classification: Classification,
    pub summary: String,
}

/// Smallest latitude/longitude box covering a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingRegion {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingRegion {
    fn point(latitude: f64, longitude: f64) -> Self {
        Self {
            south: latitude,
            west: longitude,
            north: latitude,
            east: longitude,
        }
    }

    fn extend(self, latitude: f64, longitude: f64) -> Self {
        Self {
            south: self.south.min(latitude),
            west: self.west.min(longitude),
            north: self.north.max(latitude),
            east: self.east.max(longitude),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarkerProjection {
    pub markers: Vec<MarkerDescriptor>,
    /// `None` when there are no markers; the map must not be refit then.
    pub bounds: Option<BoundingRegion>,
}

impl MarkerProjection {
    pub fn fit_bounds(&self) -> bool {
        self.bounds.is_some()
    }
}

pub fn project_markers(summaries: &[LocationSummary]) -> MarkerProjection {
    // ---
    let markers: Vec<MarkerDescriptor> = summaries
        .iter()
        .map(|s| MarkerDescriptor {
            latitude: s.latitude,
            longitude: s.longitude,
            tier: s.classification.into(),
            classification: s.classification,
            summary: marker_summary(s),
        })
        .collect();

    let bounds = markers.iter().fold(None, |acc: Option<BoundingRegion>, m| {
        Some(match acc {
            Some(region) => region.extend(m.latitude, m.longitude),
            None => BoundingRegion::point(m.latitude, m.longitude),
        })
    });

    MarkerProjection { markers, bounds }
}

fn marker_summary(summary: &LocationSummary) -> String {
    // ---
    let mut text = format!(
        "Location ({:.2}, {:.2})\nWater Quality: {}",
        summary.latitude,
        summary.longitude,
        summary.classification.display_name()
    );

    if let Some(r) = summary.representative() {
        text.push_str(&format!(
            "\nTemperature: {} °C\npH: {}\nTurbidity: {}",
            channel_text(r.temperature),
            channel_text(r.ph),
            channel_text(r.turbidity)
        ));
    }
    text
}

fn channel_text(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

// ---

const KNOWN_LOCATIONS: [(f64, f64, &str); 4] = [
    (42.619447, 21.234465, "Liqeni I Badovcit"),
    (42.821412, 21.308285, "Liqeni I Batllaves"),
    (42.961875, 20.570339, "Liqeni I Ujmanit"),
    (42.486777, 20.422350, "Liqeni I Radoniqit"),
];

/// A distinct monitored location with a display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Display name for a coordinate: a known lake, else the upstream address.
pub fn location_name(key: LocationKey, address: Option<&str>) -> String {
    // ---
    KNOWN_LOCATIONS
        .iter()
        .find(|(lat, lon, _)| LocationKey::new(*lat, *lon) == key)
        .map(|(_, _, name)| name.to_string())
        .or_else(|| {
            address
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Distinct locations in first-seen order.
pub fn distinct_locations(readings: &[SensorReading]) -> Vec<NamedLocation> {
    // ---
    let mut seen = std::collections::HashSet::new();

    readings
        .iter()
        .filter(|r| seen.insert(LocationKey::of(r)))
        .map(|r| NamedLocation {
            name: location_name(LocationKey::of(r), r.address.as_deref()),
            latitude: r.latitude,
            longitude: r.longitude,
        })
        .collect()
}

/// Drinkable versus not-drinkable split for one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PredictionSplit {
    pub drinkable: usize,
    pub not_drinkable: usize,
    pub has_data: bool,
}

/// Time series of the three charted channels for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub temperature: Vec<Option<f64>>,
    pub ph: Vec<Option<f64>>,
    pub turbidity: Vec<Option<f64>>,
    pub has_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStatistics {
    pub split: PredictionSplit,
    pub series: LocationSeries,
}

pub fn location_statistics(readings: &[SensorReading]) -> LocationStatistics {
    // ---
    let count = |label: PredictionLabel| readings.iter().filter(|r| r.prediction == label).count();
    let drinkable = count(PredictionLabel::Drinkable);
    let not_drinkable = count(PredictionLabel::NotDrinkable);

    LocationStatistics {
        split: PredictionSplit {
            drinkable,
            not_drinkable,
            has_data: drinkable > 0 || not_drinkable > 0,
        },
        series: LocationSeries {
            timestamps: readings.iter().map(|r| r.timestamp).collect(),
            temperature: readings.iter().map(|r| r.temperature).collect(),
            ph: readings.iter().map(|r| r.ph).collect(),
            turbidity: readings.iter().map(|r| r.turbidity).collect(),
            has_data: !readings.is_empty(),
        },
    }
}
