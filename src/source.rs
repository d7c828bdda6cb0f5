//! Reading source: the upstream service that serves sensor readings.
//!
//! Responses are JSON arrays. Items are decoded one by one so a single
//! malformed reading is logged and skipped instead of failing the batch.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::{PredictionLabel, SensorReading};

// ---

/// Upstream operations that return a batch of readings.
pub trait ReadingSource: Send + Sync + 'static {
    // ---
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<SensorReading>>> + Send;

    /// Latest reading per distinct location.
    fn fetch_latest_distinct(&self) -> impl Future<Output = Result<Vec<SensorReading>>> + Send;

    fn fetch_by_prediction(
        &self,
        label: PredictionLabel,
    ) -> impl Future<Output = Result<Vec<SensorReading>>> + Send;

    fn fetch_by_location(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> impl Future<Output = Result<Vec<SensorReading>>> + Send;
}

/// [`ReadingSource`] backed by the sensor REST API.
#[derive(Debug, Clone)]
pub struct HttpReadingSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReadingSource {
    // ---
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<SensorReading>> {
        // ---
        let url = format!("{}{}", self.base_url, path);
        debug!("Fetching readings from {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("{url} returned a non-JSON body"))?;

        decode_readings(&body).with_context(|| format!("unexpected payload from {url}"))
    }
}

impl ReadingSource for HttpReadingSource {
    // ---
    async fn fetch_all(&self) -> Result<Vec<SensorReading>> {
        self.get("", &[]).await
    }

    async fn fetch_latest_distinct(&self) -> Result<Vec<SensorReading>> {
        self.get("/latest/distinct", &[]).await
    }

    async fn fetch_by_prediction(&self, label: PredictionLabel) -> Result<Vec<SensorReading>> {
        self.get("/byPrediction", &[("prediction", u8::from(label).to_string())])
            .await
    }

    async fn fetch_by_location(&self, latitude: f64, longitude: f64) -> Result<Vec<SensorReading>> {
        self.get(
            "/byLocation",
            &[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
            ],
        )
        .await
    }
}

/// Decode a JSON array of readings, skipping items that do not parse.
pub fn decode_readings(body: &serde_json::Value) -> Result<Vec<SensorReading>> {
    // ---
    let items = body
        .as_array()
        .ok_or_else(|| anyhow!("expected a JSON array of readings"))?;

    let mut readings = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value::<SensorReading>(item.clone()) {
            Ok(reading) => readings.push(reading),
            Err(e) => {
                debug!("Failed to parse reading {}: {} - Raw item: {}", i, e, item);
            }
        }
    }

    debug!("Decoded {} of {} readings", readings.len(), items.len());
    Ok(readings)
}


#[cfg(test)]
pub(crate) mod testing {
    // ---
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::aggregate::LocationKey;

    /// In-memory [`ReadingSource`] over a fixed set of readings.
    #[derive(Debug, Default)]
    pub struct StaticSource {
        pub readings: Vec<SensorReading>,
        pub failing: AtomicBool,
    }

    impl StaticSource {
        pub fn new(readings: Vec<SensorReading>) -> Self {
            Self {
                readings,
                failing: AtomicBool::new(false),
            }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn select(&self, keep: impl Fn(&SensorReading) -> bool) -> Result<Vec<SensorReading>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("upstream unavailable"));
            }
            Ok(self.readings.iter().filter(|r| keep(r)).cloned().collect())
        }
    }

    impl ReadingSource for StaticSource {
        async fn fetch_all(&self) -> Result<Vec<SensorReading>> {
            self.select(|_| true)
        }

        async fn fetch_latest_distinct(&self) -> Result<Vec<SensorReading>> {
            let all = self.select(|_| true)?;
            let mut latest: Vec<SensorReading> = Vec::new();
            for reading in all {
                let key = LocationKey::of(&reading);
                match latest.iter_mut().find(|r| LocationKey::of(r) == key) {
                    Some(existing) if existing.timestamp < reading.timestamp => *existing = reading,
                    Some(_) => {}
                    None => latest.push(reading),
                }
            }
            Ok(latest)
        }

        async fn fetch_by_prediction(&self, label: PredictionLabel) -> Result<Vec<SensorReading>> {
            self.select(|r| r.prediction == label)
        }

        async fn fetch_by_location(&self, latitude: f64, longitude: f64) -> Result<Vec<SensorReading>> {
            let key = LocationKey::new(latitude, longitude);
            self.select(|r| LocationKey::of(r) == key)
        }
    }
}
