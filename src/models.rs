//! Data models for water sensor readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// Externally computed classification of a single reading.
///
/// Encoded on the wire as the integers `0`, `1` and `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PredictionLabel {
    NotDrinkable,
    Drinkable,
    Anomaly,
}

impl TryFrom<u8> for PredictionLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotDrinkable),
            1 => Ok(Self::Drinkable),
            2 => Ok(Self::Anomaly),
            other => Err(format!("unknown prediction label {other}")),
        }
    }
}

impl From<PredictionLabel> for u8 {
    fn from(label: PredictionLabel) -> u8 {
        match label {
            PredictionLabel::NotDrinkable => 0,
            PredictionLabel::Drinkable => 1,
            PredictionLabel::Anomaly => 2,
        }
    }
}

/// One water sensor reading as served by the reading source.
///
/// The four measurement channels are optional: upstream sends the
/// temperature as a string and may leave any channel empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    // ---
    pub id: String,
    #[serde(default, deserialize_with = "lenient_channel")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_channel")]
    pub ph: Option<f64>,
    #[serde(default, deserialize_with = "lenient_channel")]
    pub flow: Option<f64>,
    #[serde(default, deserialize_with = "lenient_channel")]
    pub turbidity: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub prediction: PredictionLabel,
}

/// Number of measurement channels carried by every reading.
pub const CHANNELS_PER_READING: usize = 4;

impl SensorReading {
    // ---
    /// True when all four channels carry a usable value.
    ///
    /// A channel counts as reporting when it is present, finite and non-zero;
    /// a zero is what a disconnected probe reports upstream.
    pub fn is_fully_reporting(&self) -> bool {
        [self.temperature, self.ph, self.flow, self.turbidity]
            .iter()
            .all(|channel| channel_reports(*channel))
    }
}

fn channel_reports(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v.is_finite() && v != 0.0)
}

/// Accept a number, a numeric string, an empty string or null.
fn lenient_channel<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid channel value {s:?}: {e}"))),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    // ---
    use super::*;
    use chrono::TimeZone;

    /// A fully reporting reading at the given coordinate.
    pub fn reading(id: &str, lat: f64, lon: f64, prediction: PredictionLabel) -> SensorReading {
        // ---
        SensorReading {
            id: id.to_string(),
            temperature: Some(12.5),
            ph: Some(7.2),
            flow: Some(30.0),
            turbidity: Some(0.8),
            latitude: lat,
            longitude: lon,
            address: None,
            timestamp: Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap(),
            prediction,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_decodes_upstream_payload() {
        // ---
        let json = r#"{
            "id": "6f1c1a52-2b0e-4f43-9d7c-8f0f6c1d2a11",
            "temperature": "14.3",
            "ph": 7.4,
            "flow": 22,
            "turbidity": 1.25,
            "latitude": 42.619447,
            "longitude": 21.234465,
            "address": "Badovc",
            "timestamp": "2024-09-01T10:00:00Z",
            "prediction": 1
        }"#;

        let reading: SensorReading = serde_json::from_str(json).unwrap();

        assert_eq!(reading.temperature, Some(14.3));
        assert_eq!(reading.flow, Some(22.0));
        assert_eq!(reading.prediction, PredictionLabel::Drinkable);
        assert_eq!(reading.address.as_deref(), Some("Badovc"));
        assert!(reading.is_fully_reporting());
    }

    #[test]
    fn test_empty_and_null_channels_are_absent() {
        // ---
        let json = r#"{
            "id": "a", "temperature": "", "ph": null, "flow": 3, "turbidity": 0.4,
            "latitude": 1.0, "longitude": 1.0,
            "timestamp": "2024-09-01T10:00:00Z", "prediction": 0
        }"#;

        let reading: SensorReading = serde_json::from_str(json).unwrap();

        assert_eq!(reading.temperature, None);
        assert_eq!(reading.ph, None);
        assert!(!reading.is_fully_reporting());
    }

    #[test]
    fn test_unknown_prediction_label_is_rejected() {
        // ---
        let json = r#"{
            "id": "a", "latitude": 1.0, "longitude": 1.0,
            "timestamp": "2024-09-01T10:00:00Z", "prediction": 7
        }"#;

        assert!(serde_json::from_str::<SensorReading>(json).is_err());
    }

    #[test]
    fn test_zero_channel_is_not_reporting() {
        // ---
        let mut reading = fixtures::reading("a", 1.0, 1.0, PredictionLabel::Drinkable);
        assert!(reading.is_fully_reporting());

        reading.ph = Some(0.0);
        assert!(!reading.is_fully_reporting());
    }

    #[test]
    fn test_zero_as_text_is_not_reporting() {
        // ---
        // Temperature arrives as a string upstream. A plain truthiness check
        // would count the non-empty text "0" as reporting; it is decoded to
        // the number zero here and treated like any other zero.
        let json = r#"{
            "id": "a", "temperature": "0", "ph": 7.0, "flow": 10, "turbidity": 1.0,
            "latitude": 1.0, "longitude": 1.0,
            "timestamp": "2024-09-01T10:00:00Z", "prediction": 1
        }"#;

        let reading: SensorReading = serde_json::from_str(json).unwrap();

        assert_eq!(reading.temperature, Some(0.0));
        assert!(!reading.is_fully_reporting());
    }

    #[test]
    fn test_prediction_label_round_trips_as_integer() {
        // ---
        assert_eq!(serde_json::to_string(&PredictionLabel::Anomaly).unwrap(), "2");
        assert_eq!(u8::from(PredictionLabel::NotDrinkable), 0);
    }
}
