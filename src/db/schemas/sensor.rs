//! Sensor device and reading schemas

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Moisture,
    Co2,
    /// Combined environmental probe reporting several metrics
    #[default]
    Multi,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Online,
    #[default]
    Offline,
    Maintenance,
}

impl SensorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Online => "online",
            SensorStatus::Offline => "offline",
            SensorStatus::Maintenance => "maintenance",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Sensor {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    /// Record id of the silo the device is mounted in
    pub silo_id: String,

    /// Hardware identifier reported by the device, unique per tenant
    pub device_id: String,

    #[serde(default)]
    pub sensor_type: SensorType,

    pub name: String,

    #[serde(default)]
    pub status: SensorStatus,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_reading_at: Option<DateTime<Utc>>,
}

impl IntoIndexes for Sensor {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "tenant_id": 1, "device_id": 1 }, "sensor_device_unique"),
            index(doc! { "tenant_id": 1, "silo_id": 1 }, "sensor_silo_index"),
        ]
    }
}

impl_record!(Sensor, "sensors", tenant);

/// Measured values; devices report whichever subset they support
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReadingValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain_moisture: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airflow: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_light: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pest_presence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rainfall: Option<f64>,
}

impl ReadingValues {
    pub fn is_empty(&self) -> bool {
        self == &ReadingValues::default()
    }

    /// Reject non-finite numbers before they reach the store
    pub fn all_finite(&self) -> bool {
        [
            self.temperature,
            self.humidity,
            self.grain_moisture,
            self.co2,
            self.dew_point,
            self.airflow,
            self.ambient_light,
            self.pest_presence,
            self.rainfall,
        ]
        .iter()
        .flatten()
        .all(|v| v.is_finite())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SensorReading {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    pub silo_id: String,

    /// Record id of the reporting sensor
    pub sensor_id: String,

    #[serde(with = "timestamp")]
    pub recorded_at: DateTime<Utc>,

    #[serde(flatten)]
    pub values: ReadingValues,
}

impl IntoIndexes for SensorReading {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            index(doc! { "sensor_id": 1, "recorded_at": -1 }, "reading_sensor_time_index"),
            index(doc! { "tenant_id": 1, "silo_id": 1, "recorded_at": -1 }, "reading_silo_time_index"),
        ]
    }
}

impl_record!(SensorReading, "sensor_readings", tenant);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_values_flatten() {
        let reading = SensorReading {
            id: "r1".into(),
            tenant_id: "t1".into(),
            silo_id: "s1".into(),
            sensor_id: "d1".into(),
            recorded_at: Utc::now(),
            values: ReadingValues {
                temperature: Some(28.0),
                humidity: Some(75.0),
                ..Default::default()
            },
            ..Default::default()
        };

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["temperature"], 28.0);
        assert!(json.get("co2").is_none());

        let doc = bson::to_document(&reading).unwrap();
        let back: SensorReading = bson::from_document(doc).unwrap();
        assert_eq!(back.values, reading.values);
    }

    #[test]
    fn test_all_finite() {
        let mut values = ReadingValues {
            temperature: Some(21.0),
            ..Default::default()
        };
        assert!(values.all_finite());
        values.humidity = Some(f64::NAN);
        assert!(!values.all_finite());
        assert!(ReadingValues::default().is_empty());
    }
}
