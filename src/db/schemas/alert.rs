//! Alert document schema
//!
//! Alerts move `active -> acknowledged -> resolved`; a resolved alert is final.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    #[default]
    Manual,
    Sensor,
    Prediction,
    System,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Alert {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    /// Silo the alert belongs to
    pub silo_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,

    /// Metric that crossed its threshold, for sensor alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    pub title: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub status: AlertStatus,

    #[serde(default)]
    pub source: AlertSource,

    #[serde(with = "timestamp")]
    pub triggered_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl IntoIndexes for Alert {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            index(doc! { "tenant_id": 1, "status": 1, "severity": 1 }, "alert_status_index"),
            index(doc! { "tenant_id": 1, "silo_id": 1 }, "alert_silo_index"),
            index(doc! { "sensor_id": 1, "metric": 1, "status": 1 }, "alert_sensor_metric_index"),
        ]
    }
}

impl_record!(Alert, "alerts", tenant);
