//! Grain batch document schema
//!
//! A batch is a tracked quantity of grain stored in one silo, carrying the
//! latest spoilage risk assessment.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Stored,
    Dispatched,
    Sold,
    Spoiled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Stored => "stored",
            BatchStatus::Dispatched => "dispatched",
            BatchStatus::Sold => "sold",
            BatchStatus::Spoiled => "spoiled",
        }
    }

    /// Whether the batch still occupies silo capacity
    pub fn occupies_silo(&self) -> bool {
        matches!(self, BatchStatus::Stored)
    }
}

/// Spoilage classification returned by the prediction model
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpoilageClass {
    #[serde(alias = "safe", alias = "SAFE")]
    Safe,
    #[serde(alias = "risky", alias = "RISKY")]
    Risky,
    #[serde(alias = "spoiled", alias = "SPOILED")]
    Spoiled,
}

impl SpoilageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpoilageClass::Safe => "Safe",
            SpoilageClass::Risky => "Risky",
            SpoilageClass::Spoiled => "Spoiled",
        }
    }
}

/// Latest prediction stored on a batch
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RiskAssessment {
    pub prediction: SpoilageClass,
    pub confidence: f64,
    /// 0..=100
    pub risk_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_spoilage_hours: Option<f64>,
    #[serde(default)]
    pub key_risk_factors: Vec<Value>,
    #[serde(with = "timestamp")]
    pub assessed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GrainBatch {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    /// Human-facing batch code, unique per tenant
    pub batch_id: String,

    /// Record id of the silo holding the batch
    pub silo_id: String,

    pub grain_type: String,

    pub quantity_kg: f64,

    /// Moisture percent measured at intake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moisture_content: Option<f64>,

    #[serde(with = "timestamp")]
    pub intake_date: DateTime<Utc>,

    #[serde(default)]
    pub status: BatchStatus,

    /// Farmer or supplier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
}

impl GrainBatch {
    /// Whole days since intake, never negative
    pub fn storage_days(&self, now: DateTime<Utc>) -> f64 {
        let hours = (now - self.intake_date).num_hours().max(0) as f64;
        (hours / 24.0).floor()
    }
}

impl IntoIndexes for GrainBatch {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "tenant_id": 1, "batch_id": 1 }, "batch_code_unique"),
            index(doc! { "tenant_id": 1, "silo_id": 1 }, "batch_silo_index"),
        ]
    }
}

impl_record!(GrainBatch, "grain_batches", tenant);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_spoilage_class_accepts_lowercase() {
        let class: SpoilageClass = serde_json::from_str("\"risky\"").unwrap();
        assert_eq!(class, SpoilageClass::Risky);
        assert_eq!(serde_json::to_string(&class).unwrap(), "\"Risky\"");
    }

    #[test]
    fn test_storage_days() {
        let now = Utc::now();
        let batch = GrainBatch {
            intake_date: now - Duration::hours(20 * 24 + 5),
            ..Default::default()
        };
        assert_eq!(batch.storage_days(now), 20.0);

        let future = GrainBatch {
            intake_date: now + Duration::days(2),
            ..Default::default()
        };
        assert_eq!(future.storage_days(now), 0.0);
    }
}
