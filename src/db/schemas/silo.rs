//! Silo document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SiloStatus {
    #[default]
    Active,
    Maintenance,
    Inactive,
}

/// Environmental limits; readings above them raise alerts
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SiloThresholds {
    /// Degrees Celsius
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Relative humidity percent
    #[serde(default = "default_max_humidity")]
    pub max_humidity: f64,

    /// Grain moisture percent
    #[serde(default = "default_max_grain_moisture")]
    pub max_grain_moisture: f64,

    /// CO2 ppm, unchecked when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_co2: Option<f64>,
}

fn default_max_temperature() -> f64 {
    30.0
}

fn default_max_humidity() -> f64 {
    70.0
}

fn default_max_grain_moisture() -> f64 {
    14.0
}

impl Default for SiloThresholds {
    fn default() -> Self {
        Self {
            max_temperature: default_max_temperature(),
            max_humidity: default_max_humidity(),
            max_grain_moisture: default_max_grain_moisture(),
            max_co2: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Silo {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    /// Human-facing silo code, unique per tenant
    pub silo_id: String,

    pub name: String,

    pub capacity_kg: f64,

    /// Sum of stored batches, maintained on batch writes
    #[serde(default)]
    pub current_level_kg: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default)]
    pub status: SiloStatus,

    #[serde(default)]
    pub thresholds: SiloThresholds,
}

impl Silo {
    pub fn free_capacity_kg(&self) -> f64 {
        (self.capacity_kg - self.current_level_kg).max(0.0)
    }
}

impl IntoIndexes for Silo {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "tenant_id": 1, "silo_id": 1 }, "silo_code_unique"),
            index(doc! { "tenant_id": 1, "status": 1 }, "silo_status_index"),
        ]
    }
}

impl_record!(Silo, "silos", tenant);
