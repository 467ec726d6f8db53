//! Actuator document schema
//!
//! Fans, aerators and other devices that can be switched remotely.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    #[default]
    Fan,
    Aerator,
    Heater,
    Dehumidifier,
    Valve,
    Alarm,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorState {
    On,
    #[default]
    Off,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorMode {
    Auto,
    #[default]
    Manual,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Actuator {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    pub silo_id: String,

    /// Hardware identifier, unique per tenant
    pub actuator_id: String,

    pub name: String,

    #[serde(default)]
    pub kind: ActuatorKind,

    #[serde(default)]
    pub state: ActuatorState,

    #[serde(default)]
    pub mode: ActuatorMode,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_changed_at: Option<DateTime<Utc>>,

    /// User id of the last operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_by: Option<String>,
}

impl IntoIndexes for Actuator {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "tenant_id": 1, "actuator_id": 1 }, "actuator_code_unique"),
            index(doc! { "tenant_id": 1, "silo_id": 1 }, "actuator_silo_index"),
        ]
    }
}

impl_record!(Actuator, "actuators", tenant);
