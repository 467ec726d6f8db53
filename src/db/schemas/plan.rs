//! Plan and subscription schemas
//!
//! Plans define per-tenant resource limits; a limit of zero means unlimited.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

/// Resources counted against plan limits
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Users,
    Silos,
    GrainBatches,
    Sensors,
}

impl UsageKind {
    pub const ALL: [UsageKind; 4] = [
        UsageKind::Users,
        UsageKind::Silos,
        UsageKind::GrainBatches,
        UsageKind::Sensors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Users => "users",
            UsageKind::Silos => "silos",
            UsageKind::GrainBatches => "grain_batches",
            UsageKind::Sensors => "sensors",
        }
    }

    /// Human label for notifications
    pub fn label(&self) -> &'static str {
        match self {
            UsageKind::Users => "users",
            UsageKind::Silos => "silos",
            UsageKind::GrainBatches => "grain batches",
            UsageKind::Sensors => "sensors",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PlanLimits {
    #[serde(default)]
    pub users: u32,
    #[serde(default)]
    pub silos: u32,
    #[serde(default)]
    pub grain_batches: u32,
    #[serde(default)]
    pub sensors: u32,
}

impl PlanLimits {
    pub fn get(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::Users => self.users,
            UsageKind::Silos => self.silos,
            UsageKind::GrainBatches => self.grain_batches,
            UsageKind::Sensors => self.sensors,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[default]
    Month,
    Year,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Plan {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Price per interval in the smallest currency unit
    #[serde(default)]
    pub price_cents: u32,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub interval: BillingInterval,

    #[serde(default)]
    pub limits: PlanLimits,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_true() -> bool {
    true
}

impl IntoIndexes for Plan {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![unique_live_index(doc! { "name": 1 }, "plan_name_unique")]
    }
}

impl_record!(Plan, "plans");

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Trialing,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether limits of the plan apply
    pub fn is_current(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    pub plan_id: String,

    #[serde(default)]
    pub status: SubscriptionStatus,

    #[serde(with = "timestamp")]
    pub current_period_start: DateTime<Utc>,

    #[serde(with = "timestamp")]
    pub current_period_end: DateTime<Utc>,

    /// Resources with an outstanding usage warning
    #[serde(default)]
    pub warned: Vec<UsageKind>,
}

impl IntoIndexes for Subscription {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "tenant_id": 1 }, "subscription_tenant_unique"),
            index(doc! { "status": 1 }, "subscription_status_index"),
        ]
    }
}

impl_record!(Subscription, "subscriptions", tenant);
