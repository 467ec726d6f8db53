//! Order document schema
//!
//! Sales orders drawn against a stored grain batch.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Dispatched,
    Delivered,
    Cancelled,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    /// Human-facing order number, unique per tenant
    pub order_number: String,

    /// Record id of the batch sold
    pub batch_id: String,

    pub buyer_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_contact: Option<String>,

    pub quantity_kg: f64,

    pub price_per_kg: f64,

    /// quantity_kg * price_per_kg
    #[serde(default)]
    pub total_price: f64,

    #[serde(default)]
    pub status: OrderStatus,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub delivery_date: Option<DateTime<Utc>>,
}

impl IntoIndexes for Order {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "tenant_id": 1, "order_number": 1 }, "order_number_unique"),
            index(doc! { "tenant_id": 1, "batch_id": 1 }, "order_batch_index"),
        ]
    }
}

impl_record!(Order, "orders", tenant);
