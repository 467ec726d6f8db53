//! Tenant document schema
//!
//! A tenant is one customer organization. Every other tenant-owned record
//! carries its id.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::schemas::Metadata;
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Tenant {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,

    /// Billing / contact email
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl IntoIndexes for Tenant {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "email": 1 }, "tenant_email_unique"),
            index(doc! { "name": 1 }, "tenant_name_index"),
        ]
    }
}

impl_record!(Tenant, "tenants");
