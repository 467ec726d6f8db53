//! Notification document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::schemas::Metadata;
use crate::db::store::{impl_record, index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LimitWarning,
    Alert,
    BatchRisk,
    #[default]
    System,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tenant_id: String,

    #[serde(default)]
    pub kind: NotificationKind,

    pub title: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub read: bool,

    /// Structured context for the client
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl IntoIndexes for Notification {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(doc! { "tenant_id": 1, "read": 1 }, "notification_tenant_read_index")]
    }
}

impl_record!(Notification, "notifications", tenant);
