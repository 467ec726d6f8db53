//! User document schema
//!
//! Stores credentials, role and the token version used to revoke issued JWTs.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::schemas::{timestamp, Metadata};
use crate::db::store::{impl_record, index, unique_live_index, IntoIndexes};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Owning tenant; absent for platform super admins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    pub name: String,

    /// Login identifier, stored lowercase
    pub email: String,

    /// Argon2 password hash
    pub password_hash: String,

    #[serde(default)]
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Token version for invalidation (increment to invalidate all tokens)
    #[serde(default = "default_token_version")]
    pub token_version: u32,

    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn default_token_version() -> u32 {
    1
}

/// Normalize an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl IntoIndexes for User {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_live_index(doc! { "email": 1 }, "user_email_unique"),
            index(doc! { "tenant_id": 1, "role": 1 }, "user_tenant_role_index"),
        ]
    }
}

impl_record!(User, "users", optional_tenant);
