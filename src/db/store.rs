//! Record and store traits shared by the MongoDB and in-memory backends

use async_trait::async_trait;
use bson::Document;
use mongodb::options::IndexOptions;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::db::filter::Filter;
use crate::db::schemas::Metadata;
use crate::types::Result;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// A document type with its own collection
pub trait Record:
    Serialize + DeserializeOwned + Clone + Unpin + Send + Sync + IntoIndexes + MutMetadata + 'static
{
    /// Collection name
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    /// Owning tenant, if the record is tenant-scoped
    fn tenant_id(&self) -> Option<&str>;

    fn metadata(&self) -> &Metadata;
}

/// Unique index on `keys` that ignores soft-deleted documents
pub fn unique_live_index(keys: Document, name: &str) -> (Document, Option<IndexOptions>) {
    (
        keys,
        Some(
            IndexOptions::builder()
                .unique(true)
                .name(name.to_string())
                .partial_filter_expression(bson::doc! { "metadata.is_deleted": false })
                .build(),
        ),
    )
}

/// Plain secondary index
pub fn index(keys: Document, name: &str) -> (Document, Option<IndexOptions>) {
    (
        keys,
        Some(IndexOptions::builder().name(name.to_string()).build()),
    )
}

/// Sorting and paging for `find_many`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Field to sort on and whether the order is descending
    pub sort: Option<(String, bool)>,
    pub skip: u64,
    /// Zero means no limit
    pub limit: u64,
}

impl FindOptions {
    /// Most recently created first
    pub fn newest_first() -> Self {
        Self::sorted_desc("metadata.created_at")
    }

    pub fn sorted_desc(field: &str) -> Self {
        Self {
            sort: Some((field.to_string(), true)),
            ..Self::default()
        }
    }

    pub fn sorted_asc(field: &str) -> Self {
        Self {
            sort: Some((field.to_string(), false)),
            ..Self::default()
        }
    }

    /// Apply 1-based page numbering. Skip saturates at what MongoDB accepts.
    pub fn page(mut self, page: u64, limit: u64) -> Self {
        self.skip = page
            .saturating_sub(1)
            .saturating_mul(limit)
            .min(i64::MAX as u64);
        self.limit = limit;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }
}

/// Typed access to one collection. Soft-deleted documents are invisible to
/// every read.
#[async_trait]
pub trait RecordStore<T: Record>: Send + Sync {
    /// Insert, stamping fresh metadata. Unique index violations are `Conflict`.
    async fn insert_one(&self, item: T) -> Result<T>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>>;

    async fn find_many(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<T>>;

    async fn count(&self, filter: &Filter) -> Result<u64>;

    /// Replace a live document by id, bumping `updated_at`
    async fn replace_one(&self, item: T) -> Result<T>;

    /// Overwrite top-level fields of a live document in place, bumping
    /// `updated_at`. Fields not named are left as stored. Returns false when
    /// nothing matched.
    async fn set_fields(&self, id: &str, fields: Document) -> Result<bool>;

    /// Mark a live document deleted. Returns false when nothing matched.
    async fn soft_delete(&self, id: &str) -> Result<bool>;
}

/// Shared handle to a collection
pub type Collection<T> = Arc<dyn RecordStore<T>>;

/// Implement `MutMetadata` and `Record` for a schema with `id` and `metadata`
/// fields. Pass `tenant` for tenant-owned records.
macro_rules! impl_record {
    ($ty:ty, $collection:literal) => {
        $crate::db::store::impl_record!(@impl $ty, $collection, |_r| None);
    };
    ($ty:ty, $collection:literal, tenant) => {
        $crate::db::store::impl_record!(@impl $ty, $collection, |r| Some(r.tenant_id.as_str()));
    };
    ($ty:ty, $collection:literal, optional_tenant) => {
        $crate::db::store::impl_record!(@impl $ty, $collection, |r| r.tenant_id.as_deref());
    };
    (@impl $ty:ty, $collection:literal, |$r:ident| $tenant:expr) => {
        impl $crate::db::store::MutMetadata for $ty {
            fn mut_metadata(&mut self) -> &mut $crate::db::schemas::Metadata {
                &mut self.metadata
            }
        }

        impl $crate::db::store::Record for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }

            fn tenant_id(&self) -> Option<&str> {
                #[allow(unused_variables)]
                let $r = self;
                $tenant
            }

            fn metadata(&self) -> &$crate::db::schemas::Metadata {
                &self.metadata
            }
        }
    };
}

pub(crate) use impl_record;

/// Fresh record id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
