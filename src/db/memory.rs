//! In-memory document store
//!
//! Used in dev mode when MongoDB is unreachable and by the test suite.
//! Documents are kept as BSON so filters and unique indexes behave the
//! same way they do against a real server.

use async_trait::async_trait;
use bson::{Bson, Document};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::filter::{compare_bson, lookup, Filter};
use crate::db::store::{FindOptions, Record, RecordStore};
use crate::types::{GrainError, Result};

/// Shared in-memory database
#[derive(Clone, Default)]
pub struct MemoryDb {
    collections: Arc<RwLock<HashMap<&'static str, Vec<Document>>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection<T: Record>(&self) -> MemoryCollection<T> {
        MemoryCollection {
            db: self.clone(),
            _marker: PhantomData,
        }
    }
}

/// Typed view over one in-memory collection
pub struct MemoryCollection<T> {
    db: MemoryDb,
    _marker: PhantomData<fn() -> T>,
}

fn is_live(document: &Document) -> bool {
    !matches!(lookup(document, "metadata.is_deleted"), Some(Bson::Boolean(true)))
}

fn same_value(a: Option<&Bson>, b: Option<&Bson>) -> bool {
    match (a, b) {
        (None | Some(Bson::Null), None | Some(Bson::Null)) => true,
        (Some(x), Some(y)) => compare_bson(x, y) == Some(Ordering::Equal),
        _ => false,
    }
}

impl<T: Record> MemoryCollection<T> {
    fn encode(item: &T) -> Result<Document> {
        Ok(bson::to_document(item)?)
    }

    fn decode(document: &Document) -> Result<T> {
        Ok(bson::from_document(document.clone())?)
    }

    /// Enforce unique indexes against live documents other than `candidate` itself
    fn check_unique(existing: &[Document], candidate: &Document) -> Result<()> {
        let candidate_id = candidate.get("_id");
        for (keys, options) in T::into_indices() {
            let unique = options.as_ref().and_then(|o| o.unique).unwrap_or(false);
            if !unique {
                continue;
            }
            let fields: Vec<&String> = keys.keys().collect();
            let clash = existing
                .iter()
                .filter(|doc| is_live(doc))
                .filter(|doc| !same_value(doc.get("_id"), candidate_id))
                .any(|doc| {
                    fields
                        .iter()
                        .all(|field| same_value(lookup(doc, field), lookup(candidate, field)))
                });
            if clash {
                return Err(GrainError::Conflict(format!(
                    "Duplicate key in {}",
                    T::COLLECTION
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Record> RecordStore<T> for MemoryCollection<T> {
    async fn insert_one(&self, mut item: T) -> Result<T> {
        let now = Some(Utc::now());
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.deleted_at = None;
        metadata.created_at = now;
        metadata.updated_at = now;

        let document = Self::encode(&item)?;
        let mut collections = self.db.collections.write().await;
        let docs = collections.entry(T::COLLECTION).or_default();

        if docs
            .iter()
            .any(|doc| same_value(doc.get("_id"), document.get("_id")))
        {
            return Err(GrainError::Conflict(format!(
                "Duplicate key in {}",
                T::COLLECTION
            )));
        }
        Self::check_unique(docs, &document)?;

        docs.push(document);
        Ok(item)
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>> {
        let collections = self.db.collections.read().await;
        collections
            .get(T::COLLECTION)
            .and_then(|docs| docs.iter().find(|doc| is_live(doc) && filter.matches(doc)))
            .map(Self::decode)
            .transpose()
    }

    async fn find_many(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<T>> {
        let collections = self.db.collections.read().await;
        let Some(docs) = collections.get(T::COLLECTION) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Document> = docs
            .iter()
            .filter(|doc| is_live(doc) && filter.matches(doc))
            .collect();

        if let Some((field, descending)) = &options.sort {
            // Missing values sort first ascending, like MongoDB
            matched.sort_by(|a, b| {
                let ord = match (lookup(a, field), lookup(b, field)) {
                    (Some(x), Some(y)) => compare_bson(x, y).unwrap_or(Ordering::Equal),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if *descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let limit = if options.limit == 0 {
            usize::MAX
        } else {
            options.limit as usize
        };

        matched
            .into_iter()
            .skip(options.skip as usize)
            .take(limit)
            .map(Self::decode)
            .collect()
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let collections = self.db.collections.read().await;
        Ok(collections
            .get(T::COLLECTION)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| is_live(doc) && filter.matches(doc))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn replace_one(&self, mut item: T) -> Result<T> {
        item.mut_metadata().updated_at = Some(Utc::now());
        let document = Self::encode(&item)?;

        let mut collections = self.db.collections.write().await;
        let docs = collections.entry(T::COLLECTION).or_default();

        let Some(position) = docs.iter().position(|doc| {
            is_live(doc) && same_value(doc.get("_id"), document.get("_id"))
        }) else {
            return Err(GrainError::NotFound(format!("{} not found", T::COLLECTION)));
        };

        if is_live(&document) {
            Self::check_unique(docs, &document)?;
        }
        docs[position] = document;
        Ok(item)
    }

    async fn set_fields(&self, id: &str, fields: Document) -> Result<bool> {
        let mut collections = self.db.collections.write().await;
        let Some(docs) = collections.get_mut(T::COLLECTION) else {
            return Ok(false);
        };

        let target = Bson::String(id.to_string());
        let Some(position) = docs
            .iter()
            .position(|doc| is_live(doc) && same_value(doc.get("_id"), Some(&target)))
        else {
            return Ok(false);
        };

        let mut merged = docs[position].clone();
        merged.extend(fields);
        let mut item = Self::decode(&merged)?;
        item.mut_metadata().updated_at = Some(Utc::now());
        let document = Self::encode(&item)?;

        Self::check_unique(docs, &document)?;
        docs[position] = document;
        Ok(true)
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let mut collections = self.db.collections.write().await;
        let Some(docs) = collections.get_mut(T::COLLECTION) else {
            return Ok(false);
        };

        let target = Bson::String(id.to_string());
        let Some(doc) = docs
            .iter_mut()
            .find(|doc| is_live(doc) && same_value(doc.get("_id"), Some(&target)))
        else {
            return Ok(false);
        };

        let mut item = Self::decode(doc)?;
        let now = Some(Utc::now());
        let metadata = item.mut_metadata();
        metadata.is_deleted = true;
        metadata.deleted_at = now;
        metadata.updated_at = now;
        *doc = Self::encode(&item)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::Metadata;
    use crate::db::store::{unique_live_index, IntoIndexes, MutMetadata};
    use bson::doc;
    use mongodb::options::IndexOptions;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Bin {
        #[serde(rename = "_id")]
        id: String,
        tenant_id: String,
        code: String,
        fill: f64,
        #[serde(default)]
        metadata: Metadata,
    }

    impl IntoIndexes for Bin {
        fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
            vec![unique_live_index(doc! { "tenant_id": 1, "code": 1 }, "bin_code_unique")]
        }
    }

    impl MutMetadata for Bin {
        fn mut_metadata(&mut self) -> &mut Metadata {
            &mut self.metadata
        }
    }

    impl Record for Bin {
        const COLLECTION: &'static str = "bins";

        fn id(&self) -> &str {
            &self.id
        }

        fn tenant_id(&self) -> Option<&str> {
            Some(&self.tenant_id)
        }

        fn metadata(&self) -> &Metadata {
            &self.metadata
        }
    }

    fn bin(id: &str, tenant: &str, code: &str, fill: f64) -> Bin {
        Bin {
            id: id.into(),
            tenant_id: tenant.into(),
            code: code.into(),
            fill,
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn test_unique_is_scoped_to_live_documents() {
        let store = MemoryDb::new().collection::<Bin>();

        store.insert_one(bin("1", "t1", "A", 10.0)).await.unwrap();
        // Same code in another tenant is fine
        store.insert_one(bin("2", "t2", "A", 10.0)).await.unwrap();

        let err = store.insert_one(bin("3", "t1", "A", 10.0)).await.unwrap_err();
        assert!(matches!(err, GrainError::Conflict(_)));

        // Soft delete frees the key
        assert!(store.soft_delete("1").await.unwrap());
        store.insert_one(bin("3", "t1", "A", 10.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_documents_are_invisible() {
        let store = MemoryDb::new().collection::<Bin>();
        store.insert_one(bin("1", "t1", "A", 10.0)).await.unwrap();
        store.soft_delete("1").await.unwrap();

        assert!(store.find_one(&Filter::by_id("1")).await.unwrap().is_none());
        assert_eq!(store.count(&Filter::new()).await.unwrap(), 0);
        assert!(!store.soft_delete("1").await.unwrap());

        let err = store.replace_one(bin("1", "t1", "B", 1.0)).await.unwrap_err();
        assert!(matches!(err, GrainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sort_and_page() {
        let store = MemoryDb::new().collection::<Bin>();
        for (i, fill) in [40.0, 10.0, 30.0, 20.0].iter().enumerate() {
            let id = i.to_string();
            store
                .insert_one(bin(&id, "t1", &format!("B{}", i), *fill))
                .await
                .unwrap();
        }

        let options = FindOptions::sorted_desc("fill").page(2, 2);
        let page = store.find_many(&Filter::tenant("t1"), &options).await.unwrap();
        let fills: Vec<f64> = page.iter().map(|b| b.fill).collect();
        assert_eq!(fills, vec![20.0, 10.0]);
    }

    #[tokio::test]
    async fn test_replace_checks_uniqueness() {
        let store = MemoryDb::new().collection::<Bin>();
        store.insert_one(bin("1", "t1", "A", 1.0)).await.unwrap();
        store.insert_one(bin("2", "t1", "B", 1.0)).await.unwrap();

        let mut second = store.find_one(&Filter::by_id("2")).await.unwrap().unwrap();
        second.code = "A".into();
        assert!(matches!(
            store.replace_one(second).await,
            Err(GrainError::Conflict(_))
        ));

        let mut first = store.find_one(&Filter::by_id("1")).await.unwrap().unwrap();
        first.fill = 55.0;
        let saved = store.replace_one(first).await.unwrap();
        assert_eq!(saved.fill, 55.0);
        assert!(saved.metadata.created_at.is_some());
    }

    #[tokio::test]
    async fn test_set_fields_keeps_other_fields() {
        let store = MemoryDb::new().collection::<Bin>();
        store.insert_one(bin("1", "t1", "A", 1.0)).await.unwrap();

        assert!(store.set_fields("1", doc! { "fill": 75.5 }).await.unwrap());
        let saved = store.find_one(&Filter::by_id("1")).await.unwrap().unwrap();
        assert_eq!(saved.fill, 75.5);
        assert_eq!(saved.code, "A");
        assert!(saved.metadata.updated_at.is_some());

        assert!(!store.set_fields("missing", doc! { "fill": 1.0 }).await.unwrap());
    }

    #[tokio::test]
    async fn test_page_far_past_the_end_is_empty() {
        let store = MemoryDb::new().collection::<Bin>();
        store.insert_one(bin("1", "t1", "A", 1.0)).await.unwrap();

        let options = FindOptions::newest_first().page(u64::MAX, 100);
        assert_eq!(options.skip, i64::MAX as u64);
        assert!(store.find_many(&Filter::new(), &options).await.unwrap().is_empty());
    }
}
