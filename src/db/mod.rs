//! Storage layer
//!
//! MongoDB in production, an in-memory document store in dev mode and tests.
//! Both sit behind [`RecordStore`] so handlers never see which one is live.

pub mod filter;
pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use filter::Filter;
pub use memory::MemoryDb;
pub use mongo::MongoClient;
pub use store::{new_id, Collection, FindOptions, Record, RecordStore};

use std::sync::Arc;
use tracing::info;

use crate::types::Result;
use schemas::{
    Actuator, Alert, GrainBatch, Notification, Order, Plan, SensorReading, Sensor, Silo,
    Subscription, Tenant, User,
};

/// Handle to whichever backend is active
#[derive(Clone)]
pub enum Database {
    Mongo(MongoClient),
    Memory(MemoryDb),
}

impl Database {
    /// Typed collection handle
    pub fn collection<T: Record>(&self) -> Collection<T> {
        match self {
            Database::Mongo(client) => Arc::new(client.collection::<T>()),
            Database::Memory(db) => Arc::new(db.collection::<T>()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Database::Mongo(_) => "mongodb",
            Database::Memory(_) => "memory",
        }
    }

    /// Whether the backend answers
    pub async fn is_healthy(&self) -> bool {
        match self {
            Database::Mongo(client) => client.ping().await.is_ok(),
            Database::Memory(_) => true,
        }
    }

    /// Create indexes for every record type. No-op for the in-memory store,
    /// which reads index definitions at write time.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let Database::Mongo(client) = self else {
            return Ok(());
        };

        client.apply_indexes::<Tenant>().await?;
        client.apply_indexes::<User>().await?;
        client.apply_indexes::<Silo>().await?;
        client.apply_indexes::<GrainBatch>().await?;
        client.apply_indexes::<Sensor>().await?;
        client.apply_indexes::<SensorReading>().await?;
        client.apply_indexes::<Actuator>().await?;
        client.apply_indexes::<Alert>().await?;
        client.apply_indexes::<Plan>().await?;
        client.apply_indexes::<Subscription>().await?;
        client.apply_indexes::<Notification>().await?;
        client.apply_indexes::<Order>().await?;

        info!(db = client.db_name(), "MongoDB indexes ensured");
        Ok(())
    }
}
