//! GrainHero - multi-tenant grain storage management backend
//!
//! Tenants track silos, grain batches, sensors and actuators; readings are
//! checked against silo thresholds and batches are scored for spoilage risk
//! by an external model.
//!
//! ## Services
//!
//! - **REST API**: Tenant-scoped CRUD with role checks and plan limits
//! - **Realtime**: WebSocket feed of readings, actuator changes and alerts
//! - **Telemetry**: NATS bridge ingesting device readings
//! - **Prediction**: Spoilage risk via a model subprocess or HTTP service
//! - **Usage warnings**: Periodic check of plan usage against limits

pub mod auth;
pub mod config;
pub mod db;
pub mod nats;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GrainError, Result};
