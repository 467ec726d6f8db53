//! Services layer for GrainHero
//!
//! Business logic shared by the HTTP routes, the NATS telemetry bridge and
//! the background jobs.
//!
//! ## Services
//!
//! - **Ingest**: Sensor reading storage and threshold alerts
//! - **Alerting**: Alert creation and realtime fan-out
//! - **Inventory**: Silo fill levels from stored batches
//! - **Prediction**: Spoilage risk model adapters
//! - **Usage**: Plan limit counting and enforcement
//! - **LimitWarning**: Periodic plan usage warnings

pub mod alerting;
pub mod ingest;
pub mod inventory;
pub mod limit_warning;
pub mod prediction;
pub mod usage;

pub use prediction::{PredictionInput, PredictionOutput, SpoilagePredictor};
