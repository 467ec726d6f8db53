//! Database schemas for GrainHero
//!
//! Defines the document structures stored in MongoDB (or the in-memory
//! store). Every document carries a string id and soft-delete metadata.

mod actuator;
mod alert;
mod grain_batch;
mod metadata;
mod notification;
mod order;
mod plan;
mod sensor;
mod silo;
mod tenant;
mod user;

pub use actuator::{Actuator, ActuatorKind, ActuatorMode, ActuatorState};
pub use alert::{Alert, AlertSource, AlertStatus, Severity};
pub use grain_batch::{BatchStatus, GrainBatch, RiskAssessment, SpoilageClass};
pub use metadata::{timestamp, Metadata};
pub use notification::{Notification, NotificationKind};
pub use order::{Order, OrderStatus};
pub use plan::{
    BillingInterval, Plan, PlanLimits, Subscription, SubscriptionStatus, UsageKind,
};
pub use sensor::{ReadingValues, Sensor, SensorReading, SensorStatus, SensorType};
pub use silo::{Silo, SiloStatus, SiloThresholds};
pub use tenant::Tenant;
pub use user::{normalize_email, User};
