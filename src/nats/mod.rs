//! NATS messaging
//!
//! Devices publish readings on NATS; the telemetry bridge turns them into
//! stored readings, realtime events and threshold alerts.

pub mod client;
pub mod telemetry;

pub use client::NatsClient;
pub use telemetry::{spawn_telemetry_bridge, DeviceMessage};
