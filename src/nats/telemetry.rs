//! Device telemetry bridge
//!
//! Devices publish one JSON message per reading:
//!
//! ```json
//! { "tenant_id": "...", "device_id": "probe-17",
//!   "recorded_at": "2025-03-01T10:00:00.000Z",
//!   "temperature": 24.1, "humidity": 61.0 }
//! ```
//!
//! Known devices go through the same ingest path as readings posted over
//! HTTP. Unknown devices and malformed payloads are logged and dropped.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::schemas::{timestamp, ReadingValues, Sensor};
use crate::db::Filter;
use crate::nats::NatsClient;
use crate::server::AppState;
use crate::services::ingest::ingest_reading;
use crate::types::{GrainError, Result};

/// Telemetry message published by a device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceMessage {
    pub tenant_id: String,
    pub device_id: String,
    #[serde(default, with = "timestamp::option")]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub values: ReadingValues,
}

impl DeviceMessage {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let message: DeviceMessage = serde_json::from_slice(payload)
            .map_err(|e| GrainError::BadRequest(format!("Malformed telemetry: {}", e)))?;
        if message.tenant_id.is_empty() || message.device_id.is_empty() {
            return Err(GrainError::BadRequest(
                "Telemetry requires tenant_id and device_id".into(),
            ));
        }
        Ok(message)
    }
}

/// Outcome of handling one message
#[derive(Debug, PartialEq, Eq)]
pub enum Handled {
    Stored,
    UnknownDevice,
}

/// Resolve the device and ingest the reading
pub async fn handle_message(state: &AppState, message: DeviceMessage) -> Result<Handled> {
    let sensor = state
        .db
        .collection::<Sensor>()
        .find_one(
            &Filter::tenant(&message.tenant_id).eq("device_id", message.device_id.as_str()),
        )
        .await?;

    let Some(sensor) = sensor else {
        return Ok(Handled::UnknownDevice);
    };

    ingest_reading(state, &sensor, message.values, message.recorded_at).await?;
    Ok(Handled::Stored)
}

/// Subscribe to the telemetry subject and process messages until the
/// subscription ends
pub async fn spawn_telemetry_bridge(
    state: Arc<AppState>,
    nats: &NatsClient,
) -> Result<JoinHandle<()>> {
    let subject = state.args.nats.telemetry_subject.clone();
    let mut subscriber = nats.subscribe(&subject).await?;
    info!("Telemetry bridge subscribed to {}", subject);

    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            let message = match DeviceMessage::parse(&msg.payload) {
                Ok(m) => m,
                Err(e) => {
                    warn!(subject = %msg.subject, "Dropping telemetry: {}", e);
                    continue;
                }
            };

            let device_id = message.device_id.clone();
            let tenant_id = message.tenant_id.clone();
            match handle_message(&state, message).await {
                Ok(Handled::Stored) => debug!(%device_id, "Telemetry stored"),
                Ok(Handled::UnknownDevice) => {
                    warn!(%tenant_id, %device_id, "Telemetry from unknown device dropped")
                }
                Err(e) => warn!(%tenant_id, %device_id, "Telemetry ingest failed: {}", e),
            }
        }
        warn!("Telemetry subscription closed");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{AlertStatus, Alert, SensorReading};
    use crate::test_support::{memory_state, seed_sensor, seed_silo, seed_tenant};

    #[test]
    fn test_parse_message() {
        let message = DeviceMessage::parse(
            br#"{"tenant_id":"t1","device_id":"probe-1","recorded_at":"2025-03-01T10:00:00.000Z","temperature":24.5}"#,
        )
        .unwrap();
        assert_eq!(message.device_id, "probe-1");
        assert_eq!(message.values.temperature, Some(24.5));
        assert!(message.recorded_at.is_some());

        assert!(DeviceMessage::parse(b"not json").is_err());
        assert!(DeviceMessage::parse(br#"{"tenant_id":"","device_id":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_known_device_is_ingested_and_alerts_dedupe() {
        let state = memory_state();
        let tenant = seed_tenant(&state, "Delta Grain").await;
        let silo = seed_silo(&state, &tenant.id, "SILO-1").await;
        let sensor = seed_sensor(&state, &tenant.id, &silo.id, "probe-9").await;

        let hot = || DeviceMessage {
            tenant_id: tenant.id.clone(),
            device_id: "probe-9".into(),
            recorded_at: None,
            values: ReadingValues {
                temperature: Some(36.0),
                ..Default::default()
            },
        };

        assert_eq!(handle_message(&state, hot()).await.unwrap(), Handled::Stored);
        assert_eq!(handle_message(&state, hot()).await.unwrap(), Handled::Stored);

        let readings = state
            .db
            .collection::<SensorReading>()
            .count(&Filter::new().eq("sensor_id", sensor.id.as_str()))
            .await
            .unwrap();
        assert_eq!(readings, 2);

        // Second breach of the same metric does not open another alert
        let open = state
            .db
            .collection::<Alert>()
            .count(
                &Filter::new()
                    .eq("sensor_id", sensor.id.as_str())
                    .eq("status", AlertStatus::Active.as_str()),
            )
            .await
            .unwrap();
        assert_eq!(open, 1);

        let refreshed = state
            .db
            .collection::<Sensor>()
            .find_one(&Filter::by_id(&sensor.id))
            .await
            .unwrap()
            .unwrap();
        assert!(refreshed.last_reading_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_device_is_dropped() {
        let state = memory_state();
        let tenant = seed_tenant(&state, "Delta Grain").await;
        let message = DeviceMessage {
            tenant_id: tenant.id,
            device_id: "ghost".into(),
            recorded_at: None,
            values: ReadingValues {
                humidity: Some(50.0),
                ..Default::default()
            },
        };
        assert_eq!(
            handle_message(&state, message).await.unwrap(),
            Handled::UnknownDevice
        );
    }
}
