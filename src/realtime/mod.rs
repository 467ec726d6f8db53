//! Realtime event hub
//!
//! Handlers publish typed events into a broadcast channel; each WebSocket
//! connection forwards the events its tenant may see.
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "event": "sensor_reading",
//!   "tenant_id": "6f1c...",
//!   "timestamp": "2025-03-01T10:00:00.000Z",
//!   "data": { "sensor_id": "...", "temperature": 28.4 }
//! }
//! ```

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::db::schemas::timestamp;

/// Channel capacity; slow receivers past this skip ahead
pub const CHANNEL_CAPACITY: usize = 256;

/// Seconds between heartbeat events
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SensorReading,
    ActuatorStatus,
    Alert,
    LimitWarning,
    BatchRisk,
    Heartbeat,
    /// Sent once after a client connects
    Welcome,
    Pong,
}

/// Event fanned out to connected clients
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: EventKind,
    /// Owning tenant; platform-wide and connection events carry none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub timestamp: String,
    pub data: Value,
}

impl RealtimeEvent {
    pub fn new(event: EventKind, tenant_id: Option<&str>, data: Value) -> Self {
        Self {
            event,
            tenant_id: tenant_id.map(str::to_string),
            timestamp: now_iso(),
            data,
        }
    }

    /// Whether a client scoped to `tenant` (None = super admin) gets this event
    pub fn visible_to(&self, tenant: Option<&str>) -> bool {
        match (tenant, self.tenant_id.as_deref()) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(client), Some(owner)) => client == owner,
        }
    }
}

/// Hub for broadcasting realtime events to connected clients
pub struct RealtimeHub {
    sender: broadcast::Sender<RealtimeEvent>,
    connected: AtomicUsize,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            connected: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to all connected clients
    pub fn publish(&self, event: RealtimeEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn emit(&self, kind: EventKind, tenant_id: &str, data: Value) {
        self.publish(RealtimeEvent::new(kind, Some(tenant_id), data));
    }

    /// Number of open WebSocket connections
    pub fn connected_clients(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }

    /// Track a connection for as long as the guard lives
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.connected.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            hub: Arc::clone(self),
        }
    }

    /// Start periodic heartbeat task
    pub fn start_heartbeat_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                self.publish(RealtimeEvent::new(
                    EventKind::Heartbeat,
                    None,
                    serde_json::json!({ "interval_secs": HEARTBEAT_INTERVAL_SECS }),
                ));
            }
        });
    }
}

/// Decrements the connection count on drop
pub struct ConnectionGuard {
    hub: Arc<RealtimeHub>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.connected.fetch_sub(1, Ordering::Relaxed);
    }
}

pub fn now_iso() -> String {
    timestamp::format(&Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visibility() {
        let event = RealtimeEvent::new(EventKind::Alert, Some("t1"), json!({}));
        assert!(event.visible_to(Some("t1")));
        assert!(!event.visible_to(Some("t2")));
        assert!(event.visible_to(None));

        let heartbeat = RealtimeEvent::new(EventKind::Heartbeat, None, json!({}));
        assert!(heartbeat.visible_to(Some("t2")));
    }

    #[test]
    fn test_wire_format() {
        let event = RealtimeEvent::new(
            EventKind::ActuatorStatus,
            Some("t1"),
            json!({ "state": "on" }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "actuator_status");
        assert_eq!(value["tenant_id"], "t1");
        assert_eq!(value["data"]["state"], "on");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = RealtimeHub::new();
        let mut rx = hub.subscribe();
        hub.emit(EventKind::SensorReading, "t1", json!({ "temperature": 21.5 }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, EventKind::SensorReading);
        assert_eq!(event.data["temperature"], 21.5);
    }

    #[test]
    fn test_connection_guard_counts() {
        let hub = Arc::new(RealtimeHub::new());
        let first = hub.connection_guard();
        let second = hub.connection_guard();
        assert_eq!(hub.connected_clients(), 2);
        drop(first);
        assert_eq!(hub.connected_clients(), 1);
        drop(second);
        assert_eq!(hub.connected_clients(), 0);
    }
}
