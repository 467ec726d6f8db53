//! Alert creation shared by sensors, predictions and manual entry

use chrono::Utc;
use tracing::info;

use crate::db::schemas::{Alert, AlertSource, AlertStatus, Severity};
use crate::db::{new_id, Filter};
use crate::realtime::EventKind;
use crate::server::AppState;
use crate::types::Result;

/// Fields of an alert raised by the system
#[derive(Debug, Clone, Default)]
pub struct NewAlert {
    pub silo_id: String,
    pub batch_id: Option<String>,
    pub sensor_id: Option<String>,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub source: AlertSource,
}

/// Store a new active alert and push it to realtime clients
pub async fn raise_alert(state: &AppState, tenant_id: &str, new: NewAlert) -> Result<Alert> {
    let alert = Alert {
        id: new_id(),
        tenant_id: tenant_id.to_string(),
        silo_id: new.silo_id,
        batch_id: new.batch_id,
        sensor_id: new.sensor_id,
        metric: new.metric,
        value: new.value,
        threshold: new.threshold,
        title: new.title,
        message: new.message,
        severity: new.severity,
        status: AlertStatus::Active,
        source: new.source,
        triggered_at: Utc::now(),
        ..Default::default()
    };

    let alert = state.db.collection::<Alert>().insert_one(alert).await?;
    info!(
        tenant_id,
        alert_id = %alert.id,
        severity = alert.severity.as_str(),
        "Alert raised: {}",
        alert.title
    );
    publish_alert(state, &alert);
    Ok(alert)
}

/// Broadcast an alert to the owning tenant's realtime clients
pub fn publish_alert(state: &AppState, alert: &Alert) {
    match serde_json::to_value(alert) {
        Ok(data) => state.realtime.emit(EventKind::Alert, &alert.tenant_id, data),
        Err(e) => tracing::warn!("Failed to encode alert event: {}", e),
    }
}

/// An unresolved alert for the same sensor and metric, if any
pub async fn open_alert_for(
    state: &AppState,
    sensor_id: &str,
    metric: &str,
) -> Result<Option<Alert>> {
    let filter = Filter::new()
        .eq("sensor_id", sensor_id)
        .eq("metric", metric)
        .any_of(
            "status",
            [AlertStatus::Active.as_str(), AlertStatus::Acknowledged.as_str()],
        );
    state.db.collection::<Alert>().find_one(&filter).await
}
