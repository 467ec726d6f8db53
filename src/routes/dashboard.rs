//! Dashboard aggregate
//!
//! `GET /dashboard` reads the tenant's records and reshapes them into the
//! summary the overview page shows. Super admins without a tenant scope get
//! platform totals instead.

use hyper::StatusCode;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::auth::AuthContext;
use crate::db::schemas::{
    Alert, AlertStatus, BatchStatus, GrainBatch, SensorReading, Sensor, SensorStatus, Severity,
    Silo, Tenant, User,
};
use crate::db::{Filter, FindOptions};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{record_json, Resource};
use crate::server::AppState;
use crate::types::Result;

/// Alerts listed under "recent"
const RECENT_ALERTS: u64 = 5;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct CapacitySummary {
    pub silos: usize,
    pub total_capacity_kg: f64,
    pub used_capacity_kg: f64,
    /// Percent with one decimal; 0 when there is no capacity
    pub utilization_percent: f64,
}

pub fn capacity_summary(silos: &[Silo]) -> CapacitySummary {
    let total: f64 = silos.iter().map(|s| s.capacity_kg).sum();
    let used: f64 = silos.iter().map(|s| s.current_level_kg).sum();
    let utilization = if total > 0.0 {
        (used * 1000.0 / total).round() / 10.0
    } else {
        0.0
    };
    CapacitySummary {
        silos: silos.len(),
        total_capacity_kg: total,
        used_capacity_kg: used,
        utilization_percent: utilization,
    }
}

/// Batch counts per status and the quantity still in storage
pub fn batch_summary(batches: &[GrainBatch]) -> Value {
    let mut by_status: BTreeMap<&str, usize> = [
        BatchStatus::Stored,
        BatchStatus::Dispatched,
        BatchStatus::Sold,
        BatchStatus::Spoiled,
    ]
    .iter()
    .map(|s| (s.as_str(), 0))
    .collect();
    for batch in batches {
        *by_status.entry(batch.status.as_str()).or_default() += 1;
    }

    let stored_kg: f64 = batches
        .iter()
        .filter(|b| b.status.occupies_silo())
        .map(|b| b.quantity_kg)
        .sum();
    let at_risk = batches
        .iter()
        .filter(|b| b.status.occupies_silo())
        .filter(|b| {
            b.risk
                .as_ref()
                .is_some_and(|r| r.prediction != crate::db::schemas::SpoilageClass::Safe)
        })
        .count();

    json!({
        "total": batches.len(),
        "by_status": by_status,
        "stored_quantity_kg": stored_kg,
        "at_risk": at_risk,
    })
}

/// Active alert counts per severity
pub fn alert_summary(active: &[Alert]) -> Value {
    let mut by_severity = Map::new();
    for severity in Severity::ALL {
        let count = active.iter().filter(|a| a.severity == severity).count();
        by_severity.insert(severity.as_str().to_string(), json!(count));
    }
    json!({ "active": active.len(), "by_severity": by_severity })
}

pub async fn handle_dashboard(state: &AppState, req: &ApiRequest, ctx: &AuthContext) -> Result<ApiResponse> {
    match ctx.tenant_scope(req.query_param("tenant_id").as_deref()) {
        Some(tenant_id) => tenant_dashboard(state, &tenant_id).await,
        None => platform_dashboard(state, ctx).await,
    }
}

async fn tenant_dashboard(state: &AppState, tenant_id: &str) -> Result<ApiResponse> {
    let scope = Filter::tenant(tenant_id);
    let all = FindOptions::default();

    let silos = state.db.collection::<Silo>().find_many(&scope, &all).await?;
    let batches = state
        .db
        .collection::<GrainBatch>()
        .find_many(&scope, &all)
        .await?;
    let active_alerts = state
        .db
        .collection::<Alert>()
        .find_many(
            &scope
                .clone()
                .eq("status", AlertStatus::Active.as_str()),
            &all,
        )
        .await?;
    let recent_alerts = state
        .db
        .collection::<Alert>()
        .find_many(
            &scope,
            &FindOptions::sorted_desc("triggered_at").limit(RECENT_ALERTS),
        )
        .await?;

    let sensors = state.db.collection::<Sensor>();
    let sensor_total = sensors.count(&scope).await?;
    let sensors_online = sensors
        .count(&scope.clone().eq("status", SensorStatus::Online.as_str()))
        .await?;

    let readings = state.db.collection::<SensorReading>();
    let mut latest_readings = Vec::with_capacity(silos.len());
    for silo in &silos {
        let latest = readings
            .find_many(
                &scope.clone().eq("silo_id", silo.id.as_str()),
                &FindOptions::sorted_desc("recorded_at").limit(1),
            )
            .await?;
        latest_readings.push(json!({
            "silo_id": silo.id,
            "silo_code": silo.silo_id,
            "silo_name": silo.name,
            "reading": latest.first().map(record_json),
        }));
    }

    let body = json!({
        "tenant_id": tenant_id,
        "capacity": capacity_summary(&silos),
        "batches": batch_summary(&batches),
        "alerts": alert_summary(&active_alerts),
        "sensors": {
            "total": sensor_total,
            "online": sensors_online,
            "offline": sensor_total.saturating_sub(sensors_online),
        },
        "latest_readings": latest_readings,
        "recent_alerts": recent_alerts.iter().map(Resource::to_json).collect::<Vec<_>>(),
    });
    Ok(json_response(StatusCode::OK, &body))
}

async fn platform_dashboard(state: &AppState, ctx: &AuthContext) -> Result<ApiResponse> {
    // Only super admins reach this without a tenant
    ctx.require(crate::auth::Role::SuperAdmin)?;

    let everything = Filter::new();
    let tenants = state.db.collection::<Tenant>().count(&everything).await?;
    let active_tenants = state
        .db
        .collection::<Tenant>()
        .count(&Filter::new().eq("is_active", true))
        .await?;
    let users = state.db.collection::<User>().count(&everything).await?;
    let silos = state.db.collection::<Silo>().count(&everything).await?;
    let sensors = state.db.collection::<Sensor>().count(&everything).await?;
    let active_alerts = state
        .db
        .collection::<Alert>()
        .count(&Filter::new().eq("status", AlertStatus::Active.as_str()))
        .await?;

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "platform": {
                "tenants": tenants,
                "active_tenants": active_tenants,
                "users": users,
                "silos": silos,
                "sensors": sensors,
                "active_alerts": active_alerts,
            }
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_summary() {
        let silos = vec![
            Silo {
                capacity_kg: 1000.0,
                current_level_kg: 250.0,
                ..Default::default()
            },
            Silo {
                capacity_kg: 2000.0,
                current_level_kg: 500.0,
                ..Default::default()
            },
        ];
        let summary = capacity_summary(&silos);
        assert_eq!(summary.silos, 2);
        assert_eq!(summary.total_capacity_kg, 3000.0);
        assert_eq!(summary.utilization_percent, 25.0);
        assert_eq!(capacity_summary(&[]).utilization_percent, 0.0);
    }

    #[test]
    fn test_batch_and_alert_summaries() {
        let batches = vec![
            GrainBatch {
                quantity_kg: 400.0,
                status: BatchStatus::Stored,
                ..Default::default()
            },
            GrainBatch {
                quantity_kg: 900.0,
                status: BatchStatus::Sold,
                ..Default::default()
            },
        ];
        let summary = batch_summary(&batches);
        assert_eq!(summary["total"], 2);
        assert_eq!(summary["by_status"]["stored"], 1);
        assert_eq!(summary["by_status"]["spoiled"], 0);
        assert_eq!(summary["stored_quantity_kg"], 400.0);

        let alerts = vec![
            Alert {
                severity: Severity::Critical,
                ..Default::default()
            },
            Alert {
                severity: Severity::Critical,
                ..Default::default()
            },
        ];
        let summary = alert_summary(&alerts);
        assert_eq!(summary["active"], 2);
        assert_eq!(summary["by_severity"]["critical"], 2);
        assert_eq!(summary["by_severity"]["low"], 0);
    }
}
