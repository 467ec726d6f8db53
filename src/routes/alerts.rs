//! Alert endpoints
//!
//! - `GET/POST /alerts`, `GET/PUT/DELETE /alerts/{id}`
//! - `POST /alerts/{id}/acknowledge`
//! - `POST /alerts/{id}/resolve`
//!
//! Lifecycle is `active -> acknowledged -> resolved`. Resolved alerts are
//! final.

use async_trait::async_trait;
use chrono::Utc;
use hyper::{Method, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::auth::{AuthContext, Role};
use crate::db::schemas::{Alert, AlertSource, AlertStatus, GrainBatch, Severity};
use crate::db::{new_id, Filter};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{self, query_enum, required, Resource, Writable};
use crate::routes::silos::silo_of_tenant;
use crate::server::AppState;
use crate::services::alerting::publish_alert;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateAlert {
    pub silo_id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAlert {
    pub title: Option<String>,
    pub message: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
}

/// Move an alert to `target`, stamping who did it
pub fn transition(alert: &mut Alert, target: AlertStatus, user_id: &str) -> Result<()> {
    let now = Utc::now();
    match (alert.status, target) {
        (AlertStatus::Resolved, _) => Err(GrainError::Conflict("Alert is already resolved".into())),
        (AlertStatus::Acknowledged, AlertStatus::Acknowledged) => Err(GrainError::Conflict(
            "Alert is already acknowledged".into(),
        )),
        (AlertStatus::Acknowledged, AlertStatus::Active) => Err(GrainError::Conflict(
            "Acknowledged alerts cannot be reopened".into(),
        )),
        (_, AlertStatus::Acknowledged) => {
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_by = Some(user_id.to_string());
            alert.acknowledged_at = Some(now);
            Ok(())
        }
        (_, AlertStatus::Resolved) => {
            if alert.acknowledged_at.is_none() {
                alert.acknowledged_by = Some(user_id.to_string());
                alert.acknowledged_at = Some(now);
            }
            alert.status = AlertStatus::Resolved;
            alert.resolved_by = Some(user_id.to_string());
            alert.resolved_at = Some(now);
            Ok(())
        }
        (_, AlertStatus::Active) => Ok(()),
    }
}

#[async_trait]
impl Resource for Alert {
    const LABEL: &'static str = "Alert";

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let status: Option<AlertStatus> = query_enum(req, "status")?;
        let severity: Option<Severity> = query_enum(req, "severity")?;
        Ok(Filter::new()
            .eq_opt("status", status.map(|s| s.as_str()))
            .eq_opt("severity", severity.map(|s| s.as_str()))
            .eq_opt("silo_id", req.query_param("silo_id")))
    }
}

#[async_trait]
impl Writable for Alert {
    type Create = CreateAlert;
    type Update = UpdateAlert;

    async fn build(
        state: &AppState,
        _ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateAlert,
    ) -> Result<Alert> {
        let tenant_id = tenant_id.unwrap_or_default();
        silo_of_tenant(state, tenant_id, &input.silo_id).await?;

        if let Some(batch_id) = input.batch_id.as_deref() {
            let batch = state
                .db
                .collection::<GrainBatch>()
                .find_one(&Filter::by_id(batch_id).eq("tenant_id", tenant_id))
                .await?;
            if batch.is_none() {
                return Err(GrainError::BadRequest(format!("Unknown batch: {}", batch_id)));
            }
        }

        Ok(Alert {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            silo_id: input.silo_id,
            batch_id: input.batch_id,
            title: required("title", &input.title)?,
            message: input.message,
            severity: input.severity.unwrap_or_default(),
            status: AlertStatus::Active,
            source: AlertSource::Manual,
            triggered_at: Utc::now(),
            ..Default::default()
        })
    }

    async fn apply(
        _state: &AppState,
        ctx: &AuthContext,
        mut alert: Alert,
        update: UpdateAlert,
    ) -> Result<Alert> {
        if let Some(title) = update.title {
            alert.title = required("title", &title)?;
        }
        if let Some(message) = update.message {
            alert.message = message;
        }
        if let Some(severity) = update.severity {
            alert.severity = severity;
        }
        if let Some(status) = update.status.filter(|s| *s != alert.status) {
            transition(&mut alert, status, &ctx.user_id)?;
        }
        Ok(alert)
    }

    async fn after_write(state: &AppState, alert: &Alert, previous: Option<&Alert>) -> Result<()> {
        if previous.is_none() {
            publish_alert(state, alert);
        }
        Ok(())
    }
}

/// POST /alerts/{id}/acknowledge and /alerts/{id}/resolve
pub async fn handle_transition(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    id: &str,
    target: AlertStatus,
) -> Result<ApiResponse> {
    if req.method != Method::POST {
        return Err(GrainError::MethodNotAllowed);
    }
    ctx.require(Role::Technician)?;

    let mut alert = resource::load::<Alert>(state, ctx, id).await?;
    transition(&mut alert, target, &ctx.user_id)?;
    let alert = state.db.collection::<Alert>().replace_one(alert).await?;

    info!(alert_id = %alert.id, status = alert.status.as_str(), user_id = %ctx.user_id, "Alert updated");
    Ok(json_response(StatusCode::OK, &alert.to_json()))
}
