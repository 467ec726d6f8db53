//! HTTP routes for GrainHero
//!
//! Public: `/health`, `/ready`, `/version`, `/status`, `/auth/*`.
//! Everything else requires a bearer token and is scoped to the caller's
//! tenant. `/ws` is upgraded in the server before a body is read and never
//! reaches [`dispatch`].

pub mod actuators;
pub mod alerts;
pub mod auth_routes;
pub mod dashboard;
pub mod grain_batches;
pub mod health;
pub mod notifications;
pub mod orders;
pub mod plans;
pub mod predict;
pub mod realtime_ws;
pub mod request;
pub mod resource;
pub mod sensors;
pub mod silos;
pub mod tenants;
pub mod users;

pub use health::{health_check, readiness_check, status_info, version_info};
pub use request::{error_response, json_response, preflight_response, ApiRequest, ApiResponse};

use hyper::Method;
use std::sync::Arc;

use crate::auth::authenticate;
use crate::db::schemas::{
    Actuator, Alert, AlertStatus, GrainBatch, Order, Sensor, Silo, Tenant, User,
};
use crate::routes::resource::not_found;
use crate::server::AppState;
use crate::types::{GrainError, Result};

/// First path segments that need authentication
const PROTECTED_PREFIXES: &[&str] = &[
    "users",
    "tenants",
    "silos",
    "grain-batches",
    "sensors",
    "actuators",
    "alerts",
    "orders",
    "notifications",
    "api",
    "dashboard",
    "ai",
];

/// Route a buffered request; errors become JSON error responses
pub async fn dispatch(state: Arc<AppState>, req: ApiRequest) -> ApiResponse {
    match route(&state, &req).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

async fn route(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    if req.method == Method::OPTIONS {
        return Ok(preflight_response());
    }

    let segments = req.segments();
    match segments.as_slice() {
        ["health" | "healthz"] => return Ok(health_check(state).await),
        ["ready" | "readyz"] => return Ok(readiness_check(state).await),
        ["version"] => return Ok(version_info()),
        ["status"] => return Ok(status_info(state).await),
        ["auth", rest @ ..] => return auth_routes::handle(state, req, rest).await,
        [first, ..] if PROTECTED_PREFIXES.contains(first) => {}
        _ => return Err(not_found(req)),
    }

    let ctx = authenticate(state, req.auth_header()).await?;

    match (req.method.clone(), segments.as_slice()) {
        (_, ["users", rest @ ..]) => resource::handle::<User>(state, req, &ctx, rest).await,
        (_, ["tenants", rest @ ..]) => resource::handle::<Tenant>(state, req, &ctx, rest).await,
        (_, ["silos", rest @ ..]) => resource::handle::<Silo>(state, req, &ctx, rest).await,

        (Method::POST, ["grain-batches", id, "predict"]) => {
            grain_batches::handle_predict(state, &ctx, id).await
        }
        (_, ["grain-batches", _, "predict"]) => Err(GrainError::MethodNotAllowed),
        (_, ["grain-batches", rest @ ..]) => {
            resource::handle::<GrainBatch>(state, req, &ctx, rest).await
        }

        (_, ["sensors", id, "readings"]) => sensors::handle_readings(state, req, &ctx, id).await,
        (_, ["sensors", rest @ ..]) => resource::handle::<Sensor>(state, req, &ctx, rest).await,

        (_, ["actuators", id, "command"]) => {
            actuators::handle_command(state, req, &ctx, id).await
        }
        (_, ["actuators", rest @ ..]) => {
            resource::handle::<Actuator>(state, req, &ctx, rest).await
        }

        (_, ["alerts", id, "acknowledge"]) => {
            alerts::handle_transition(state, req, &ctx, id, AlertStatus::Acknowledged).await
        }
        (_, ["alerts", id, "resolve"]) => {
            alerts::handle_transition(state, req, &ctx, id, AlertStatus::Resolved).await
        }
        (_, ["alerts", rest @ ..]) => resource::handle::<Alert>(state, req, &ctx, rest).await,

        (_, ["orders", rest @ ..]) => resource::handle::<Order>(state, req, &ctx, rest).await,
        (_, ["notifications", rest @ ..]) => notifications::handle(state, req, &ctx, rest).await,
        (_, ["api", "plan-management", rest @ ..]) => plans::handle(state, req, &ctx, rest).await,

        (Method::GET, ["dashboard"]) => dashboard::handle_dashboard(state, req, &ctx).await,
        (_, ["dashboard"]) => Err(GrainError::MethodNotAllowed),

        (_, ["ai", "predict"]) => predict::handle_predict(state, req, &ctx).await,

        _ => Err(not_found(req)),
    }
}

#[cfg(test)]
mod tests;
