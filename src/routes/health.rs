//! Health and status endpoints
//!
//! - /health, /healthz - Liveness probe, always 200 while the process runs
//! - /ready, /readyz   - Readiness probe, 503 until the store answers
//! - /version          - Build information stamped by build.rs
//! - /status           - Runtime view for operators

use hyper::StatusCode;
use serde::Serialize;

use crate::realtime::now_iso;
use crate::routes::request::{json_response, ApiResponse};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: &'static str,
    /// Active storage backend ("mongodb" or "memory")
    pub store: &'static str,
    pub db_healthy: bool,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub git_commit_full: &'static str,
    pub build_timestamp: &'static str,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub store: &'static str,
    pub db_healthy: bool,
    pub dev_mode: bool,
    pub realtime_clients: usize,
    pub predictor: &'static str,
    pub telemetry: TelemetryStatus,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct TelemetryStatus {
    pub enabled: bool,
    pub connected: bool,
    pub subject: String,
}

async fn build_health(state: &AppState) -> HealthResponse {
    let db_healthy = state.db.is_healthy().await;
    HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        store: state.db.kind(),
        db_healthy,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: now_iso(),
    }
}

/// Liveness probe
pub async fn health_check(state: &AppState) -> ApiResponse {
    json_response(StatusCode::OK, &build_health(state).await)
}

/// Readiness probe
pub async fn readiness_check(state: &AppState) -> ApiResponse {
    let health = build_health(state).await;
    let status = if health.db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &health)
}

pub fn version_info() -> ApiResponse {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            git_commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
            build_timestamp: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        },
    )
}

pub async fn status_info(state: &AppState) -> ApiResponse {
    let nats = &state.args.nats;
    json_response(
        StatusCode::OK,
        &StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            store: state.db.kind(),
            db_healthy: state.db.is_healthy().await,
            dev_mode: state.args.dev_mode,
            realtime_clients: state.realtime.connected_clients(),
            predictor: state.predictor.mode(),
            telemetry: TelemetryStatus {
                enabled: nats.telemetry_enabled,
                connected: state.nats.as_ref().is_some_and(|n| n.is_connected()),
                subject: nats.telemetry_subject.clone(),
            },
            uptime_secs: state.started_at.elapsed().as_secs(),
        },
    )
}
