//! Sensor endpoints
//!
//! - `GET/POST /sensors`, `GET/PUT/DELETE /sensors/{id}`
//! - `POST /sensors/{id}/readings` - record a reading (technician+)
//! - `GET /sensors/{id}/readings?limit=&since=&until=` - newest-first history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{AuthContext, Role};
use crate::db::schemas::{
    timestamp, ReadingValues, Sensor, SensorReading, SensorStatus, SensorType, UsageKind,
};
use crate::db::{new_id, Filter, FindOptions};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{
    self, enum_name, query_enum, record_json, required, Resource, Writable, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
use crate::routes::silos::silo_of_tenant;
use crate::server::AppState;
use crate::services::ingest::ingest_reading;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateSensor {
    pub silo_id: String,
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub sensor_type: Option<SensorType>,
    #[serde(default)]
    pub status: Option<SensorStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSensor {
    pub silo_id: Option<String>,
    pub device_id: Option<String>,
    pub name: Option<String>,
    pub sensor_type: Option<SensorType>,
    pub status: Option<SensorStatus>,
}

#[async_trait]
impl Resource for Sensor {
    const LABEL: &'static str = "Sensor";

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let status: Option<SensorStatus> = query_enum(req, "status")?;
        let sensor_type: Option<SensorType> = query_enum(req, "sensor_type")?;
        Ok(Filter::new()
            .eq_opt("status", status.map(|s| s.as_str()))
            .eq_opt("sensor_type", sensor_type.map(|t| enum_name(&t)))
            .eq_opt("silo_id", req.query_param("silo_id")))
    }
}

#[async_trait]
impl Writable for Sensor {
    type Create = CreateSensor;
    type Update = UpdateSensor;

    const USAGE: Option<UsageKind> = Some(UsageKind::Sensors);

    async fn build(
        state: &AppState,
        _ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateSensor,
    ) -> Result<Sensor> {
        let tenant_id = tenant_id.unwrap_or_default();
        silo_of_tenant(state, tenant_id, &input.silo_id).await?;

        Ok(Sensor {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            silo_id: input.silo_id,
            device_id: required("device_id", &input.device_id)?,
            sensor_type: input.sensor_type.unwrap_or_default(),
            name: required("name", &input.name)?,
            status: input.status.unwrap_or_default(),
            last_reading_at: None,
            ..Default::default()
        })
    }

    async fn apply(
        state: &AppState,
        _ctx: &AuthContext,
        mut sensor: Sensor,
        update: UpdateSensor,
    ) -> Result<Sensor> {
        if let Some(silo_id) = update.silo_id {
            silo_of_tenant(state, &sensor.tenant_id, &silo_id).await?;
            sensor.silo_id = silo_id;
        }
        if let Some(device_id) = update.device_id {
            sensor.device_id = required("device_id", &device_id)?;
        }
        if let Some(name) = update.name {
            sensor.name = required("name", &name)?;
        }
        if let Some(sensor_type) = update.sensor_type {
            sensor.sensor_type = sensor_type;
        }
        if let Some(status) = update.status {
            sensor.status = status;
        }
        Ok(sensor)
    }
}

/// Body of `POST /sensors/{id}/readings`
#[derive(Debug, Deserialize)]
pub struct ReadingBody {
    #[serde(default, with = "timestamp::option")]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub values: ReadingValues,
}

/// `/sensors/{id}/readings`
pub async fn handle_readings(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    id: &str,
) -> Result<ApiResponse> {
    match req.method {
        Method::POST => record_reading(state, req, ctx, id).await,
        Method::GET => reading_history(state, req, ctx, id).await,
        _ => Err(GrainError::MethodNotAllowed),
    }
}

async fn record_reading(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    id: &str,
) -> Result<ApiResponse> {
    ctx.require(Role::Technician)?;
    let sensor = resource::load::<Sensor>(state, ctx, id).await?;
    let body: ReadingBody = req.json()?;

    let ingested = ingest_reading(state, &sensor, body.values, body.recorded_at).await?;
    let alerts: Vec<Value> = ingested.alerts.iter().map(Resource::to_json).collect();

    Ok(json_response(
        StatusCode::CREATED,
        &json!({ "reading": record_json(&ingested.reading), "alerts": alerts }),
    ))
}

fn query_time(req: &ApiRequest, key: &str) -> Result<Option<DateTime<Utc>>> {
    req.query_param(key)
        .map(|value| {
            timestamp::parse(&value).map_err(|_| {
                GrainError::BadRequest(format!("{} must be an RFC 3339 timestamp", key))
            })
        })
        .transpose()
}

async fn reading_history(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    id: &str,
) -> Result<ApiResponse> {
    ctx.require(Role::Technician)?;
    let sensor = resource::load::<Sensor>(state, ctx, id).await?;

    let limit = req
        .query_u64("limit")?
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let mut filter = Filter::tenant(&sensor.tenant_id).eq("sensor_id", sensor.id.as_str());
    if let Some(since) = query_time(req, "since")? {
        filter = filter.gte("recorded_at", timestamp::format(&since));
    }
    if let Some(until) = query_time(req, "until")? {
        filter = filter.lte("recorded_at", timestamp::format(&until));
    }

    let readings = state
        .db
        .collection::<SensorReading>()
        .find_many(&filter, &FindOptions::sorted_desc("recorded_at").limit(limit))
        .await?;
    let items: Vec<Value> = readings.iter().map(record_json).collect();

    Ok(json_response(
        StatusCode::OK,
        &json!({ "sensor_id": sensor.id, "items": items, "limit": limit }),
    ))
}
