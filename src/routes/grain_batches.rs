//! Grain batch endpoints
//!
//! - `GET/POST /grain-batches`, `GET/PUT/DELETE /grain-batches/{id}`
//! - `POST /grain-batches/{id}/predict` - score spoilage risk
//!
//! Batches marked `stored` occupy their silo; every write recomputes the
//! affected silo levels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{AuthContext, Role};
use crate::db::schemas::{
    timestamp, AlertSource, BatchStatus, GrainBatch, RiskAssessment, SensorReading, Severity,
    SpoilageClass, UsageKind,
};
use crate::db::{new_id, Filter, FindOptions};
use crate::realtime::EventKind;
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{
    self, enum_name, non_negative, positive, query_enum, required, Resource, Writable,
};
use crate::routes::silos::silo_of_tenant;
use crate::server::AppState;
use crate::services::alerting::{raise_alert, NewAlert};
use crate::services::inventory::{refresh_silo_level, stored_quantity};
use crate::services::prediction::PredictionInput;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateBatch {
    pub batch_id: String,
    pub silo_id: String,
    pub grain_type: String,
    pub quantity_kg: f64,
    #[serde(default)]
    pub moisture_content: Option<f64>,
    #[serde(default, with = "timestamp::option")]
    pub intake_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<BatchStatus>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBatch {
    pub batch_id: Option<String>,
    pub silo_id: Option<String>,
    pub grain_type: Option<String>,
    pub quantity_kg: Option<f64>,
    pub moisture_content: Option<f64>,
    #[serde(default, with = "timestamp::option")]
    pub intake_date: Option<DateTime<Utc>>,
    pub status: Option<BatchStatus>,
    pub source: Option<String>,
    pub notes: Option<String>,
}

/// Fail when `quantity_kg` more would overflow the silo. `exclude` is the
/// batch being updated, whose current quantity is already counted.
async fn check_capacity(
    state: &AppState,
    tenant_id: &str,
    silo_id: &str,
    quantity_kg: f64,
    exclude: Option<&GrainBatch>,
) -> Result<()> {
    let mut silo = silo_of_tenant(state, tenant_id, silo_id).await?;
    let mut stored = stored_quantity(&state.db, tenant_id, silo_id).await?;
    if let Some(batch) = exclude.filter(|b| b.silo_id == silo_id && b.status.occupies_silo()) {
        stored -= batch.quantity_kg;
    }

    // Count from live batches rather than trusting the cached level
    silo.current_level_kg = stored;
    let free = silo.free_capacity_kg();
    if quantity_kg > free {
        return Err(GrainError::BadRequest(format!(
            "Silo {} has {} kg free, cannot store {} kg",
            silo.silo_id, free, quantity_kg
        )));
    }
    Ok(())
}

#[async_trait]
impl Resource for GrainBatch {
    const LABEL: &'static str = "Grain batch";

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let status: Option<BatchStatus> = query_enum(req, "status")?;
        Ok(Filter::new()
            .eq_opt("status", status.map(|s| s.as_str()))
            .eq_opt("silo_id", req.query_param("silo_id"))
            .eq_opt("grain_type", req.query_param("grain_type")))
    }

    async fn after_delete(state: &AppState, batch: &GrainBatch) -> Result<()> {
        refresh_silo_level(&state.db, &batch.tenant_id, &batch.silo_id).await
    }
}

#[async_trait]
impl Writable for GrainBatch {
    type Create = CreateBatch;
    type Update = UpdateBatch;

    const USAGE: Option<UsageKind> = Some(UsageKind::GrainBatches);

    async fn build(
        state: &AppState,
        _ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateBatch,
    ) -> Result<GrainBatch> {
        let tenant_id = tenant_id.unwrap_or_default();
        let quantity_kg = positive("quantity_kg", input.quantity_kg)?;
        let status = input.status.unwrap_or_default();

        if status.occupies_silo() {
            check_capacity(state, tenant_id, &input.silo_id, quantity_kg, None).await?;
        } else {
            silo_of_tenant(state, tenant_id, &input.silo_id).await?;
        }

        Ok(GrainBatch {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            batch_id: required("batch_id", &input.batch_id)?,
            silo_id: input.silo_id,
            grain_type: required("grain_type", &input.grain_type)?,
            quantity_kg,
            moisture_content: non_negative("moisture_content", input.moisture_content)?,
            intake_date: input.intake_date.unwrap_or_else(Utc::now),
            status,
            source: input.source,
            notes: input.notes,
            risk: None,
            ..Default::default()
        })
    }

    async fn apply(
        state: &AppState,
        _ctx: &AuthContext,
        current: GrainBatch,
        update: UpdateBatch,
    ) -> Result<GrainBatch> {
        let mut batch = current.clone();
        if let Some(code) = update.batch_id {
            batch.batch_id = required("batch_id", &code)?;
        }
        if let Some(silo_id) = update.silo_id {
            batch.silo_id = silo_id;
        }
        if let Some(grain_type) = update.grain_type {
            batch.grain_type = required("grain_type", &grain_type)?;
        }
        if let Some(quantity) = update.quantity_kg {
            batch.quantity_kg = positive("quantity_kg", quantity)?;
        }
        if update.moisture_content.is_some() {
            batch.moisture_content = non_negative("moisture_content", update.moisture_content)?;
        }
        if let Some(intake) = update.intake_date {
            batch.intake_date = intake;
        }
        if let Some(status) = update.status {
            batch.status = status;
        }
        if update.source.is_some() {
            batch.source = update.source;
        }
        if update.notes.is_some() {
            batch.notes = update.notes;
        }

        if batch.status.occupies_silo() {
            check_capacity(
                state,
                &batch.tenant_id,
                &batch.silo_id,
                batch.quantity_kg,
                Some(&current),
            )
            .await?;
        } else if batch.silo_id != current.silo_id {
            silo_of_tenant(state, &batch.tenant_id, &batch.silo_id).await?;
        }
        Ok(batch)
    }

    async fn after_write(
        state: &AppState,
        batch: &GrainBatch,
        previous: Option<&GrainBatch>,
    ) -> Result<()> {
        refresh_silo_level(&state.db, &batch.tenant_id, &batch.silo_id).await?;
        if let Some(previous) = previous.filter(|p| p.silo_id != batch.silo_id) {
            refresh_silo_level(&state.db, &previous.tenant_id, &previous.silo_id).await?;
        }
        Ok(())
    }
}

/// Model input from the silo's most recent reading. Metrics the reading
/// lacks are zero, except grain moisture which falls back to the batch's
/// intake measurement.
pub async fn prediction_input(state: &AppState, batch: &GrainBatch) -> Result<PredictionInput> {
    let latest = state
        .db
        .collection::<SensorReading>()
        .find_many(
            &Filter::tenant(&batch.tenant_id).eq("silo_id", batch.silo_id.as_str()),
            &FindOptions::sorted_desc("recorded_at").limit(1),
        )
        .await?
        .into_iter()
        .next();

    let values = latest.map(|r| r.values).unwrap_or_default();
    Ok(PredictionInput {
        temperature: values.temperature.unwrap_or(0.0),
        humidity: values.humidity.unwrap_or(0.0),
        grain_moisture: values
            .grain_moisture
            .or(batch.moisture_content)
            .unwrap_or(0.0),
        dew_point: values.dew_point.unwrap_or(0.0),
        storage_days: batch.storage_days(Utc::now()),
        airflow: values.airflow.unwrap_or(0.0),
        ambient_light: values.ambient_light.unwrap_or(0.0),
        pest_presence: values.pest_presence.unwrap_or(0.0),
        rainfall: values.rainfall.unwrap_or(0.0),
    })
}

fn risk_severity(class: SpoilageClass) -> Option<Severity> {
    match class {
        SpoilageClass::Safe => None,
        SpoilageClass::Risky => Some(Severity::High),
        SpoilageClass::Spoiled => Some(Severity::Critical),
    }
}

/// POST /grain-batches/{id}/predict
pub async fn handle_predict(state: &AppState, ctx: &AuthContext, id: &str) -> Result<ApiResponse> {
    ctx.require(Role::Manager)?;
    let mut batch = resource::load::<GrainBatch>(state, ctx, id).await?;

    let input = prediction_input(state, &batch).await?;
    let output = state.predictor.predict(&input).await?;

    batch.risk = Some(RiskAssessment {
        prediction: output.prediction,
        confidence: output.confidence,
        risk_score: output.risk_score,
        time_to_spoilage_hours: output.time_to_spoilage_hours,
        key_risk_factors: output.key_risk_factors.clone(),
        assessed_at: Utc::now(),
    });
    let batch = state.db.collection::<GrainBatch>().replace_one(batch).await?;

    info!(
        batch_id = %batch.id,
        prediction = output.prediction.as_str(),
        risk_score = output.risk_score,
        "Spoilage risk assessed"
    );

    let alert = match risk_severity(output.prediction) {
        Some(severity) => Some(
            raise_alert(
                state,
                &batch.tenant_id,
                NewAlert {
                    silo_id: batch.silo_id.clone(),
                    batch_id: Some(batch.id.clone()),
                    metric: Some("spoilage_risk".into()),
                    value: Some(output.risk_score),
                    title: format!(
                        "Batch {} classified {}",
                        batch.batch_id,
                        output.prediction.as_str()
                    ),
                    message: format!(
                        "{} {} kg: risk score {:.0} (confidence {:.0}%)",
                        batch.grain_type,
                        batch.quantity_kg,
                        output.risk_score,
                        output.confidence * 100.0
                    ),
                    severity,
                    source: AlertSource::Prediction,
                    ..Default::default()
                },
            )
            .await?,
        ),
        None => None,
    };

    state.realtime.emit(
        EventKind::BatchRisk,
        &batch.tenant_id,
        json!({
            "batch_id": batch.id,
            "batch_code": batch.batch_id,
            "silo_id": batch.silo_id,
            "prediction": output.prediction,
            "risk_score": output.risk_score,
            "status": enum_name(&batch.status),
        }),
    );

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "batch": batch.to_json(),
            "prediction": output,
            "alert": alert.as_ref().map(|a| a.to_json()),
        }),
    ))
}
