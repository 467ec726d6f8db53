//! Silo endpoints
//!
//! - `GET/POST /silos`, `GET/PUT/DELETE /silos/{id}`
//!
//! `current_level_kg` is derived from stored batches and cannot be written.

use async_trait::async_trait;
use serde::Deserialize;

use crate::auth::AuthContext;
use crate::db::schemas::{GrainBatch, Silo, SiloStatus, SiloThresholds, UsageKind};
use crate::db::{new_id, Filter};
use crate::routes::request::ApiRequest;
use crate::routes::resource::{enum_name, positive, query_enum, required, Resource, Writable};
use crate::server::AppState;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateSilo {
    pub silo_id: String,
    pub name: String,
    pub capacity_kg: f64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<SiloStatus>,
    #[serde(default)]
    pub thresholds: Option<SiloThresholds>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSilo {
    pub silo_id: Option<String>,
    pub name: Option<String>,
    pub capacity_kg: Option<f64>,
    pub location: Option<String>,
    pub status: Option<SiloStatus>,
    pub thresholds: Option<SiloThresholds>,
}

fn check_thresholds(thresholds: &SiloThresholds) -> Result<()> {
    let values = [
        thresholds.max_temperature,
        thresholds.max_humidity,
        thresholds.max_grain_moisture,
    ];
    if values.iter().chain(thresholds.max_co2.iter()).any(|v| !v.is_finite()) {
        return Err(GrainError::BadRequest("Thresholds must be finite numbers".into()));
    }
    Ok(())
}

#[async_trait]
impl Resource for Silo {
    const LABEL: &'static str = "Silo";

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let status: Option<SiloStatus> = query_enum(req, "status")?;
        let mut filter = Filter::new().eq_opt("status", status.map(|s| enum_name(&s)));
        if let Some(q) = req.query_param("q") {
            filter = filter.contains("name", &q);
        }
        Ok(filter)
    }

    async fn before_delete(state: &AppState, _ctx: &AuthContext, silo: &Silo) -> Result<()> {
        let stored = state
            .db
            .collection::<GrainBatch>()
            .count(
                &Filter::tenant(&silo.tenant_id)
                    .eq("silo_id", silo.id.as_str())
                    .eq("status", "stored"),
            )
            .await?;
        if stored > 0 {
            return Err(GrainError::Conflict(format!(
                "Silo still holds {} stored batch(es)",
                stored
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Writable for Silo {
    type Create = CreateSilo;
    type Update = UpdateSilo;

    const USAGE: Option<UsageKind> = Some(UsageKind::Silos);

    async fn build(
        _state: &AppState,
        _ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateSilo,
    ) -> Result<Silo> {
        let thresholds = input.thresholds.unwrap_or_default();
        check_thresholds(&thresholds)?;

        Ok(Silo {
            id: new_id(),
            tenant_id: tenant_id.unwrap_or_default().to_string(),
            silo_id: required("silo_id", &input.silo_id)?,
            name: required("name", &input.name)?,
            capacity_kg: positive("capacity_kg", input.capacity_kg)?,
            current_level_kg: 0.0,
            location: input.location,
            status: input.status.unwrap_or_default(),
            thresholds,
            ..Default::default()
        })
    }

    async fn apply(
        _state: &AppState,
        _ctx: &AuthContext,
        mut silo: Silo,
        update: UpdateSilo,
    ) -> Result<Silo> {
        if let Some(code) = update.silo_id {
            silo.silo_id = required("silo_id", &code)?;
        }
        if let Some(name) = update.name {
            silo.name = required("name", &name)?;
        }
        if let Some(capacity) = update.capacity_kg {
            let capacity = positive("capacity_kg", capacity)?;
            if capacity < silo.current_level_kg {
                return Err(GrainError::BadRequest(format!(
                    "capacity_kg cannot be below the stored {} kg",
                    silo.current_level_kg
                )));
            }
            silo.capacity_kg = capacity;
        }
        if update.location.is_some() {
            silo.location = update.location;
        }
        if let Some(status) = update.status {
            silo.status = status;
        }
        if let Some(thresholds) = update.thresholds {
            check_thresholds(&thresholds)?;
            silo.thresholds = thresholds;
        }
        Ok(silo)
    }
}

/// Live silo of the tenant, for reference checks
pub async fn silo_of_tenant(state: &AppState, tenant_id: &str, silo_id: &str) -> Result<Silo> {
    state
        .db
        .collection::<Silo>()
        .find_one(&Filter::by_id(silo_id).eq("tenant_id", tenant_id))
        .await?
        .ok_or_else(|| GrainError::BadRequest(format!("Unknown silo: {}", silo_id)))
}
