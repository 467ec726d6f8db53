//! Actuator endpoints
//!
//! - `GET/POST /actuators`, `GET/PUT/DELETE /actuators/{id}`
//! - `POST /actuators/{id}/command` - switch state or mode (technician+)
//!
//! Every state change is broadcast as an `actuator_status` event.

use async_trait::async_trait;
use chrono::Utc;
use hyper::{Method, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::auth::{AuthContext, Role};
use crate::db::schemas::{Actuator, ActuatorKind, ActuatorMode, ActuatorState};
use crate::db::{new_id, Filter};
use crate::realtime::EventKind;
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{self, enum_name, query_enum, required, Resource, Writable};
use crate::routes::silos::silo_of_tenant;
use crate::server::AppState;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateActuator {
    pub silo_id: String,
    pub actuator_id: String,
    pub name: String,
    #[serde(default)]
    pub kind: Option<ActuatorKind>,
    #[serde(default)]
    pub mode: Option<ActuatorMode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateActuator {
    pub silo_id: Option<String>,
    pub actuator_id: Option<String>,
    pub name: Option<String>,
    pub kind: Option<ActuatorKind>,
    pub mode: Option<ActuatorMode>,
}

/// Body of `POST /actuators/{id}/command`
#[derive(Debug, Default, Deserialize)]
pub struct Command {
    pub state: Option<ActuatorState>,
    pub mode: Option<ActuatorMode>,
}

#[async_trait]
impl Resource for Actuator {
    const LABEL: &'static str = "Actuator";

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let kind: Option<ActuatorKind> = query_enum(req, "kind")?;
        let state: Option<ActuatorState> = query_enum(req, "state")?;
        Ok(Filter::new()
            .eq_opt("kind", kind.map(|k| enum_name(&k)))
            .eq_opt("state", state.map(|s| enum_name(&s)))
            .eq_opt("silo_id", req.query_param("silo_id")))
    }
}

#[async_trait]
impl Writable for Actuator {
    type Create = CreateActuator;
    type Update = UpdateActuator;

    async fn build(
        state: &AppState,
        _ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateActuator,
    ) -> Result<Actuator> {
        let tenant_id = tenant_id.unwrap_or_default();
        silo_of_tenant(state, tenant_id, &input.silo_id).await?;

        Ok(Actuator {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            silo_id: input.silo_id,
            actuator_id: required("actuator_id", &input.actuator_id)?,
            name: required("name", &input.name)?,
            kind: input.kind.unwrap_or_default(),
            state: ActuatorState::Off,
            mode: input.mode.unwrap_or_default(),
            ..Default::default()
        })
    }

    async fn apply(
        state: &AppState,
        _ctx: &AuthContext,
        mut actuator: Actuator,
        update: UpdateActuator,
    ) -> Result<Actuator> {
        if let Some(silo_id) = update.silo_id {
            silo_of_tenant(state, &actuator.tenant_id, &silo_id).await?;
            actuator.silo_id = silo_id;
        }
        if let Some(code) = update.actuator_id {
            actuator.actuator_id = required("actuator_id", &code)?;
        }
        if let Some(name) = update.name {
            actuator.name = required("name", &name)?;
        }
        if let Some(kind) = update.kind {
            actuator.kind = kind;
        }
        if let Some(mode) = update.mode {
            actuator.mode = mode;
        }
        Ok(actuator)
    }
}

/// POST /actuators/{id}/command
pub async fn handle_command(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    id: &str,
) -> Result<ApiResponse> {
    if req.method != Method::POST {
        return Err(GrainError::MethodNotAllowed);
    }
    ctx.require(Role::Technician)?;

    let command: Command = req.json()?;
    if command.state.is_none() && command.mode.is_none() {
        return Err(GrainError::BadRequest(
            "Command needs a state or a mode".into(),
        ));
    }

    let mut actuator = resource::load::<Actuator>(state, ctx, id).await?;
    if let Some(target) = command.state {
        actuator.state = target;
    }
    if let Some(mode) = command.mode {
        actuator.mode = mode;
    }
    actuator.last_changed_at = Some(Utc::now());
    actuator.last_changed_by = Some(ctx.user_id.clone());

    let actuator = state.db.collection::<Actuator>().replace_one(actuator).await?;
    info!(
        actuator_id = %actuator.actuator_id,
        state = %enum_name(&actuator.state),
        mode = %enum_name(&actuator.mode),
        user_id = %ctx.user_id,
        "Actuator command applied"
    );

    state
        .realtime
        .emit(EventKind::ActuatorStatus, &actuator.tenant_id, actuator.to_json());

    Ok(json_response(StatusCode::OK, &actuator.to_json()))
}
