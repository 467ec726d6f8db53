//! Shared fixtures for unit and route tests
//!
//! Everything runs against the in-memory store with a dev JWT secret and a
//! predictor that always returns the same answer.

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use http_body_util::BodyExt;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::auth::{hash_password, JwtValidator, Role, TokenInput};
use crate::config::Args;
use crate::db::schemas::{Sensor, Silo, Tenant, User};
use crate::db::{new_id, Database, MemoryDb};
use crate::routes::{self, ApiRequest};
use crate::server::AppState;
use crate::services::prediction::SpoilageClass;
use crate::services::{PredictionInput, PredictionOutput, SpoilagePredictor};
use crate::types::Result;

pub const TEST_PASSWORD: &str = "harvest-moon-2024";

/// Predictor returning a canned classification
pub struct FixedPredictor {
    pub class: SpoilageClass,
    pub risk_score: f64,
}

#[async_trait]
impl SpoilagePredictor for FixedPredictor {
    async fn predict(&self, _input: &PredictionInput) -> Result<PredictionOutput> {
        Ok(PredictionOutput {
            prediction: self.class,
            confidence: 0.9,
            risk_score: self.risk_score,
            time_to_spoilage_hours: Some(72.0),
            key_risk_factors: vec![Value::from("humidity")],
            extra: Map::new(),
        })
    }

    fn mode(&self) -> &'static str {
        "fixed"
    }
}

/// App state over an empty in-memory store; predictions come back Risky
pub fn memory_state() -> Arc<AppState> {
    memory_state_with(FixedPredictor {
        class: SpoilageClass::Risky,
        risk_score: 64.0,
    })
}

pub fn memory_state_with(predictor: FixedPredictor) -> Arc<AppState> {
    let args = Args::try_parse_from(["grainhero", "--dev-mode", "--ml-mode", "disabled"])
        .expect("test args parse");
    Arc::new(AppState::new(
        args,
        Database::Memory(MemoryDb::new()),
        JwtValidator::new_dev(),
        Arc::new(predictor),
    ))
}

pub async fn seed_tenant(state: &AppState, name: &str) -> Tenant {
    let slug = name.to_lowercase().replace(' ', "-");
    state
        .db
        .collection::<Tenant>()
        .insert_one(Tenant {
            id: new_id(),
            name: name.into(),
            email: format!("billing@{}.test", slug),
            is_active: true,
            ..Default::default()
        })
        .await
        .expect("seed tenant")
}

/// Insert a user with [`TEST_PASSWORD`] and return it with a valid token
pub async fn seed_user(
    state: &AppState,
    tenant_id: Option<&str>,
    role: Role,
    email: &str,
) -> (User, String) {
    let user = state
        .db
        .collection::<User>()
        .insert_one(User {
            id: new_id(),
            tenant_id: tenant_id.map(str::to_string),
            name: email.split('@').next().unwrap_or(email).into(),
            email: email.into(),
            password_hash: hash_password(TEST_PASSWORD).expect("hash"),
            role,
            is_active: true,
            token_version: 1,
            ..Default::default()
        })
        .await
        .expect("seed user");

    let token = token_for(state, &user);
    (user, token)
}

pub fn token_for(state: &AppState, user: &User) -> String {
    let (token, _) = state
        .jwt
        .generate_token(TokenInput {
            user_id: user.id.clone(),
            tenant_id: user.tenant_id.clone(),
            email: user.email.clone(),
            role: user.role,
            token_version: user.token_version,
        })
        .expect("token");
    token
}

pub async fn seed_silo(state: &AppState, tenant_id: &str, code: &str) -> Silo {
    state
        .db
        .collection::<Silo>()
        .insert_one(Silo {
            id: new_id(),
            tenant_id: tenant_id.into(),
            silo_id: code.into(),
            name: format!("Silo {}", code),
            capacity_kg: 10_000.0,
            ..Default::default()
        })
        .await
        .expect("seed silo")
}

pub async fn seed_sensor(state: &AppState, tenant_id: &str, silo_id: &str, device_id: &str) -> Sensor {
    state
        .db
        .collection::<Sensor>()
        .insert_one(Sensor {
            id: new_id(),
            tenant_id: tenant_id.into(),
            silo_id: silo_id.into(),
            device_id: device_id.into(),
            name: format!("Probe {}", device_id),
            ..Default::default()
        })
        .await
        .expect("seed sensor")
}

/// Build a request; `path` may carry a query string
pub fn request(method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> ApiRequest {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).expect("header"),
        );
    }
    let body = body
        .map(|b| Bytes::from(b.to_string()))
        .unwrap_or_default();

    ApiRequest::new(method, path, query, headers, body)
}

/// Dispatch through the router and decode the JSON body (Null when empty)
pub async fn call(state: &Arc<AppState>, req: ApiRequest) -> (StatusCode, Value) {
    let response = routes::dispatch(Arc::clone(state), req).await;
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}
