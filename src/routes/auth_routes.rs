//! HTTP routes for authentication
//!
//! - POST /auth/register - Create a tenant and its first admin
//! - POST /auth/login    - Authenticate and get a JWT
//! - POST /auth/logout   - Revoke every token issued to the caller
//! - POST /auth/refresh  - Fresh token for a still-valid one
//! - GET  /auth/me       - Current user

use chrono::Utc;
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::{
    authenticate, check_password_policy, hash_password, verify_password, Role, TokenInput,
};
use crate::db::schemas::{normalize_email, Plan, Subscription, SubscriptionStatus, Tenant, User};
use crate::db::{new_id, Filter, FindOptions};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{not_found, record_json, required};
use crate::routes::users::{check_email, ensure_email_free, user_json};
use crate::server::AppState;
use crate::types::{GrainError, Result};

/// Length of the first subscription period for self-registered tenants
const TRIAL_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub tenant_name: String,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Value>,
    /// Unix timestamp
    pub expires_at: u64,
}

pub async fn handle(state: &AppState, req: &ApiRequest, rest: &[&str]) -> Result<ApiResponse> {
    match (req.method.clone(), rest) {
        (Method::POST, ["register"]) => handle_register(state, req).await,
        (Method::POST, ["login"]) => handle_login(state, req).await,
        (Method::POST, ["logout"]) => handle_logout(state, req).await,
        (Method::POST, ["refresh"]) => handle_refresh(state, req).await,
        (Method::GET, ["me"]) => handle_me(state, req).await,
        (_, ["register" | "login" | "logout" | "refresh" | "me"]) => {
            Err(GrainError::MethodNotAllowed)
        }
        _ => Err(not_found(req)),
    }
}

fn issue_token(
    state: &AppState,
    user: &User,
    tenant: Option<&Tenant>,
    status: StatusCode,
) -> Result<ApiResponse> {
    let (token, claims) = state.jwt.generate_token(TokenInput {
        user_id: user.id.clone(),
        tenant_id: user.tenant_id.clone(),
        email: user.email.clone(),
        role: user.role,
        token_version: user.token_version,
    })?;

    Ok(json_response(
        status,
        &AuthResponse {
            token,
            user: user_json(user),
            tenant: tenant.map(record_json),
            expires_at: claims.exp,
        },
    ))
}

async fn handle_register(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let body: RegisterRequest = req.json()?;

    let tenant_name = required("tenant_name", &body.tenant_name)?;
    let name = required("name", &body.name)?;
    let email = check_email(&required("email", &body.email)?)?;
    check_password_policy(&body.password)?;
    ensure_email_free(state, &email, None).await?;

    let tenant = state
        .db
        .collection::<Tenant>()
        .insert_one(Tenant {
            id: new_id(),
            name: tenant_name,
            email: email.clone(),
            phone: body.phone.clone(),
            is_active: true,
            ..Default::default()
        })
        .await?;

    let user = User {
        id: new_id(),
        tenant_id: Some(tenant.id.clone()),
        name,
        email,
        password_hash: hash_password(&body.password)?,
        role: Role::Admin,
        phone: body.phone,
        is_active: true,
        token_version: 1,
        ..Default::default()
    };
    let user = match state.db.collection::<User>().insert_one(user).await {
        Ok(user) => user,
        Err(e) => {
            // Lost a race on the email; don't leave an empty tenant behind
            if let Err(cleanup) = state.db.collection::<Tenant>().soft_delete(&tenant.id).await {
                warn!(tenant_id = %tenant.id, "Failed to remove orphaned tenant: {}", cleanup);
            }
            return Err(e);
        }
    };

    subscribe_to_starter_plan(state, &tenant.id).await?;

    info!(tenant_id = %tenant.id, user_id = %user.id, "Tenant registered");
    issue_token(state, &user, Some(&tenant), StatusCode::CREATED)
}

/// Put a new tenant on the cheapest active plan, if any plan exists
async fn subscribe_to_starter_plan(state: &AppState, tenant_id: &str) -> Result<()> {
    let cheapest = state
        .db
        .collection::<Plan>()
        .find_many(
            &Filter::new().eq("is_active", true),
            &FindOptions::sorted_asc("price_cents").limit(1),
        )
        .await?;
    let Some(plan) = cheapest.into_iter().next() else {
        return Ok(());
    };

    let now = Utc::now();
    state
        .db
        .collection::<Subscription>()
        .insert_one(Subscription {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            plan_id: plan.id.clone(),
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now + chrono::Duration::days(TRIAL_PERIOD_DAYS),
            warned: Vec::new(),
            ..Default::default()
        })
        .await?;
    info!(tenant_id, plan = %plan.name, "Subscribed to starter plan");
    Ok(())
}

async fn handle_login(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let body: LoginRequest = req.json()?;
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(GrainError::BadRequest(
            "Missing required fields: email, password".into(),
        ));
    }
    let email = normalize_email(&body.email);

    // Same message for every failure so accounts can't be enumerated
    let invalid = || GrainError::Unauthorized("Invalid credentials".into());

    let users = state.db.collection::<User>();
    let Some(mut user) = users.find_one(&Filter::new().eq("email", email.as_str())).await? else {
        warn!(email = %email, "Login failed - unknown email");
        return Err(invalid());
    };
    if !verify_password(&body.password, &user.password_hash)? {
        warn!(user_id = %user.id, "Login failed - wrong password");
        return Err(invalid());
    }
    if !user.is_active {
        warn!(user_id = %user.id, "Login failed - account disabled");
        return Err(invalid());
    }

    let tenant = match user.tenant_id.as_deref() {
        Some(tenant_id) => {
            let tenant = state
                .db
                .collection::<Tenant>()
                .find_one(&Filter::by_id(tenant_id))
                .await?;
            match tenant {
                Some(t) if t.is_active => Some(t),
                _ => return Err(GrainError::Forbidden("Tenant account is inactive".into())),
            }
        }
        None => None,
    };

    user.last_login_at = Some(Utc::now());
    let user = users.replace_one(user).await?;

    info!(user_id = %user.id, role = %user.role, "Login successful");
    issue_token(state, &user, tenant.as_ref(), StatusCode::OK)
}

async fn load_caller(state: &AppState, req: &ApiRequest) -> Result<User> {
    let ctx = authenticate(state, req.auth_header()).await?;
    state
        .db
        .collection::<User>()
        .find_one(&Filter::by_id(&ctx.user_id))
        .await?
        .ok_or_else(|| GrainError::Unauthorized("User no longer exists".into()))
}

async fn handle_me(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let user = load_caller(state, req).await?;
    Ok(json_response(StatusCode::OK, &user_json(&user)))
}

async fn handle_refresh(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let user = load_caller(state, req).await?;
    issue_token(state, &user, None, StatusCode::OK)
}

async fn handle_logout(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let mut user = load_caller(state, req).await?;
    user.token_version += 1;
    let user = state.db.collection::<User>().replace_one(user).await?;

    info!(user_id = %user.id, "Logged out, tokens revoked");
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "success": true }),
    ))
}
