//! Plan management endpoints
//!
//! - `GET/POST /api/plan-management/plans`, `GET/PUT/DELETE .../plans/{id}`
//!   (read: any user, write: super admin)
//! - `GET /api/plan-management/subscription` - current subscription and plan
//! - `PUT /api/plan-management/subscription` - switch plan (admin)
//! - `GET /api/plan-management/usage` - usage against plan limits
//!
//! Payments are collected outside this service; switching plans here only
//! changes which limits apply.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hyper::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::{AuthContext, Role};
use crate::db::schemas::{BillingInterval, Plan, PlanLimits, Subscription, SubscriptionStatus};
use crate::db::{new_id, Filter, FindOptions};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{self, not_found, record_json, required, Resource, Writable};
use crate::server::AppState;
use crate::services::usage::{active_plan, exceeded_by, subscription_for, usage_report};
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreatePlan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price_cents: u32,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub interval: Option<BillingInterval>,
    #[serde(default)]
    pub limits: PlanLimits,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<u32>,
    pub currency: Option<String>,
    pub interval: Option<BillingInterval>,
    pub limits: Option<PlanLimits>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlan {
    pub plan_id: String,
}

#[async_trait]
impl Resource for Plan {
    const LABEL: &'static str = "Plan";
    const WRITE_ROLE: Role = Role::SuperAdmin;
    const TENANT_SCOPED: bool = false;

    /// Only super admins see retired plans
    fn list_filter(_req: &ApiRequest, ctx: &AuthContext) -> Result<Filter> {
        Ok(if ctx.is_super_admin() {
            Filter::new()
        } else {
            Filter::new().eq("is_active", true)
        })
    }

    fn list_order() -> FindOptions {
        FindOptions::sorted_asc("price_cents")
    }

    async fn before_delete(state: &AppState, _ctx: &AuthContext, plan: &Plan) -> Result<()> {
        let subscribed = state
            .db
            .collection::<Subscription>()
            .count(&Filter::new().eq("plan_id", plan.id.as_str()))
            .await?;
        if subscribed > 0 {
            return Err(GrainError::Conflict(format!(
                "{} tenant(s) are subscribed to this plan",
                subscribed
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Writable for Plan {
    type Create = CreatePlan;
    type Update = UpdatePlan;

    async fn build(
        _state: &AppState,
        _ctx: &AuthContext,
        _tenant_id: Option<&str>,
        input: CreatePlan,
    ) -> Result<Plan> {
        Ok(Plan {
            id: new_id(),
            name: required("name", &input.name)?,
            description: input.description,
            price_cents: input.price_cents,
            currency: input
                .currency
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| "usd".to_string()),
            interval: input.interval.unwrap_or_default(),
            limits: input.limits,
            features: input.features,
            is_active: input.is_active.unwrap_or(true),
            ..Default::default()
        })
    }

    async fn apply(
        _state: &AppState,
        _ctx: &AuthContext,
        mut plan: Plan,
        update: UpdatePlan,
    ) -> Result<Plan> {
        if let Some(name) = update.name {
            plan.name = required("name", &name)?;
        }
        if let Some(description) = update.description {
            plan.description = description;
        }
        if let Some(price) = update.price_cents {
            plan.price_cents = price;
        }
        if let Some(currency) = update.currency {
            plan.currency = required("currency", &currency)?.to_lowercase();
        }
        if let Some(interval) = update.interval {
            plan.interval = interval;
        }
        if let Some(limits) = update.limits {
            plan.limits = limits;
        }
        if let Some(features) = update.features {
            plan.features = features;
        }
        if let Some(active) = update.is_active {
            plan.is_active = active;
        }
        Ok(plan)
    }
}

/// Route everything under `/api/plan-management`
pub async fn handle(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    rest: &[&str],
) -> Result<ApiResponse> {
    match (req.method.clone(), rest) {
        (_, ["plans", tail @ ..]) => resource::handle::<Plan>(state, req, ctx, tail).await,
        (Method::GET, ["subscription"]) => get_subscription(state, req, ctx).await,
        (Method::PUT, ["subscription"]) => change_plan(state, req, ctx).await,
        (Method::GET, ["usage"]) => get_usage(state, req, ctx).await,
        (_, ["subscription"] | ["usage"]) => Err(GrainError::MethodNotAllowed),
        _ => Err(not_found(req)),
    }
}

fn subscription_json(subscription: Option<&Subscription>, plan: Option<&Plan>) -> Value {
    json!({
        "subscription": subscription.map(record_json),
        "plan": plan.map(|p| p.to_json()),
    })
}

async fn get_subscription(state: &AppState, req: &ApiRequest, ctx: &AuthContext) -> Result<ApiResponse> {
    let tenant_id = ctx.require_tenant(req.query_param("tenant_id").as_deref())?;
    let subscription = subscription_for(&state.db, &tenant_id).await?;

    let plan = match &subscription {
        Some(s) => {
            state
                .db
                .collection::<Plan>()
                .find_one(&Filter::by_id(&s.plan_id))
                .await?
        }
        None => None,
    };
    Ok(json_response(
        StatusCode::OK,
        &subscription_json(subscription.as_ref(), plan.as_ref()),
    ))
}

async fn change_plan(state: &AppState, req: &ApiRequest, ctx: &AuthContext) -> Result<ApiResponse> {
    ctx.require(Role::Admin)?;
    let tenant_id = ctx.require_tenant(req.query_param("tenant_id").as_deref())?;
    let body: ChangePlan = req.json()?;

    let plan = state
        .db
        .collection::<Plan>()
        .find_one(&Filter::by_id(&body.plan_id).eq("is_active", true))
        .await?
        .ok_or_else(|| GrainError::BadRequest(format!("Unknown plan: {}", body.plan_id)))?;

    let usage = usage_report(&state.db, &tenant_id, Some(&plan)).await?;
    let exceeded = exceeded_by(&usage, &plan);
    if !exceeded.is_empty() {
        let names: Vec<&str> = exceeded.iter().map(|k| k.label()).collect();
        return Err(GrainError::Conflict(format!(
            "Current usage exceeds the {} plan for: {}",
            plan.name,
            names.join(", ")
        )));
    }

    let now = Utc::now();
    let period = match plan.interval {
        BillingInterval::Month => Duration::days(30),
        BillingInterval::Year => Duration::days(365),
    };

    let subscriptions = state.db.collection::<Subscription>();
    let subscription = match subscription_for(&state.db, &tenant_id).await? {
        Some(mut current) => {
            current.plan_id = plan.id.clone();
            current.status = SubscriptionStatus::Active;
            current.current_period_start = now;
            current.current_period_end = now + period;
            current.warned.clear();
            subscriptions.replace_one(current).await?
        }
        None => {
            subscriptions
                .insert_one(Subscription {
                    id: new_id(),
                    tenant_id: tenant_id.clone(),
                    plan_id: plan.id.clone(),
                    status: SubscriptionStatus::Active,
                    current_period_start: now,
                    current_period_end: now + period,
                    warned: Vec::new(),
                    ..Default::default()
                })
                .await?
        }
    };

    info!(tenant_id = %tenant_id, plan = %plan.name, user_id = %ctx.user_id, "Plan changed");
    Ok(json_response(
        StatusCode::OK,
        &subscription_json(Some(&subscription), Some(&plan)),
    ))
}

async fn get_usage(state: &AppState, req: &ApiRequest, ctx: &AuthContext) -> Result<ApiResponse> {
    let tenant_id = ctx.require_tenant(req.query_param("tenant_id").as_deref())?;
    let current = active_plan(&state.db, &tenant_id).await?;
    let plan = current.as_ref().map(|(_, plan)| plan);

    let usage = usage_report(&state.db, &tenant_id, plan).await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "tenant_id": tenant_id,
            "plan": plan.map(|p| json!({ "id": p.id, "name": p.name })),
            "usage": usage,
        }),
    ))
}
