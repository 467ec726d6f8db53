//! Generic REST handlers over stored records
//!
//! Each record kind exposed over HTTP implements [`Resource`] (read, list,
//! delete) and usually [`Writable`] (create, update). The handlers here take
//! care of tenant scoping, role checks, paging and plan limits so the
//! per-resource modules only describe payloads and validation.
//!
//! ## Endpoints
//!
//! - `GET /{path}?page=&limit=&...` - `{ items, page, limit, total }`
//! - `GET /{path}/{id}` - one record
//! - `POST /{path}` - create (201)
//! - `PUT /{path}/{id}` - partial update
//! - `DELETE /{path}/{id}` - soft delete

use async_trait::async_trait;
use hyper::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::{AuthContext, Role};
use crate::db::schemas::UsageKind;
use crate::db::{Filter, FindOptions, Record};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::server::AppState;
use crate::services::usage::enforce_limit;
use crate::types::{GrainError, Result};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// A record kind readable over HTTP
#[async_trait]
pub trait Resource: Record {
    /// Singular name used in messages ("Silo not found")
    const LABEL: &'static str;

    /// Lowest role that may read
    const READ_ROLE: Role = Role::Technician;

    /// Lowest role that may create, update or delete
    const WRITE_ROLE: Role = Role::Manager;

    /// Whether records are owned by a tenant
    const TENANT_SCOPED: bool = true;

    /// Extra list conditions taken from the query string
    fn list_filter(_req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        Ok(Filter::new())
    }

    /// Sort order for list responses
    fn list_order() -> FindOptions {
        FindOptions::newest_first()
    }

    /// API representation
    fn to_json(&self) -> Value {
        record_json(self)
    }

    /// Checks run before a soft delete
    async fn before_delete(_state: &AppState, _ctx: &AuthContext, _record: &Self) -> Result<()> {
        Ok(())
    }

    /// Bookkeeping after a soft delete
    async fn after_delete(_state: &AppState, _record: &Self) -> Result<()> {
        Ok(())
    }
}

/// A resource that can be created and updated over HTTP
#[async_trait]
pub trait Writable: Resource {
    type Create: DeserializeOwned + Send;
    type Update: DeserializeOwned + Send;

    /// Plan limit counted when creating
    const USAGE: Option<UsageKind> = None;

    /// Build a new record. `tenant_id` is set for tenant-scoped resources.
    async fn build(
        state: &AppState,
        ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: Self::Create,
    ) -> Result<Self>;

    /// Apply a partial update to the current record
    async fn apply(
        state: &AppState,
        ctx: &AuthContext,
        current: Self,
        update: Self::Update,
    ) -> Result<Self>;

    /// Bookkeeping after a create (`previous` is None) or update
    async fn after_write(_state: &AppState, _record: &Self, _previous: Option<&Self>) -> Result<()> {
        Ok(())
    }
}

/// Serialize a record, exposing `_id` as `id` as well
pub fn record_json<T: Serialize>(record: &T) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Some(object) = value.as_object_mut() {
        if let Some(id) = object.get("_id").cloned() {
            object.insert("id".into(), id);
        }
    }
    value
}

/// Route `/{path}` and `/{path}/{id}` for a writable resource
pub async fn handle<R: Writable>(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    rest: &[&str],
) -> Result<ApiResponse> {
    match (req.method.clone(), rest) {
        (Method::GET, []) => list::<R>(state, req, ctx).await,
        (Method::POST, []) => create::<R>(state, req, ctx).await,
        (Method::GET, [id]) => get::<R>(state, ctx, id).await,
        (Method::PUT, [id]) => update::<R>(state, req, ctx, id).await,
        (Method::DELETE, [id]) => delete::<R>(state, ctx, id).await,
        (_, [] | [_]) => Err(GrainError::MethodNotAllowed),
        _ => Err(not_found(req)),
    }
}

pub fn not_found(req: &ApiRequest) -> GrainError {
    GrainError::NotFound(format!("No route for {}", req.path))
}

/// Clamp the requested page and page size
pub fn paging(req: &ApiRequest) -> Result<(u64, u64)> {
    let page = req.query_u64("page")?.unwrap_or(1).max(1);
    let limit = req
        .query_u64("limit")?
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    Ok((page, limit))
}

/// Tenant filter for the caller, or none for unscoped super admins
fn scope_filter<R: Resource>(req: &ApiRequest, ctx: &AuthContext) -> Result<Filter> {
    if !R::TENANT_SCOPED {
        return Ok(Filter::new());
    }
    match ctx.tenant_scope(req.query_param("tenant_id").as_deref()) {
        Some(tenant_id) => Ok(Filter::tenant(&tenant_id)),
        None if ctx.is_super_admin() => Ok(Filter::new()),
        None => Err(GrainError::Forbidden("User is not assigned to a tenant".into())),
    }
}

pub async fn list<R: Resource>(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
) -> Result<ApiResponse> {
    ctx.require(R::READ_ROLE)?;
    let (page, limit) = paging(req)?;
    let filter = scope_filter::<R>(req, ctx)?.and(R::list_filter(req, ctx)?);

    let collection = state.db.collection::<R>();
    let total = collection.count(&filter).await?;
    let items = collection
        .find_many(&filter, &R::list_order().page(page, limit))
        .await?;

    let items: Vec<Value> = items.iter().map(R::to_json).collect();
    Ok(json_response(
        StatusCode::OK,
        &json!({ "items": items, "page": page, "limit": limit, "total": total }),
    ))
}

/// Load a record the caller may see. Records of other tenants are reported
/// as missing.
pub async fn load<R: Resource>(state: &AppState, ctx: &AuthContext, id: &str) -> Result<R> {
    let record = state
        .db
        .collection::<R>()
        .find_one(&Filter::by_id(id))
        .await?
        .filter(|r| !R::TENANT_SCOPED || ctx.can_see_tenant(r.tenant_id()))
        .ok_or_else(|| GrainError::NotFound(format!("{} not found", R::LABEL)))?;
    Ok(record)
}

pub async fn get<R: Resource>(state: &AppState, ctx: &AuthContext, id: &str) -> Result<ApiResponse> {
    ctx.require(R::READ_ROLE)?;
    let record = load::<R>(state, ctx, id).await?;
    Ok(json_response(StatusCode::OK, &record.to_json()))
}

pub async fn create<R: Writable>(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
) -> Result<ApiResponse> {
    ctx.require(R::WRITE_ROLE)?;
    let input: R::Create = req.json()?;

    let tenant_id = if R::TENANT_SCOPED {
        Some(ctx.require_tenant(req.query_param("tenant_id").as_deref())?)
    } else {
        None
    };

    if let (Some(kind), Some(tenant_id)) = (R::USAGE, tenant_id.as_deref()) {
        enforce_limit(&state.db, tenant_id, kind).await?;
    }

    let record = R::build(state, ctx, tenant_id.as_deref(), input).await?;
    let record = state.db.collection::<R>().insert_one(record).await?;
    R::after_write(state, &record, None).await?;

    info!(
        resource = R::COLLECTION,
        id = record.id(),
        tenant_id = ?record.tenant_id(),
        user_id = %ctx.user_id,
        "Created"
    );
    Ok(json_response(StatusCode::CREATED, &record.to_json()))
}

pub async fn update<R: Writable>(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    id: &str,
) -> Result<ApiResponse> {
    ctx.require(R::WRITE_ROLE)?;
    let current = load::<R>(state, ctx, id).await?;
    let patch: R::Update = req.json()?;

    let previous = current.clone();
    let updated = R::apply(state, ctx, current, patch).await?;
    let updated = state.db.collection::<R>().replace_one(updated).await?;
    R::after_write(state, &updated, Some(&previous)).await?;

    info!(resource = R::COLLECTION, id, user_id = %ctx.user_id, "Updated");
    Ok(json_response(StatusCode::OK, &updated.to_json()))
}

pub async fn delete<R: Resource>(state: &AppState, ctx: &AuthContext, id: &str) -> Result<ApiResponse> {
    ctx.require(R::WRITE_ROLE)?;
    let record = load::<R>(state, ctx, id).await?;
    R::before_delete(state, ctx, &record).await?;

    if !state.db.collection::<R>().soft_delete(id).await? {
        return Err(GrainError::NotFound(format!("{} not found", R::LABEL)));
    }
    R::after_delete(state, &record).await?;

    info!(resource = R::COLLECTION, id, user_id = %ctx.user_id, "Deleted");
    Ok(json_response(StatusCode::OK, &json!({ "success": true })))
}

/// Trimmed required string field
pub fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GrainError::BadRequest(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Finite number strictly above zero
pub fn positive(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(GrainError::BadRequest(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(value)
}

/// Optional finite number not below zero
pub fn non_negative(field: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(GrainError::BadRequest(format!(
            "{} must not be negative",
            field
        ))),
        other => Ok(other),
    }
}

/// Parse an enum-valued query parameter through its serde name
pub fn query_enum<T: DeserializeOwned>(req: &ApiRequest, key: &str) -> Result<Option<T>> {
    req.query_param(key)
        .map(|raw| {
            serde_json::from_value(Value::String(raw.clone()))
                .map_err(|_| GrainError::BadRequest(format!("Invalid {}: {}", key, raw)))
        })
        .transpose()
}

/// Serde name of an enum value, for filters
pub fn enum_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::SiloStatus;
    use bytes::Bytes;
    use hyper::HeaderMap;

    fn req(query: &str) -> ApiRequest {
        ApiRequest::new(Method::GET, "/silos", Some(query), HeaderMap::new(), Bytes::new())
    }

    #[test]
    fn test_paging_clamps() {
        assert_eq!(paging(&req("")).unwrap(), (1, 20));
        assert_eq!(paging(&req("page=0&limit=0")).unwrap(), (1, 1));
        assert_eq!(paging(&req("page=3&limit=500")).unwrap(), (3, 100));
        assert!(paging(&req("limit=-1")).is_err());
    }

    #[test]
    fn test_record_json_exposes_id() {
        let value = record_json(&json!({ "_id": "abc", "name": "North" }));
        assert_eq!(value["id"], "abc");
        assert_eq!(value["_id"], "abc");
    }

    #[test]
    fn test_query_enum() {
        let status: Option<SiloStatus> = query_enum(&req("status=maintenance"), "status").unwrap();
        assert_eq!(status, Some(SiloStatus::Maintenance));
        assert!(query_enum::<SiloStatus>(&req("status=flooded"), "status").is_err());
        assert_eq!(enum_name(&SiloStatus::Inactive), "inactive");
    }

    #[test]
    fn test_validators() {
        assert_eq!(required("name", "  North ").unwrap(), "North");
        assert!(required("name", "   ").is_err());
        assert!(positive("capacity_kg", 0.0).is_err());
        assert!(positive("capacity_kg", f64::NAN).is_err());
        assert!(non_negative("moisture", Some(-1.0)).is_err());
        assert_eq!(non_negative("moisture", None).unwrap(), None);
    }
}
