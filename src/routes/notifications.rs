//! Notification endpoints
//!
//! - `GET /notifications?read=` - own tenant, newest first
//! - `GET /notifications/{id}`
//! - `POST /notifications/{id}/read`
//! - `DELETE /notifications/{id}`
//!
//! Notifications are written by the system (the plan usage warning job),
//! never through the API.

use hyper::{Method, StatusCode};

use crate::auth::{AuthContext, Role};
use crate::db::schemas::Notification;
use crate::db::Filter;
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::routes::resource::{self, not_found, Resource};
use crate::server::AppState;
use crate::types::{GrainError, Result};

impl Resource for Notification {
    const LABEL: &'static str = "Notification";
    const WRITE_ROLE: Role = Role::Technician;

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let read = match req.query_param("read").as_deref() {
            None => None,
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(other) => {
                return Err(GrainError::BadRequest(format!(
                    "read must be true or false, got {}",
                    other
                )))
            }
        };
        Ok(Filter::new().eq_opt("read", read))
    }
}

pub async fn handle(
    state: &AppState,
    req: &ApiRequest,
    ctx: &AuthContext,
    rest: &[&str],
) -> Result<ApiResponse> {
    match (req.method.clone(), rest) {
        (Method::GET, []) => resource::list::<Notification>(state, req, ctx).await,
        (Method::GET, [id]) => resource::get::<Notification>(state, ctx, id).await,
        (Method::DELETE, [id]) => resource::delete::<Notification>(state, ctx, id).await,
        (Method::POST, [id, "read"]) => mark_read(state, ctx, id).await,
        (_, [] | [_] | [_, "read"]) => Err(GrainError::MethodNotAllowed),
        _ => Err(not_found(req)),
    }
}

async fn mark_read(state: &AppState, ctx: &AuthContext, id: &str) -> Result<ApiResponse> {
    ctx.require(Role::Technician)?;
    let mut notification = resource::load::<Notification>(state, ctx, id).await?;
    if !notification.read {
        notification.read = true;
        notification = state
            .db
            .collection::<Notification>()
            .replace_one(notification)
            .await?;
    }
    Ok(json_response(StatusCode::OK, &notification.to_json()))
}
