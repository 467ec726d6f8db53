//! Request authentication
//!
//! A valid signature is not enough: the user must still exist, be active,
//! belong to an active tenant and carry the token version the token was
//! issued with.

use tracing::debug;

use crate::auth::jwt::{extract_token_from_header, Claims};
use crate::auth::Role;
use crate::db::schemas::{Tenant, User};
use crate::db::Filter;
use crate::server::AppState;
use crate::types::{GrainError, Result};

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    /// None only for super admins
    pub tenant_id: Option<String>,
}

impl AuthContext {
    /// Fail with 403 unless the caller holds at least `role`
    pub fn require(&self, role: Role) -> Result<()> {
        if self.role.allows(role) {
            Ok(())
        } else {
            Err(GrainError::Forbidden(format!(
                "Requires {} role or higher",
                role
            )))
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// Tenant the caller acts on. Super admins may pick one with
    /// `?tenant_id=`; everyone else is pinned to their own.
    pub fn tenant_scope(&self, requested: Option<&str>) -> Option<String> {
        if self.is_super_admin() {
            requested
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .or_else(|| self.tenant_id.clone())
        } else {
            self.tenant_id.clone()
        }
    }

    /// Like `tenant_scope`, but a tenant is mandatory
    pub fn require_tenant(&self, requested: Option<&str>) -> Result<String> {
        self.tenant_scope(requested).ok_or_else(|| {
            if self.is_super_admin() {
                GrainError::BadRequest("tenant_id is required".into())
            } else {
                GrainError::Forbidden("User is not assigned to a tenant".into())
            }
        })
    }

    /// Whether a record owned by `tenant_id` is visible to the caller
    pub fn can_see_tenant(&self, tenant_id: Option<&str>) -> bool {
        self.is_super_admin() || (tenant_id.is_some() && tenant_id == self.tenant_id.as_deref())
    }
}

/// Authenticate from an `Authorization` header value
pub async fn authenticate(state: &AppState, auth_header: Option<&str>) -> Result<AuthContext> {
    let token = extract_token_from_header(auth_header)
        .ok_or_else(|| GrainError::Unauthorized("Missing bearer token".into()))?;
    authenticate_token(state, token).await
}

/// Authenticate a raw token
pub async fn authenticate_token(state: &AppState, token: &str) -> Result<AuthContext> {
    let claims = state.jwt.verify_token(token)?;
    let user = current_user(state, &claims).await?;

    if let Some(tenant_id) = user.tenant_id.as_deref() {
        let tenant = state
            .db
            .collection::<Tenant>()
            .find_one(&Filter::by_id(tenant_id))
            .await?;
        match tenant {
            Some(t) if t.is_active => {}
            _ => return Err(GrainError::Forbidden("Tenant account is inactive".into())),
        }
    }

    Ok(AuthContext {
        user_id: user.id,
        email: user.email,
        role: user.role,
        tenant_id: user.tenant_id,
    })
}

/// Load the user a token was issued to, rejecting revoked tokens
pub async fn current_user(state: &AppState, claims: &Claims) -> Result<User> {
    let user = state
        .db
        .collection::<User>()
        .find_one(&Filter::by_id(&claims.sub))
        .await?
        .ok_or_else(|| GrainError::Unauthorized("User no longer exists".into()))?;

    if !user.is_active {
        return Err(GrainError::Unauthorized("Account is disabled".into()));
    }

    if user.token_version != claims.token_version {
        debug!(user_id = %user.id, "Rejected token with stale version");
        return Err(GrainError::Unauthorized("Token has been revoked".into()));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, tenant: Option<&str>) -> AuthContext {
        AuthContext {
            user_id: "u1".into(),
            email: "u1@farm.test".into(),
            role,
            tenant_id: tenant.map(str::to_string),
        }
    }

    #[test]
    fn test_require() {
        assert!(ctx(Role::Manager, Some("t1")).require(Role::Technician).is_ok());
        let err = ctx(Role::Technician, Some("t1"))
            .require(Role::Manager)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_tenant_scope() {
        let admin = ctx(Role::Admin, Some("t1"));
        assert_eq!(admin.tenant_scope(Some("t2")).as_deref(), Some("t1"));

        let root = ctx(Role::SuperAdmin, None);
        assert_eq!(root.tenant_scope(Some("t2")).as_deref(), Some("t2"));
        assert_eq!(root.tenant_scope(None), None);
        assert!(root.require_tenant(None).is_err());
    }

    #[test]
    fn test_can_see_tenant() {
        let admin = ctx(Role::Admin, Some("t1"));
        assert!(admin.can_see_tenant(Some("t1")));
        assert!(!admin.can_see_tenant(Some("t2")));
        assert!(!admin.can_see_tenant(None));
        assert!(ctx(Role::SuperAdmin, None).can_see_tenant(Some("t2")));
    }
}
