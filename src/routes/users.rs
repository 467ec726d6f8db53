//! User management endpoints
//!
//! - `GET/POST /users`, `GET/PUT/DELETE /users/{id}`
//!
//! Admins manage the users of their own tenant and may hand out any role up
//! to their own, never `super_admin`. Password changes bump the token
//! version so existing sessions end.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{check_password_policy, hash_password, AuthContext, Role};
use crate::db::schemas::{normalize_email, UsageKind, User};
use crate::db::{new_id, Filter};
use crate::routes::request::ApiRequest;
use crate::routes::resource::{query_enum, record_json, required, Resource, Writable};
use crate::server::AppState;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

/// API representation of a user, without credentials
pub fn user_json(user: &User) -> Value {
    let mut value = record_json(user);
    if let Some(object) = value.as_object_mut() {
        object.remove("password_hash");
        object.remove("token_version");
    }
    value
}

/// Normalized address with a non-empty local part and a dotted domain
pub fn check_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(GrainError::BadRequest("A valid email is required".into())),
    }
}

fn check_assignable(ctx: &AuthContext, role: Role) -> Result<()> {
    if ctx.role.can_assign(role) {
        Ok(())
    } else {
        Err(GrainError::Forbidden(format!("Cannot assign the {} role", role)))
    }
}

/// Reject email addresses already held by a live user
pub async fn ensure_email_free(state: &AppState, email: &str, except: Option<&str>) -> Result<()> {
    let mut filter = Filter::new().eq("email", email);
    if let Some(id) = except {
        filter = filter.ne("_id", id);
    }
    if state.db.collection::<User>().count(&filter).await? > 0 {
        return Err(GrainError::Conflict("Email is already registered".into()));
    }
    Ok(())
}

#[async_trait]
impl Resource for User {
    const LABEL: &'static str = "User";
    const READ_ROLE: Role = Role::Manager;
    const WRITE_ROLE: Role = Role::Admin;

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let role: Option<Role> = query_enum(req, "role")?;
        let mut filter = Filter::new().eq_opt("role", role.map(|r| r.as_str()));
        if let Some(q) = req.query_param("q") {
            filter = filter.contains("name", &q);
        }
        Ok(filter)
    }

    fn to_json(&self) -> Value {
        user_json(self)
    }

    async fn before_delete(_state: &AppState, ctx: &AuthContext, user: &User) -> Result<()> {
        if user.id == ctx.user_id {
            return Err(GrainError::BadRequest("You cannot delete your own account".into()));
        }
        if user.role > ctx.role {
            return Err(GrainError::Forbidden("Cannot delete a higher role".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Writable for User {
    type Create = CreateUser;
    type Update = UpdateUser;

    const USAGE: Option<UsageKind> = Some(UsageKind::Users);

    async fn build(
        state: &AppState,
        ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateUser,
    ) -> Result<User> {
        let role = input.role.unwrap_or(Role::Technician);
        check_assignable(ctx, role)?;
        check_password_policy(&input.password)?;
        let email = check_email(&input.email)?;
        ensure_email_free(state, &email, None).await?;

        Ok(User {
            id: new_id(),
            tenant_id: tenant_id.map(str::to_string),
            name: required("name", &input.name)?,
            email,
            password_hash: hash_password(&input.password)?,
            role,
            phone: input.phone,
            is_active: true,
            token_version: 1,
            last_login_at: None,
            ..Default::default()
        })
    }

    async fn apply(
        state: &AppState,
        ctx: &AuthContext,
        mut user: User,
        update: UpdateUser,
    ) -> Result<User> {
        let is_self = user.id == ctx.user_id;
        if !is_self && user.role > ctx.role {
            return Err(GrainError::Forbidden("Cannot modify a higher role".into()));
        }

        if let Some(name) = update.name {
            user.name = required("name", &name)?;
        }
        if let Some(email) = update.email {
            let email = check_email(&email)?;
            if email != user.email {
                ensure_email_free(state, &email, Some(&user.id)).await?;
                user.email = email;
            }
        }
        if update.phone.is_some() {
            user.phone = update.phone;
        }
        if let Some(role) = update.role.filter(|r| *r != user.role) {
            if is_self {
                return Err(GrainError::BadRequest("You cannot change your own role".into()));
            }
            check_assignable(ctx, role)?;
            user.role = role;
            user.token_version += 1;
        }
        if let Some(active) = update.is_active.filter(|a| *a != user.is_active) {
            if is_self && !active {
                return Err(GrainError::BadRequest(
                    "You cannot deactivate your own account".into(),
                ));
            }
            user.is_active = active;
        }
        if let Some(password) = update.password {
            check_password_policy(&password)?;
            user.password_hash = hash_password(&password)?;
            user.token_version += 1;
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_json_hides_credentials() {
        let user = User {
            id: "u1".into(),
            email: "a@farm.test".into(),
            password_hash: "$argon2id$...".into(),
            ..Default::default()
        };
        let json = user_json(&user);
        assert_eq!(json["id"], "u1");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("token_version").is_none());
    }

    #[test]
    fn test_check_email() {
        assert_eq!(check_email(" Ana@Farm.Test ").unwrap(), "ana@farm.test");
        assert!(check_email("ana").is_err());
        assert!(check_email("@farm.test").is_err());
    }
}
