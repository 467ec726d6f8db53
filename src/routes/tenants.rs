//! Tenant endpoints (super admin)
//!
//! - `GET/POST /tenants`, `GET/PUT/DELETE /tenants/{id}`
//!
//! Deactivating a tenant locks out all of its users on their next request.

use async_trait::async_trait;
use serde::Deserialize;

use crate::auth::{AuthContext, Role};
use crate::db::schemas::{normalize_email, Tenant};
use crate::db::{new_id, Filter};
use crate::routes::request::ApiRequest;
use crate::routes::resource::{required, Resource, Writable};
use crate::server::AppState;
use crate::types::Result;

#[derive(Debug, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

#[async_trait]
impl Resource for Tenant {
    const LABEL: &'static str = "Tenant";
    const READ_ROLE: Role = Role::SuperAdmin;
    const WRITE_ROLE: Role = Role::SuperAdmin;
    const TENANT_SCOPED: bool = false;

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let mut filter = Filter::new();
        if let Some(q) = req.query_param("q") {
            filter = filter.contains("name", &q);
        }
        if let Some(active) = req.query_param("is_active") {
            filter = filter.eq("is_active", active == "true");
        }
        Ok(filter)
    }
}

#[async_trait]
impl Writable for Tenant {
    type Create = CreateTenant;
    type Update = UpdateTenant;

    async fn build(
        _state: &AppState,
        _ctx: &AuthContext,
        _tenant_id: Option<&str>,
        input: CreateTenant,
    ) -> Result<Tenant> {
        Ok(Tenant {
            id: new_id(),
            name: required("name", &input.name)?,
            email: normalize_email(&required("email", &input.email)?),
            phone: input.phone,
            address: input.address,
            is_active: true,
            ..Default::default()
        })
    }

    async fn apply(
        _state: &AppState,
        _ctx: &AuthContext,
        mut tenant: Tenant,
        update: UpdateTenant,
    ) -> Result<Tenant> {
        if let Some(name) = update.name {
            tenant.name = required("name", &name)?;
        }
        if let Some(email) = update.email {
            tenant.email = normalize_email(&required("email", &email)?);
        }
        if update.phone.is_some() {
            tenant.phone = update.phone;
        }
        if update.address.is_some() {
            tenant.address = update.address;
        }
        if let Some(active) = update.is_active {
            tenant.is_active = active;
        }
        Ok(tenant)
    }
}
