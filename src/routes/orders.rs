//! Order endpoints
//!
//! - `GET/POST /orders`, `GET/PUT/DELETE /orders/{id}`
//!
//! An order draws from one batch of the same tenant and may not ask for more
//! than the batch holds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::AuthContext;
use crate::db::schemas::{timestamp, GrainBatch, Order, OrderStatus};
use crate::db::{new_id, Filter};
use crate::routes::request::ApiRequest;
use crate::routes::resource::{enum_name, positive, query_enum, required, Resource, Writable};
use crate::server::AppState;
use crate::types::{GrainError, Result};

#[derive(Debug, Deserialize)]
pub struct CreateOrder {
    pub order_number: String,
    pub batch_id: String,
    pub buyer_name: String,
    #[serde(default)]
    pub buyer_contact: Option<String>,
    pub quantity_kg: f64,
    pub price_per_kg: f64,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default, with = "timestamp::option")]
    pub delivery_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrder {
    pub order_number: Option<String>,
    pub batch_id: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_contact: Option<String>,
    pub quantity_kg: Option<f64>,
    pub price_per_kg: Option<f64>,
    pub status: Option<OrderStatus>,
    #[serde(default, with = "timestamp::option")]
    pub delivery_date: Option<DateTime<Utc>>,
}

/// Batch must exist in the tenant and hold at least `quantity_kg`
async fn check_batch(state: &AppState, tenant_id: &str, batch_id: &str, quantity_kg: f64) -> Result<()> {
    let batch = state
        .db
        .collection::<GrainBatch>()
        .find_one(&Filter::by_id(batch_id).eq("tenant_id", tenant_id))
        .await?
        .ok_or_else(|| GrainError::BadRequest(format!("Unknown batch: {}", batch_id)))?;

    if batch.quantity_kg < quantity_kg {
        return Err(GrainError::BadRequest(format!(
            "Batch {} holds {} kg, order asks for {} kg",
            batch.batch_id, batch.quantity_kg, quantity_kg
        )));
    }
    Ok(())
}

fn total(quantity_kg: f64, price_per_kg: f64) -> f64 {
    (quantity_kg * price_per_kg * 100.0).round() / 100.0
}

#[async_trait]
impl Resource for Order {
    const LABEL: &'static str = "Order";

    fn list_filter(req: &ApiRequest, _ctx: &AuthContext) -> Result<Filter> {
        let status: Option<OrderStatus> = query_enum(req, "status")?;
        Ok(Filter::new()
            .eq_opt("status", status.map(|s| enum_name(&s)))
            .eq_opt("batch_id", req.query_param("batch_id")))
    }
}

#[async_trait]
impl Writable for Order {
    type Create = CreateOrder;
    type Update = UpdateOrder;

    async fn build(
        state: &AppState,
        _ctx: &AuthContext,
        tenant_id: Option<&str>,
        input: CreateOrder,
    ) -> Result<Order> {
        let tenant_id = tenant_id.unwrap_or_default();
        let quantity_kg = positive("quantity_kg", input.quantity_kg)?;
        let price_per_kg = positive("price_per_kg", input.price_per_kg)?;
        check_batch(state, tenant_id, &input.batch_id, quantity_kg).await?;

        Ok(Order {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            order_number: required("order_number", &input.order_number)?,
            batch_id: input.batch_id,
            buyer_name: required("buyer_name", &input.buyer_name)?,
            buyer_contact: input.buyer_contact,
            quantity_kg,
            price_per_kg,
            total_price: total(quantity_kg, price_per_kg),
            status: input.status.unwrap_or_default(),
            delivery_date: input.delivery_date,
            ..Default::default()
        })
    }

    async fn apply(
        state: &AppState,
        _ctx: &AuthContext,
        mut order: Order,
        update: UpdateOrder,
    ) -> Result<Order> {
        let recheck = update.batch_id.is_some() || update.quantity_kg.is_some();

        if let Some(number) = update.order_number {
            order.order_number = required("order_number", &number)?;
        }
        if let Some(batch_id) = update.batch_id {
            order.batch_id = batch_id;
        }
        if let Some(buyer) = update.buyer_name {
            order.buyer_name = required("buyer_name", &buyer)?;
        }
        if update.buyer_contact.is_some() {
            order.buyer_contact = update.buyer_contact;
        }
        if let Some(quantity) = update.quantity_kg {
            order.quantity_kg = positive("quantity_kg", quantity)?;
        }
        if let Some(price) = update.price_per_kg {
            order.price_per_kg = positive("price_per_kg", price)?;
        }
        if let Some(status) = update.status {
            order.status = status;
        }
        if update.delivery_date.is_some() {
            order.delivery_date = update.delivery_date;
        }

        if recheck {
            check_batch(state, &order.tenant_id, &order.batch_id, order.quantity_kg).await?;
        }
        order.total_price = total(order.quantity_kg, order.price_per_kg);
        Ok(order)
    }
}
