use crate::{
    entities::{order, order_event},
    errors::ServiceError,
    models::{BuyerIdentity, OrderLine, ShippingAddress},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
}

/// Order as shown to its buyer
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub status: String,
    pub stripe_session_id: String,
    pub printful_order_id: Option<i64>,
    pub items: Vec<OrderLine>,
    pub shipping_address: Option<ShippingAddress>,
    pub shipping_method: Option<String>,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,
    pub live_mode: bool,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<order::Model> for OrderResponse {
    fn from(model: order::Model) -> Self {
        let items = serde_json::from_value(model.items.clone()).unwrap_or_else(|e| {
            warn!(order_id = %model.id, error = %e, "stored order items are unreadable");
            Vec::new()
        });
        Self {
            id: model.id,
            status: model.status,
            stripe_session_id: model.stripe_session_id,
            printful_order_id: model.printful_order_id,
            items,
            shipping_address: serde_json::from_value(model.shipping_address).ok(),
            shipping_method: model.shipping_method,
            subtotal: model.subtotal,
            shipping_cost: model.shipping_cost,
            tax: model.tax,
            total: model.total,
            currency: model.currency,
            live_mode: model.live_mode,
            tracking_number: model.tracking_number,
            tracking_url: model.tracking_url,
            carrier: model.carrier,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
            paid_at: model.paid_at,
            shipped_at: model.shipped_at,
            delivered_at: model.delivered_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderEventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl From<order_event::Model> for OrderEventResponse {
    fn from(model: order_event::Model) -> Self {
        Self {
            id: model.id,
            event_type: model.event_type,
            source: model.source,
            status: model.status,
            payload: model.payload,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailResponse {
    pub order: OrderResponse,
    pub events: Vec<OrderEventResponse>,
}

fn require_identity(query: BuyerIdentity) -> Result<BuyerIdentity, ServiceError> {
    let identity = BuyerIdentity::new(query.pubkey, query.email);
    if identity.is_empty() {
        return Err(ServiceError::Unauthorized(
            "an email or pubkey is required".into(),
        ));
    }
    Ok(identity)
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    params(BuyerIdentity),
    responses(
        (status = 200, description = "Orders for this buyer", body = OrderListResponse),
        (status = 401, description = "No identity supplied", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<BuyerIdentity>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let identity = require_identity(query)?;
    let orders = state.services.orders.list_orders_for_user(&identity).await?;
    Ok(Json(OrderListResponse {
        orders: orders.into_iter().map(OrderResponse::from).collect(),
    }))
}

/// One of the caller's orders with its event history
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        BuyerIdentity
    ),
    responses(
        (status = 200, description = "Order with events", body = OrderDetailResponse),
        (status = 401, description = "No identity supplied", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<BuyerIdentity>,
) -> Result<Json<OrderDetailResponse>, ServiceError> {
    let identity = require_identity(query)?;
    let (order, events) = state
        .services
        .orders
        .get_order_with_events(id, &identity)
        .await?;
    Ok(Json(OrderDetailResponse {
        order: order.into(),
        events: events.into_iter().map(OrderEventResponse::from).collect(),
    }))
}
