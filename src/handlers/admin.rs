use crate::{
    errors::ServiceError,
    handlers::{common::require_admin_token, orders::OrderResponse},
    AppState,
};
use axum::{
    extract::{Path, State},
    middleware,
    routing::post,
    Json, Router,
};
use uuid::Uuid;

/// Operator routes, gated on the configured admin token
pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/orders/:id/confirm", post(confirm_order))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Confirm a Printful draft so it goes into production
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/confirm",
    summary = "Confirm draft order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Draft confirmed", body = OrderResponse),
        (status = 400, description = "Order is not a draft", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Printful unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state.services.reconciler.confirm_draft(id).await?;
    Ok(Json(order.into()))
}
