use crate::handlers::common::validate_input;
use crate::{
    errors::ServiceError,
    services::checkout::{
        CheckoutRequest, CheckoutSessionResponse, ConfirmCheckoutRequest, ConfirmCheckoutResponse,
    },
    AppState,
};
use axum::{extract::State, routing::post, Json, Router};

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/session", post(create_checkout_session))
        .route("/checkout/confirm", post(confirm_checkout))
}

/// Start a Stripe Checkout Session for a cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout/session",
    summary = "Create checkout session",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Session created", body = CheckoutSessionResponse),
        (status = 400, description = "Cart, shipping or address invalid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Stripe unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSessionResponse>, ServiceError> {
    let response = state.services.checkout.create_session(payload).await?;
    Ok(Json(response))
}

/// Confirm a paid session after the Stripe redirect
#[utoipa::path(
    post,
    path = "/api/v1/checkout/confirm",
    summary = "Confirm checkout",
    description = "Creates the Printful draft for a paid session unless the webhook already did.",
    request_body = ConfirmCheckoutRequest,
    responses(
        (status = 200, description = "Order recorded", body = ConfirmCheckoutResponse),
        (status = 400, description = "Session unpaid or not a storefront session", body = crate::errors::ErrorResponse),
        (status = 502, description = "Stripe or Printful unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn confirm_checkout(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmCheckoutRequest>,
) -> Result<Json<ConfirmCheckoutResponse>, ServiceError> {
    validate_input(&payload)?;
    let response = state
        .services
        .checkout
        .confirm_session(payload.session_id.trim())
        .await?;
    Ok(Json(response))
}
