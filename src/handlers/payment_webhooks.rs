use crate::{errors::ServiceError, services::reconciler::PaymentWebhookAck, AppState};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use tracing::warn;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(stripe_webhook))
}

// POST /api/v1/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    summary = "Stripe webhook",
    description = "Receives Stripe events. Paid checkout sessions become Printful draft orders.",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "Stripe webhook signature")),
    responses(
        (status = 200, description = "Event acknowledged", body = PaymentWebhookAck),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PaymentWebhookAck>, ServiceError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state
        .services
        .reconciler
        .handle_payment_event(&body, signature)
        .await
        .map_err(|err| {
            if matches!(err, ServiceError::InvalidSignature(_)) {
                warn!(error = %err, "Stripe webhook rejected");
            }
            err
        })?;

    Ok(Json(ack))
}
