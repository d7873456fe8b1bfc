use crate::{errors::ServiceError, services::reconciler::FulfillmentWebhookAck, AppState};
use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use serde_json::Value;
use tracing::warn;

pub fn printful_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/printful", post(printful_webhook))
}

// POST /api/v1/webhooks/printful
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/printful",
    summary = "Printful webhook",
    description = "Receives Printful order and shipment events. Unknown orders are acknowledged with a warning.",
    request_body(content = Object, description = "Printful webhook payload"),
    responses(
        (status = 200, description = "Event acknowledged", body = FulfillmentWebhookAck),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn printful_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<FulfillmentWebhookAck>, ServiceError> {
    // Printful retries anything but a 200, so unreadable bodies are acknowledged with a warning
    let payload: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        warn!(error = %e, "Printful webhook body is not JSON");
        Value::Null
    });

    let ack = state
        .services
        .reconciler
        .handle_fulfillment_event(payload)
        .await?;
    Ok(Json(ack))
}
