//! Reconciles payment and fulfillment events into order state.
//!
//! Stripe tells us an order was paid; Printful tells us what happened to it
//! afterwards. Both arrive as webhooks that may be retried or duplicated, so
//! every path here is safe to run more than once for the same input.

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::repositories::{EventSource, NewOrder, OrderRepository, OrderUpdate};
use crate::services::order_status::OrderStatus;
use crate::services::printful_integration::{FulfillmentGateway, VendorOrder};
use crate::services::session_metadata::reconstruct_order;
use crate::services::stripe_integration::{verify_webhook_signature, CheckoutSession};

const SESSION_COMPLETED: &str = "checkout.session.completed";
const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

/// Response body for a Stripe webhook delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentWebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printful_order_id: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentWebhookAck {
    fn ignored() -> Self {
        Self {
            received: true,
            ignored: true,
            ..Default::default()
        }
    }

    fn for_order(order: &OrderModel) -> Self {
        Self {
            received: true,
            order_id: Some(order.id),
            status: Some(order.status.clone()),
            printful_order_id: order.printful_order_id,
            ..Default::default()
        }
    }
}

/// Response body for a Printful webhook delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FulfillmentWebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// What happened when a paid session was reconciled
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// A Printful draft exists and the order is `printful_draft`
    Drafted(OrderModel),
    /// The order was recorded as `failed`; the vendor call did not succeed
    Failed { order: OrderModel, error: ServiceError },
    /// Someone else already owns this session
    Duplicate(OrderModel),
}

impl ReconcileOutcome {
    pub fn order(&self) -> &OrderModel {
        match self {
            Self::Drafted(order) | Self::Duplicate(order) => order,
            Self::Failed { order, .. } => order,
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrintfulShipment {
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrintfulOrderPayload {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub shipments: Vec<PrintfulShipment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrintfulWebhookData {
    #[serde(default)]
    pub order: Option<PrintfulOrderPayload>,
    #[serde(default)]
    pub shipment: Option<PrintfulShipment>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Printful webhook envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrintfulWebhook {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub store: Option<i64>,
    #[serde(default)]
    pub data: PrintfulWebhookData,
}

impl PrintfulWebhook {
    /// The status this event reports, before terminal-state rules apply
    pub fn reported_status(&self, current: &OrderStatus) -> OrderStatus {
        match self.event_type.as_str() {
            "package_shipped" => OrderStatus::Shipped,
            "order_failed" => OrderStatus::Failed,
            "order_canceled" => OrderStatus::Canceled,
            _ => self
                .data
                .order
                .as_ref()
                .and_then(|o| o.status.as_deref())
                .map(OrderStatus::from_printful)
                .unwrap_or_else(|| current.clone()),
        }
    }

    pub fn shipment(&self) -> Option<&PrintfulShipment> {
        self.data.shipment.as_ref().or_else(|| {
            self.data
                .order
                .as_ref()
                .and_then(|o| o.shipments.first())
        })
    }
}

/// Owns the order state machine
pub struct OrderReconciler {
    orders: OrderRepository,
    fulfillment: Arc<dyn FulfillmentGateway>,
    webhook_secret: Option<String>,
    webhook_tolerance_secs: u64,
    stale_claim_after: chrono::Duration,
}

impl OrderReconciler {
    pub fn new(
        orders: OrderRepository,
        fulfillment: Arc<dyn FulfillmentGateway>,
        webhook_secret: Option<String>,
        webhook_tolerance_secs: u64,
        stale_claim_after: std::time::Duration,
    ) -> Self {
        Self {
            orders,
            fulfillment,
            webhook_secret,
            webhook_tolerance_secs,
            stale_claim_after: chrono::Duration::seconds(stale_claim_after.as_secs() as i64),
        }
    }

    /// The order recorded for a checkout session, if any.
    pub async fn order_for_session(&self, session_id: &str) -> Result<Option<OrderModel>, ServiceError> {
        self.orders.find_order_by_session(session_id).await
    }

    /// Handles one Stripe webhook delivery.
    ///
    /// Signature failures are rejected before the store is touched. Events
    /// other than a paid checkout completion are acknowledged and ignored.
    #[instrument(skip(self, payload, signature), fields(bytes = payload.len()))]
    pub async fn handle_payment_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentWebhookAck, ServiceError> {
        let secret = self.webhook_secret.as_deref().unwrap_or_default();
        let signature = signature
            .ok_or_else(|| ServiceError::InvalidSignature("missing Stripe-Signature header".into()))?;
        let event = verify_webhook_signature(payload, signature, secret, self.webhook_tolerance_secs)
            .map_err(|err| {
                counter!("storefront.webhook.stripe.rejected", 1);
                err
            })?;
        counter!("storefront.webhook.stripe.received", 1);

        if event.event_type != SESSION_COMPLETED && event.event_type != ASYNC_PAYMENT_SUCCEEDED {
            info!(event_id = %event.id, event_type = %event.event_type, "ignoring Stripe event");
            counter!("storefront.webhook.stripe.ignored", 1);
            return Ok(PaymentWebhookAck::ignored());
        }

        let session: CheckoutSession = serde_json::from_value(event.data.object.clone())
            .map_err(|e| ServiceError::BadRequest(format!("unreadable checkout session: {}", e)))?;
        if !session.is_paid() {
            info!(session_id = %session.id, payment_status = %session.payment_status, "session not paid yet");
            counter!("storefront.webhook.stripe.ignored", 1);
            return Ok(PaymentWebhookAck::ignored());
        }

        let raw: Value = serde_json::from_slice(payload)?;
        let outcome = self
            .reconcile_paid_session(&session, EventSource::Stripe, &event.event_type, raw)
            .await?;

        let mut ack = PaymentWebhookAck::for_order(outcome.order());
        match outcome {
            ReconcileOutcome::Duplicate(_) => ack.duplicate = true,
            ReconcileOutcome::Failed { error, .. } => ack.error = Some(error.response_message()),
            ReconcileOutcome::Drafted(_) => {}
        }
        Ok(ack)
    }

    /// Turns a paid session into at most one Printful draft and one order.
    ///
    /// The session is claimed in the store before Printful is called, so
    /// concurrent or repeated deliveries for the same session end up as
    /// `Duplicate` without a second vendor order. A claim still `pending`
    /// after `stale_claim_after` belonged to a delivery that never finished
    /// and is driven again.
    #[instrument(skip(self, session, payload), fields(session_id = %session.id, source = source.as_str()))]
    pub async fn reconcile_paid_session(
        &self,
        session: &CheckoutSession,
        source: EventSource,
        event_type: &str,
        payload: Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let existing = self.orders.find_order_by_session(&session.id).await?;
        if let Some(existing) = &existing {
            if !self.is_stale_claim(existing) {
                info!(order_id = %existing.id, "session already reconciled");
                counter!("storefront.reconcile.duplicate", 1);
                return Ok(ReconcileOutcome::Duplicate(existing.clone()));
            }
        }

        let reconstructed = reconstruct_order(session).map_err(|err| {
            warn!(error = %err, "cannot rebuild order from session");
            counter!("storefront.reconcile.incomplete", 1);
            err
        })?;

        let claimed = match existing {
            Some(stale) => {
                let cutoff = Utc::now() - self.stale_claim_after;
                match self.orders.reclaim_stale_claim(stale.id, cutoff).await? {
                    Some(order) => {
                        warn!(order_id = %order.id, claimed_at = %stale.updated_at, "re-driving abandoned claim");
                        counter!("storefront.reconcile.reclaimed", 1);
                        order
                    }
                    None => return self.lost_claim(&session.id).await,
                }
            }
            None => {
                let claim = NewOrder {
                    stripe_session_id: session.id.clone(),
                    stripe_payment_intent_id: reconstructed.payment_intent_id.clone(),
                    printful_external_id: Some(reconstructed.spec.external_id.clone()),
                    pubkey: reconstructed.pubkey.clone(),
                    email: Some(reconstructed.email.clone()),
                    items: reconstructed.spec.items.clone(),
                    shipping_address: reconstructed.spec.recipient.clone(),
                    shipping_method: Some(reconstructed.spec.shipping_method.clone()),
                    subtotal: reconstructed.subtotal,
                    shipping_cost: reconstructed.shipping_cost,
                    tax: reconstructed.tax,
                    total: reconstructed.total,
                    currency: reconstructed.currency.clone(),
                    live_mode: reconstructed.live_mode,
                    status: OrderStatus::Pending,
                };
                match self.orders.claim_session(claim).await? {
                    Some(order) => order,
                    None => return self.lost_claim(&session.id).await,
                }
            }
        };

        match self.fulfillment.create_order(&reconstructed.spec, false).await {
            Ok(vendor) => {
                let status = OrderStatus::PrintfulDraft;
                let order = self.record_draft(claimed.id, &vendor).await?;
                self.orders
                    .append_event(order.id, event_type, source, &status, payload)
                    .await?;
                info!(order_id = %order.id, printful_order_id = vendor.id, "Printful draft created");
                counter!("storefront.reconcile.drafted", 1);
                Ok(ReconcileOutcome::Drafted(order))
            }
            Err(error) => {
                warn!(order_id = %claimed.id, error = %error, "Printful order creation failed");
                let status = OrderStatus::Failed;
                let order = self
                    .orders
                    .update_order_status(
                        claimed.id,
                        &status,
                        OrderUpdate {
                            error_message: Some(error.to_string()),
                            printful_error: Some(json!({
                                "message": error.to_string(),
                                "upstream": error.is_upstream(),
                            })),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.orders
                    .append_event(
                        order.id,
                        event_type,
                        source,
                        &status,
                        json!({ "event": payload, "error": error.to_string() }),
                    )
                    .await?;
                counter!("storefront.reconcile.failed", 1);
                Ok(ReconcileOutcome::Failed { order, error })
            }
        }
    }

    fn is_stale_claim(&self, order: &OrderModel) -> bool {
        OrderStatus::parse(&order.status) == OrderStatus::Pending
            && order.updated_at < Utc::now() - self.stale_claim_after
    }

    async fn lost_claim(&self, session_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        let existing = self
            .orders
            .find_order_by_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("lost claim without an owner".into()))?;
        info!(order_id = %existing.id, "session claimed concurrently");
        counter!("storefront.reconcile.duplicate", 1);
        Ok(ReconcileOutcome::Duplicate(existing))
    }

    /// Links the vendor draft to the claimed order, retrying the write once.
    ///
    /// The draft already exists at Printful, so losing its id would orphan it.
    async fn record_draft(&self, order_id: Uuid, vendor: &VendorOrder) -> Result<OrderModel, ServiceError> {
        let update = OrderUpdate {
            printful_order_id: Some(vendor.id),
            printful_external_id: vendor.external_id.clone(),
            ..Default::default()
        };
        match self
            .orders
            .update_order_status(order_id, &OrderStatus::PrintfulDraft, update.clone())
            .await
        {
            Ok(order) => Ok(order),
            Err(first) => {
                warn!(%order_id, printful_order_id = vendor.id, error = %first, "retrying draft write");
                self.orders
                    .update_order_status(order_id, &OrderStatus::PrintfulDraft, update)
                    .await
                    .map_err(|err| {
                        error!(
                            %order_id,
                            printful_order_id = vendor.id,
                            error = %err,
                            "Printful draft created but not recorded"
                        );
                        err
                    })
            }
        }
    }

    /// Applies a Printful webhook to the order it refers to.
    ///
    /// Unknown orders are acknowledged with a warning so Printful stops
    /// retrying. Terminal orders keep their status but still get the event.
    #[instrument(skip(self, payload))]
    pub async fn handle_fulfillment_event(
        &self,
        payload: Value,
    ) -> Result<FulfillmentWebhookAck, ServiceError> {
        counter!("storefront.webhook.printful.received", 1);
        let event: PrintfulWebhook = match serde_json::from_value(payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unreadable Printful webhook");
                return Ok(FulfillmentWebhookAck {
                    received: true,
                    warning: Some("unreadable payload".into()),
                    ..Default::default()
                });
            }
        };

        let Some(vendor_id) = event.data.order.as_ref().and_then(|o| o.id) else {
            info!(event_type = %event.event_type, "Printful event without an order");
            return Ok(FulfillmentWebhookAck {
                received: true,
                warning: Some("no order in payload".into()),
                ..Default::default()
            });
        };

        let Some(order) = self.orders.find_order_by_fulfillment_id(vendor_id).await? else {
            warn!(printful_order_id = vendor_id, "Printful event for unknown order");
            counter!("storefront.webhook.printful.unknown_order", 1);
            return Ok(FulfillmentWebhookAck {
                received: true,
                warning: Some(format!("order {} not found", vendor_id)),
                ..Default::default()
            });
        };

        let current = OrderStatus::parse(&order.status);
        let reported = event.reported_status(&current);
        let next = current.resolve(reported.clone());
        if next != reported {
            info!(
                order_id = %order.id,
                current = %current,
                reported = %reported,
                "ignoring transition out of terminal state"
            );
        }

        // A kept terminal status also keeps the fields that describe it
        let mut changes = OrderUpdate::default();
        if next == reported {
            if let Some(shipment) = event.shipment() {
                changes.tracking_number = shipment.tracking_number.clone();
                changes.tracking_url = shipment.tracking_url.clone();
                changes.carrier = shipment.carrier.clone().or_else(|| shipment.service.clone());
            }
            if event.event_type == "order_failed" {
                changes.error_message = event.data.reason.clone();
            }
        }

        let updated = self
            .orders
            .update_order_status(order.id, &next, changes)
            .await?;
        self.orders
            .append_event(updated.id, &event.event_type, EventSource::Printful, &next, payload)
            .await?;

        info!(order_id = %updated.id, status = %next, event_type = %event.event_type, "Printful event applied");
        Ok(FulfillmentWebhookAck {
            received: true,
            order_id: Some(updated.id),
            status: Some(updated.status),
            warning: None,
        })
    }

    /// Confirms a Printful draft so it goes into production.
    #[instrument(skip(self))]
    pub async fn confirm_draft(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;

        let current = OrderStatus::parse(&order.status);
        let vendor_id = match (current, order.printful_order_id) {
            (OrderStatus::PrintfulDraft, Some(id)) => id,
            (status, _) => {
                return Err(ServiceError::BadRequest(format!(
                    "order {} is {}, not an unconfirmed draft",
                    order_id, status
                )))
            }
        };

        let vendor = self.fulfillment.confirm_order(vendor_id).await?;
        let status = OrderStatus::PrintfulPending;
        let updated = self
            .orders
            .update_order_status(order.id, &status, OrderUpdate::default())
            .await?;
        self.orders
            .append_event(
                updated.id,
                "order.confirmed",
                EventSource::Operator,
                &status,
                serde_json::to_value(&vendor)?,
            )
            .await?;
        info!(order_id = %updated.id, printful_order_id = vendor_id, "Printful draft confirmed");
        counter!("storefront.reconcile.confirmed", 1);
        Ok(updated)
    }
}
