use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::cart::cart_subtotal;
use crate::models::{CartItem, ShippingAddress, ShippingOption};
use crate::repositories::EventSource;
use crate::services::order_status::OrderStatus;
use crate::services::reconciler::{OrderReconciler, ReconcileOutcome};
use crate::services::session_metadata::{CheckoutMetadata, PRINTFUL_ORDER_ID_KEY};
use crate::services::stripe_integration::{
    is_checkout_session_id, CheckoutLineItem, NewCheckoutSession, PaymentGateway,
};

/// Cart submitted by the storefront
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub shipping: Option<ShippingOption>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub pubkey: Option<String>,
    #[serde(default)]
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCheckoutRequest {
    #[validate(length(min = 1, max = 255), custom = "validate_session_id")]
    pub session_id: String,
}

fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    if is_checkout_session_id(session_id) {
        Ok(())
    } else {
        let mut err = ValidationError::new("session_id");
        err.message = Some("Must be a Stripe Checkout Session id".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmCheckoutResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printful_order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_processed: bool,
}

/// Builds Stripe sessions from carts and confirms them after payment
pub struct CheckoutService {
    payments: Arc<dyn PaymentGateway>,
    reconciler: Arc<OrderReconciler>,
    site_url: String,
    currency: String,
    shipping_countries: Vec<String>,
}

impl CheckoutService {
    pub fn new(
        payments: Arc<dyn PaymentGateway>,
        reconciler: Arc<OrderReconciler>,
        config: &AppConfig,
    ) -> Self {
        Self {
            payments,
            reconciler,
            site_url: config.site_url.trim_end_matches('/').to_string(),
            currency: config.default_currency.to_ascii_uppercase(),
            shipping_countries: config.shipping_countries(),
        }
    }

    fn validate_cart(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(ShippingOption, ShippingAddress), ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::InvalidCartState("cart is empty".into()));
        }
        if request.items.iter().any(|item| item.quantity == 0) {
            return Err(ServiceError::InvalidCartState(
                "every item needs a quantity of at least one".into(),
            ));
        }
        let shipping = request
            .shipping
            .clone()
            .ok_or_else(|| ServiceError::InvalidCartState("no shipping option selected".into()))?;
        let address = request
            .shipping_address
            .clone()
            .ok_or_else(|| ServiceError::InvalidCartState("shipping address is missing".into()))?
            .normalized();

        let missing: Vec<&str> = [
            ("name", &address.name),
            ("address1", &address.address1),
            ("city", &address.city),
            ("country_code", &address.country_code),
            ("zip", &address.zip),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| *field)
        .collect();
        if !missing.is_empty() {
            return Err(ServiceError::InvalidCartState(format!(
                "shipping address is missing {}",
                missing.join(", ")
            )));
        }

        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }
        shipping.validate()?;
        address.validate()?;

        if !shipping.currency.eq_ignore_ascii_case(&self.currency) {
            return Err(ServiceError::InvalidCartState(format!(
                "shipping is quoted in {}, the store charges in {}",
                shipping.currency, self.currency
            )));
        }
        if !self.shipping_countries.contains(&address.country_code) {
            return Err(ServiceError::InvalidAddress(format!(
                "we do not ship to {}",
                address.country_code
            )));
        }

        Ok((shipping, address))
    }

    /// Creates a hosted Stripe Checkout Session for the cart.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionResponse, ServiceError> {
        let (shipping, address) = self.validate_cart(&request)?;
        let subtotal = cart_subtotal(&request.items)
            .ok_or_else(|| ServiceError::InvalidCartState("cart total is too large".into()))?;

        let email = request
            .email
            .clone()
            .or_else(|| address.email.clone())
            .filter(|e| !e.trim().is_empty());

        let metadata = CheckoutMetadata {
            lines: request.items.iter().map(CartItem::to_order_line).collect(),
            shipping_method: shipping.id.clone(),
            shipping_cost: shipping.rate,
            subtotal,
            address: Some(address),
            pubkey: request.pubkey.clone().filter(|p| !p.trim().is_empty()),
            printful_order_id: None,
        }
        .encode()?;

        let session = NewCheckoutSession {
            line_items: request
                .items
                .iter()
                .map(|item| CheckoutLineItem {
                    name: item.name.clone(),
                    unit_amount: item.price,
                    quantity: item.quantity,
                    image: item.image.clone(),
                })
                .collect(),
            shipping_line_item: CheckoutLineItem {
                name: format!("Shipping: {}", shipping.name),
                unit_amount: shipping.rate,
                quantity: 1,
                image: None,
            },
            currency: self.currency.clone(),
            success_url: format!(
                "{}/store/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.site_url
            ),
            cancel_url: format!("{}/store/cart", self.site_url),
            metadata,
            customer_email: email,
            shipping_countries: self.shipping_countries.clone(),
        };

        let created = self.payments.create_checkout_session(&session).await?;
        info!(
            session_id = %created.id,
            subtotal,
            shipping_cost = shipping.rate,
            "checkout session created"
        );
        Ok(CheckoutSessionResponse {
            session_id: created.id,
            url: created.url,
        })
    }

    /// Confirms a session from the post-payment redirect.
    ///
    /// Runs the same reconciliation as the Stripe webhook, so whichever of
    /// the two arrives second sees the order as already processed.
    #[instrument(skip(self))]
    pub async fn confirm_session(
        &self,
        session_id: &str,
    ) -> Result<ConfirmCheckoutResponse, ServiceError> {
        let session = self
            .payments
            .retrieve_session(session_id, &["payment_intent"])
            .await?;

        if !session.is_paid() {
            return Err(ServiceError::BadRequest(format!(
                "payment for session {} is {}",
                session.id, session.payment_status
            )));
        }

        let metadata = CheckoutMetadata::decode(&session.metadata)?;
        if let Some(printful_order_id) = metadata.printful_order_id {
            let order = self.reconciler.order_for_session(&session.id).await?;
            return Ok(ConfirmCheckoutResponse {
                success: true,
                order_id: order.as_ref().map(|o| o.id),
                printful_order_id: Some(printful_order_id),
                status: order.map(|o| o.status),
                already_processed: true,
            });
        }

        let payload = serde_json::to_value(&session)?;
        let outcome = self
            .reconciler
            .reconcile_paid_session(&session, EventSource::Checkout, "checkout.session.confirmed", payload)
            .await?;

        match outcome {
            ReconcileOutcome::Drafted(order) => {
                if let Some(printful_order_id) = order.printful_order_id {
                    let mut update = BTreeMap::new();
                    update.insert(PRINTFUL_ORDER_ID_KEY.to_string(), printful_order_id.to_string());
                    // The store already guards against a second order; this only short-circuits later confirms
                    if let Err(err) = self
                        .payments
                        .update_session_metadata(&session.id, &update)
                        .await
                    {
                        warn!(session_id = %session.id, error = %err, "could not record Printful order on session");
                    }
                }
                Ok(ConfirmCheckoutResponse {
                    success: true,
                    order_id: Some(order.id),
                    printful_order_id: order.printful_order_id,
                    status: Some(order.status),
                    already_processed: false,
                })
            }
            ReconcileOutcome::Duplicate(order)
                if OrderStatus::parse(&order.status) == OrderStatus::Failed =>
            {
                // A retry after a failed draft reports the failure again
                Err(ServiceError::ExternalApiError(format!(
                    "fulfillment for order {} failed: {}",
                    order.id,
                    order.error_message.as_deref().unwrap_or("unknown error")
                )))
            }
            ReconcileOutcome::Duplicate(order) => Ok(ConfirmCheckoutResponse {
                success: true,
                order_id: Some(order.id),
                printful_order_id: order.printful_order_id,
                status: Some(order.status),
                already_processed: true,
            }),
            ReconcileOutcome::Failed { error, .. } => Err(error),
        }
    }
}
