//! Order data carried across the payment boundary in Checkout Session metadata.
//!
//! The webhook handler runs long after the browser request that built the
//! cart, with no shared state in between, so the session's metadata holds
//! everything needed to rebuild the order: the variant lines, the shipping
//! method and price, the subtotal, and the address the buyer typed in.

use std::collections::BTreeMap;

use crate::errors::ServiceError;
use crate::models::{OrderLine, ShippingAddress};
use crate::services::printful_integration::{external_id_for_session, FulfillmentOrderSpec};
use crate::services::stripe_integration::{
    validate_metadata, CheckoutSession, StripeAddress, METADATA_VALUE_LIMIT,
};

pub const ITEMS_KEY: &str = "items";
pub const SHIPPING_METHOD_KEY: &str = "shipping_method";
pub const SHIPPING_COST_KEY: &str = "shipping_cost";
pub const SUBTOTAL_KEY: &str = "subtotal";
pub const SHIPPING_ADDRESS_KEY: &str = "shipping_address";
pub const PUBKEY_KEY: &str = "pubkey";
pub const PRINTFUL_ORDER_ID_KEY: &str = "printful_order_id";

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutMetadata {
    pub lines: Vec<OrderLine>,
    pub shipping_method: String,
    pub shipping_cost: i64,
    pub subtotal: i64,
    pub address: Option<ShippingAddress>,
    pub pubkey: Option<String>,
    /// Written back after the confirmation path created the vendor order
    pub printful_order_id: Option<i64>,
}

impl CheckoutMetadata {
    /// Serializes into Stripe metadata, failing if any value cannot fit.
    ///
    /// Lines are stored as `[[variant_id, quantity], ...]` to keep them short.
    /// An address too long for one value is stored without its optional
    /// contact fields; Stripe collects the full address anyway.
    pub fn encode(&self) -> Result<BTreeMap<String, String>, ServiceError> {
        let mut metadata = BTreeMap::new();

        let pairs: Vec<(i64, u32)> = self
            .lines
            .iter()
            .map(|line| (line.variant_id, line.quantity))
            .collect();
        metadata.insert(ITEMS_KEY.to_string(), serde_json::to_string(&pairs)?);
        metadata.insert(
            SHIPPING_METHOD_KEY.to_string(),
            self.shipping_method.clone(),
        );
        metadata.insert(SHIPPING_COST_KEY.to_string(), self.shipping_cost.to_string());
        metadata.insert(SUBTOTAL_KEY.to_string(), self.subtotal.to_string());

        if let Some(address) = &self.address {
            let mut encoded = serde_json::to_string(address)?;
            if encoded.chars().count() > METADATA_VALUE_LIMIT {
                encoded = serde_json::to_string(&address.without_contact())?;
            }
            metadata.insert(SHIPPING_ADDRESS_KEY.to_string(), encoded);
        }
        if let Some(pubkey) = &self.pubkey {
            metadata.insert(PUBKEY_KEY.to_string(), pubkey.clone());
        }
        if let Some(id) = self.printful_order_id {
            metadata.insert(PRINTFUL_ORDER_ID_KEY.to_string(), id.to_string());
        }

        validate_metadata(&metadata)?;
        Ok(metadata)
    }

    /// Reads order data back. Fails with `BadRequest` when the session was
    /// not created by this storefront's checkout.
    pub fn decode(metadata: &BTreeMap<String, String>) -> Result<Self, ServiceError> {
        let items = metadata
            .get(ITEMS_KEY)
            .ok_or_else(|| ServiceError::BadRequest("session has no order items".into()))?;
        let pairs: Vec<(i64, u32)> = serde_json::from_str(items)
            .map_err(|e| ServiceError::BadRequest(format!("unreadable order items: {}", e)))?;
        if pairs.is_empty() {
            return Err(ServiceError::BadRequest("session has no order items".into()));
        }

        let shipping_method = metadata
            .get(SHIPPING_METHOD_KEY)
            .filter(|m| !m.is_empty())
            .cloned()
            .ok_or_else(|| ServiceError::BadRequest("session has no shipping method".into()))?;

        let amount = |key: &str| -> Result<i64, ServiceError> {
            match metadata.get(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ServiceError::BadRequest(format!("unreadable {}", key))),
                None => Ok(0),
            }
        };

        // A malformed address only loses a fallback; Stripe's copy is preferred anyway
        let address = metadata
            .get(SHIPPING_ADDRESS_KEY)
            .and_then(|raw| serde_json::from_str::<ShippingAddress>(raw).ok());

        Ok(Self {
            lines: pairs
                .into_iter()
                .map(|(variant_id, quantity)| OrderLine {
                    variant_id,
                    quantity,
                })
                .collect(),
            shipping_method,
            shipping_cost: amount(SHIPPING_COST_KEY)?,
            subtotal: amount(SUBTOTAL_KEY)?,
            address,
            pubkey: metadata
                .get(PUBKEY_KEY)
                .filter(|p| !p.is_empty())
                .cloned(),
            printful_order_id: metadata
                .get(PRINTFUL_ORDER_ID_KEY)
                .and_then(|raw| raw.parse().ok()),
        })
    }
}

/// An order rebuilt from a paid Checkout Session
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedOrder {
    pub spec: FulfillmentOrderSpec,
    pub email: String,
    pub pubkey: Option<String>,
    pub payment_intent_id: Option<String>,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,
    pub live_mode: bool,
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn from_stripe_address(
    address: &StripeAddress,
    name: String,
    phone: Option<String>,
    email: Option<String>,
) -> ShippingAddress {
    ShippingAddress {
        name,
        address1: address.line1.clone().unwrap_or_default(),
        address2: non_blank(address.line2.as_ref()),
        city: address.city.clone().unwrap_or_default(),
        state_code: non_blank(address.state.as_ref()),
        country_code: address.country.clone().unwrap_or_default(),
        zip: address.postal_code.clone().unwrap_or_default(),
        phone,
        email,
    }
    .normalized()
}

/// Picks the recipient address.
///
/// Stripe-collected shipping details win over the customer's billing
/// details, which win over the address the buyer typed into the cart. A
/// source only counts if it is a complete postal address with a name.
pub fn resolve_recipient(
    session: &CheckoutSession,
    metadata: &CheckoutMetadata,
    email: Option<String>,
) -> Option<ShippingAddress> {
    let customer = session.customer_details.as_ref();
    let customer_name = customer.and_then(|c| non_blank(c.name.as_ref()));
    let metadata_name = metadata
        .address
        .as_ref()
        .map(|a| a.name.trim().to_string())
        .filter(|n| !n.is_empty());
    let phone = customer
        .and_then(|c| non_blank(c.phone.as_ref()))
        .or_else(|| metadata.address.as_ref().and_then(|a| a.phone.clone()));

    if let Some(shipping) = session.collected_shipping() {
        if let Some(address) = shipping.address.as_ref().filter(|a| a.is_complete()) {
            let name = non_blank(shipping.name.as_ref())
                .or_else(|| customer_name.clone())
                .or_else(|| metadata_name.clone());
            if let Some(name) = name {
                return Some(from_stripe_address(address, name, phone, email));
            }
        }
    }

    if let Some(address) = customer
        .and_then(|c| c.address.as_ref())
        .filter(|a| a.is_complete())
    {
        if let Some(name) = customer_name.or_else(|| metadata_name.clone()) {
            return Some(from_stripe_address(address, name, phone, email));
        }
    }

    metadata.address.as_ref().and_then(|typed| {
        let complete = [
            &typed.name,
            &typed.address1,
            &typed.city,
            &typed.country_code,
            &typed.zip,
        ]
        .iter()
        .all(|field| !field.trim().is_empty());
        complete.then(|| {
            ShippingAddress {
                email: email.or_else(|| typed.email.clone()),
                phone: phone.or_else(|| typed.phone.clone()),
                ..typed.clone()
            }
            .normalized()
        })
    })
}

/// Buyer email, most authoritative source first.
pub fn resolve_email(session: &CheckoutSession, metadata: &CheckoutMetadata) -> Option<String> {
    session
        .customer_details
        .as_ref()
        .and_then(|c| non_blank(c.email.as_ref()))
        .or_else(|| non_blank(session.customer_email.as_ref()))
        .or_else(|| {
            metadata
                .address
                .as_ref()
                .and_then(|a| non_blank(a.email.as_ref()))
        })
}

/// Rebuilds the fulfillment order and money breakdown from a paid session.
///
/// Fails with `BadRequest` when the session lacks order metadata, a usable
/// shipping address, or a buyer email; no order should exist in that case.
pub fn reconstruct_order(session: &CheckoutSession) -> Result<ReconstructedOrder, ServiceError> {
    let metadata = CheckoutMetadata::decode(&session.metadata)?;

    let email = resolve_email(session, &metadata)
        .ok_or_else(|| ServiceError::BadRequest("session has no customer email".into()))?;
    let recipient = resolve_recipient(session, &metadata, Some(email.clone()))
        .ok_or_else(|| ServiceError::BadRequest("session has no usable shipping address".into()))?;

    let tax = session
        .total_details
        .as_ref()
        .and_then(|t| t.amount_tax)
        .unwrap_or(0);
    let total = session
        .amount_total
        .unwrap_or(metadata.subtotal + metadata.shipping_cost + tax);

    Ok(ReconstructedOrder {
        spec: FulfillmentOrderSpec {
            external_id: external_id_for_session(&session.id),
            shipping_method: metadata.shipping_method.clone(),
            recipient,
            items: metadata.lines.clone(),
        },
        email,
        pubkey: metadata.pubkey.clone(),
        payment_intent_id: session.payment_intent_id().map(str::to_string),
        subtotal: metadata.subtotal,
        shipping_cost: metadata.shipping_cost,
        tax,
        total,
        currency: session
            .currency
            .as_deref()
            .unwrap_or("usd")
            .to_ascii_uppercase(),
        live_mode: session.livemode,
    })
}
