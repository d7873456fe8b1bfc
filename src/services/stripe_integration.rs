//! Stripe Checkout client and webhook signature verification.
//!
//! Only the slice of the Stripe API the storefront needs is modeled: creating
//! and retrieving Checkout Sessions, writing session metadata back, and
//! verifying `Stripe-Signature` headers on webhook deliveries.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Stripe rejects metadata values longer than this.
pub const METADATA_VALUE_LIMIT: usize = 500;
/// Stripe rejects metadata with more keys than this.
pub const METADATA_KEY_LIMIT: usize = 50;

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            secret_key: cfg.stripe_secret_key.clone(),
            api_base: cfg.stripe_api_base.trim_end_matches('/').to_string(),
            timeout: cfg.external_call_timeout(),
        }
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One priced line on a Checkout Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    /// Minor units
    pub unit_amount: i64,
    pub quantity: u32,
    pub image: Option<String>,
}

/// Parameters for a new hosted Checkout Session
#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub line_items: Vec<CheckoutLineItem>,
    pub shipping_line_item: CheckoutLineItem,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub customer_email: Option<String>,
    /// Countries Stripe should let the buyer ship to
    pub shipping_countries: Vec<String>,
}

impl NewCheckoutSession {
    /// Flattens the session into Stripe's bracketed form encoding.
    pub fn to_form_params(&self) -> Vec<(String, String)> {
        let currency = self.currency.to_ascii_lowercase();
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        let lines = self
            .line_items
            .iter()
            .chain(std::iter::once(&self.shipping_line_item));
        for (index, item) in lines.enumerate() {
            let prefix = format!("line_items[{}]", index);
            params.push((
                format!("{}[price_data][currency]", prefix),
                currency.clone(),
            ));
            params.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount.to_string(),
            ));
            params.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            if let Some(image) = &item.image {
                params.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        for (index, country) in self.shipping_countries.iter().enumerate() {
            params.push((
                format!("shipping_address_collection[allowed_countries][{}]", index),
                country.clone(),
            ));
        }

        if let Some(email) = &self.customer_email {
            params.push(("customer_email".to_string(), email.clone()));
        }

        for (key, value) in &self.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        params
    }
}

/// Ensures metadata fits Stripe's limits before anything is sent.
pub fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<(), ServiceError> {
    if metadata.len() > METADATA_KEY_LIMIT {
        return Err(ServiceError::ValidationError(format!(
            "checkout metadata has {} keys; at most {} are allowed",
            metadata.len(),
            METADATA_KEY_LIMIT
        )));
    }
    for (key, value) in metadata {
        if value.chars().count() > METADATA_VALUE_LIMIT {
            return Err(ServiceError::ValidationError(format!(
                "checkout metadata '{}' is {} characters; the limit is {}",
                key,
                value.chars().count(),
                METADATA_VALUE_LIMIT
            )));
        }
    }
    Ok(())
}

/// Identifier and hosted URL of a freshly created session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Field that Stripe returns as an id unless it was expanded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentRef {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Expandable<PaymentIntentRef> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(intent) => &intent.id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StripeAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl StripeAddress {
    /// Enough to put a parcel in the post
    pub fn is_complete(&self) -> bool {
        [&self.line1, &self.city, &self.postal_code, &self.country]
            .iter()
            .all(|field| field.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<StripeAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub name: Option<String>,
    pub address: Option<StripeAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedInformation {
    pub shipping_details: Option<ShippingDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalDetails {
    pub amount_tax: Option<i64>,
    pub amount_shipping: Option<i64>,
    pub amount_discount: Option<i64>,
}

/// The parts of a Checkout Session the reconciler reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<Expandable<PaymentIntentRef>>,
    #[serde(default)]
    pub amount_subtotal: Option<i64>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub livemode: bool,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    /// Pre-2024 API versions put collected shipping here
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    pub collected_information: Option<CollectedInformation>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub total_details: Option<TotalDetails>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent.as_ref().map(|pi| pi.id())
    }

    /// Shipping details Stripe collected, wherever this API version put them
    pub fn collected_shipping(&self) -> Option<&ShippingDetails> {
        self.collected_information
            .as_ref()
            .and_then(|info| info.shipping_details.as_ref())
            .or(self.shipping_details.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// A verified webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: StripeEventData,
}

/// Payment provider operations the storefront depends on
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CreatedCheckoutSession, ServiceError>;

    async fn retrieve_session(
        &self,
        session_id: &str,
        expand: &[&str],
    ) -> Result<CheckoutSession, ServiceError>;

    /// Merges `metadata` into the session's existing metadata.
    async fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ServiceError>;
}

/// Stripe REST client
#[derive(Clone, Debug)]
pub struct StripeClient {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Stripe client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn secret_key(&self) -> Result<&str, ServiceError> {
        self.config
            .secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::UpstreamAuthError("Stripe secret key not configured".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                ServiceError::ExternalApiError(format!("Failed to parse Stripe {}: {}", context, e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let (message, kind) = match serde_json::from_str::<StripeErrorEnvelope>(&body) {
            Ok(envelope) => (
                envelope.error.message.unwrap_or_else(|| body.clone()),
                envelope.error.kind,
            ),
            Err(_) => (body.clone(), None),
        };
        warn!(%status, error_type = ?kind, "Stripe {} failed: {}", context, message);
        Err(map_stripe_status(status, context, message))
    }
}

/// True for ids shaped like a Checkout Session id (`cs_test_…`, `cs_live_…`).
///
/// Session ids end up in request paths, so anything else is refused.
pub fn is_checkout_session_id(id: &str) -> bool {
    id.len() <= 255
        && id.strip_prefix("cs_").is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn session_path(session_id: &str) -> Result<String, ServiceError> {
    if !is_checkout_session_id(session_id) {
        return Err(ServiceError::BadRequest(
            "not a checkout session id".into(),
        ));
    }
    Ok(format!("/v1/checkout/sessions/{}", session_id))
}

fn map_stripe_status(status: StatusCode, context: &str, message: String) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ServiceError::UpstreamAuthError(format!("Stripe rejected credentials: {}", message))
        }
        StatusCode::NOT_FOUND => ServiceError::NotFound(format!("Stripe {}: {}", context, message)),
        StatusCode::TOO_MANY_REQUESTS => {
            ServiceError::UpstreamUnavailable(format!("Stripe rate limited: {}", message))
        }
        s if s.is_server_error() => {
            ServiceError::UpstreamUnavailable(format!("Stripe {}: {}", s, message))
        }
        _ => ServiceError::ExternalApiError(format!("Stripe {}: {}", context, message)),
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::UpstreamUnavailable("Stripe request timed out".into())
    } else {
        ServiceError::UpstreamUnavailable(format!("Stripe unreachable: {}", err))
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, session), fields(lines = session.line_items.len()))]
    async fn create_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CreatedCheckoutSession, ServiceError> {
        validate_metadata(&session.metadata)?;
        let key = self.secret_key()?;

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .basic_auth(key, Some(""))
            .form(&session.to_form_params())
            .send()
            .await
            .map_err(transport_error)?;

        let created: CreatedCheckoutSession = Self::parse(response, "checkout session").await?;
        info!(session_id = %created.id, "Stripe checkout session created");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(
        &self,
        session_id: &str,
        expand: &[&str],
    ) -> Result<CheckoutSession, ServiceError> {
        let path = session_path(session_id)?;
        let key = self.secret_key()?;
        let query: Vec<(&str, &str)> = expand.iter().map(|field| ("expand[]", *field)).collect();

        let response = self
            .client
            .get(self.url(&path))
            .basic_auth(key, Some(""))
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        Self::parse(response, "checkout session").await
    }

    #[instrument(skip(self, metadata))]
    async fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ServiceError> {
        validate_metadata(metadata)?;
        let path = session_path(session_id)?;
        let key = self.secret_key()?;
        let form: Vec<(String, String)> = metadata
            .iter()
            .map(|(k, v)| (format!("metadata[{}]", k), v.clone()))
            .collect();

        let response = self
            .client
            .post(self.url(&path))
            .basic_auth(key, Some(""))
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let _: serde_json::Value = Self::parse(response, "session metadata update").await?;
        Ok(())
    }
}

/// Verifies a `Stripe-Signature` header against the raw request body and
/// returns the parsed event.
///
/// The header carries `t=<unix seconds>` and one or more `v1=<hex hmac>`
/// entries; any matching `v1` is accepted so secrets can be rotated.
pub fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: u64,
) -> Result<StripeEvent, ServiceError> {
    verify_webhook_signature_at(
        payload,
        signature_header,
        secret,
        tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
}

pub(crate) fn verify_webhook_signature_at(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<StripeEvent, ServiceError> {
    if secret.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "webhook secret not configured".into(),
        ));
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in signature_header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(ServiceError::InvalidSignature("missing v1 signature".into()));
    }
    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(ServiceError::InvalidSignature(
            "timestamp outside tolerance".into(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InvalidSignature("unusable webhook secret".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
    if !matched {
        return Err(ServiceError::InvalidSignature("signature mismatch".into()));
    }

    serde_json::from_slice(payload)
        .map_err(|e| ServiceError::InvalidSignature(format!("unparsable event body: {}", e)))
}

/// Builds a `Stripe-Signature` header value for `payload`, as Stripe would.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}
