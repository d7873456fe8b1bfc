//! Printful API client.
//!
//! Catalog reads, shipping quotes, and order creation against Printful's v1
//! REST API. Every response arrives in a `{code, result, error}` envelope;
//! prices are decimal strings and are converted to integer minor units here
//! so the rest of the crate never sees floating point money.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::openapi::schema::{ObjectBuilder, Schema, Type};
use utoipa::openapi::RefOr;
use utoipa::{PartialSchema, ToSchema};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{OrderLine, ShippingAddress, ShippingOption};

#[derive(Clone)]
pub struct PrintfulConfig {
    pub api_key: Option<String>,
    pub store_id: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

impl PrintfulConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            api_key: cfg.printful_api_key.clone(),
            store_id: cfg.printful_store_id.clone(),
            api_base: cfg.printful_api_base.trim_end_matches('/').to_string(),
            timeout: cfg.external_call_timeout(),
        }
    }
}

impl std::fmt::Debug for PrintfulConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintfulConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("store_id", &self.store_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// A synced product in the store's catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub variants: u32,
    pub synced: u32,
    pub thumbnail_url: Option<String>,
}

/// Stock state Printful reports for a variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantAvailability {
    Active,
    Discontinued,
    OutOfStock,
    TemporaryOutOfStock,
    Other(String),
}

impl VariantAvailability {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Discontinued => "discontinued",
            Self::OutOfStock => "out_of_stock",
            Self::TemporaryOutOfStock => "temporary_out_of_stock",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_purchasable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<&str> for VariantAvailability {
    fn from(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "discontinued" => Self::Discontinued,
            "out_of_stock" => Self::OutOfStock,
            "temporary_out_of_stock" => Self::TemporaryOutOfStock,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for VariantAvailability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VariantAvailability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

impl PartialSchema for VariantAvailability {
    fn schema() -> RefOr<Schema> {
        RefOr::T(Schema::Object(
            ObjectBuilder::new()
                .schema_type(Type::String)
                .description(Some(
                    "active, discontinued, out_of_stock, temporary_out_of_stock, or a newer Printful value",
                ))
                .build(),
        ))
    }
}

impl ToSchema for VariantAvailability {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    /// Sync variant id; what orders reference
    pub id: i64,
    /// Catalog variant id; what shipping quotes reference
    pub catalog_variant_id: Option<i64>,
    pub external_id: Option<String>,
    pub name: String,
    pub sku: Option<String>,
    /// Minor units
    pub retail_price: i64,
    pub currency: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub image: Option<String>,
    pub availability: VariantAvailability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    pub product: CatalogProduct,
    pub variants: Vec<ProductVariant>,
}

/// One line of a shipping quote, keyed by catalog variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingQuoteItem {
    pub variant_id: i64,
    pub quantity: u32,
}

/// Everything Printful needs to create an order
#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentOrderSpec {
    pub external_id: String,
    pub shipping_method: String,
    pub recipient: ShippingAddress,
    pub items: Vec<OrderLine>,
}

/// Order as Printful reports it back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorOrder {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    pub status: String,
}

/// Printful operations the storefront depends on
#[async_trait]
pub trait FulfillmentGateway: Send + Sync {
    async fn list_catalog_products(&self) -> Result<Vec<CatalogProduct>, ServiceError>;

    async fn get_product_detail(&self, product_id: i64) -> Result<ProductDetail, ServiceError>;

    async fn quote_shipping(
        &self,
        address: &ShippingAddress,
        items: &[ShippingQuoteItem],
        currency: &str,
    ) -> Result<Vec<ShippingOption>, ServiceError>;

    /// Creates an order. With `confirm_immediately == false` Printful keeps
    /// it as a draft that nobody is charged for until it is confirmed.
    async fn create_order(
        &self,
        spec: &FulfillmentOrderSpec,
        confirm_immediately: bool,
    ) -> Result<VendorOrder, ServiceError>;

    async fn confirm_order(&self, vendor_order_id: i64) -> Result<VendorOrder, ServiceError>;
}

/// Stable Printful `external_id` for a checkout session.
///
/// Printful limits external ids to 32 characters, which Stripe session ids
/// exceed, so a digest prefix is used instead.
pub fn external_id_for_session(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    format!("sf-{}", &hex::encode(digest)[..29])
}

/// Converts a decimal price string such as `"12.50"` to minor units.
pub fn to_minor_units(amount: &str) -> Result<i64, ServiceError> {
    let value = Decimal::from_str(amount.trim()).map_err(|e| {
        ServiceError::ExternalApiError(format!("Printful returned an invalid amount '{}': {}", amount, e))
    })?;
    (value * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::ExternalApiError(format!("Printful amount out of range: {}", amount))
        })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSyncProduct {
    id: i64,
    #[serde(default)]
    external_id: Option<String>,
    name: String,
    #[serde(default)]
    variants: u32,
    #[serde(default)]
    synced: u32,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

impl From<RawSyncProduct> for CatalogProduct {
    fn from(raw: RawSyncProduct) -> Self {
        Self {
            id: raw.id,
            external_id: raw.external_id,
            name: raw.name,
            variants: raw.variants,
            synced: raw.synced,
            thumbnail_url: raw.thumbnail_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVariantProduct {
    #[serde(default)]
    variant_id: Option<i64>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSyncVariant {
    id: i64,
    #[serde(default)]
    external_id: Option<String>,
    name: String,
    #[serde(default)]
    sku: Option<String>,
    retail_price: String,
    currency: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    availability_status: Option<VariantAvailability>,
    #[serde(default)]
    product: Option<RawVariantProduct>,
}

impl RawSyncVariant {
    fn into_variant(self) -> Result<ProductVariant, ServiceError> {
        Ok(ProductVariant {
            id: self.id,
            catalog_variant_id: self.product.as_ref().and_then(|p| p.variant_id),
            external_id: self.external_id,
            name: self.name,
            sku: self.sku,
            retail_price: to_minor_units(&self.retail_price)?,
            currency: self.currency.to_ascii_uppercase(),
            size: self.size,
            color: self.color,
            image: self.product.and_then(|p| p.image),
            availability: self
                .availability_status
                .unwrap_or(VariantAvailability::Active),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawProductDetail {
    sync_product: RawSyncProduct,
    #[serde(default)]
    sync_variants: Vec<RawSyncVariant>,
}

#[derive(Debug, Deserialize)]
struct RawShippingRate {
    id: String,
    name: String,
    rate: String,
    currency: String,
    #[serde(default, rename = "minDeliveryDays")]
    min_delivery_days: Option<u32>,
    #[serde(default, rename = "maxDeliveryDays")]
    max_delivery_days: Option<u32>,
}

/// Printful REST client
#[derive(Clone, Debug)]
pub struct PrintfulClient {
    config: PrintfulConfig,
    client: reqwest::Client,
}

impl PrintfulClient {
    pub fn new(config: PrintfulConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Printful client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ServiceError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ServiceError::UpstreamAuthError("Printful API key not configured".into())
            })?;

        let mut builder = self
            .client
            .request(method, format!("{}{}", self.config.api_base, path))
            .bearer_auth(key);
        if let Some(store_id) = self.config.store_id.as_deref().filter(|s| !s.is_empty()) {
            builder = builder.header("X-PF-Store-Id", store_id);
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(
        builder: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, ServiceError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::UpstreamUnavailable(format!("Printful {} timed out", context))
            } else {
                ServiceError::UpstreamUnavailable(format!("Printful unreachable: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let envelope: Envelope<T> = response.json().await.map_err(|e| {
                ServiceError::ExternalApiError(format!(
                    "Failed to parse Printful {}: {}",
                    context, e
                ))
            })?;
            return Ok(envelope.result);
        }

        let body = response.text().await.unwrap_or_default();
        let message = vendor_error_message(&body);
        warn!(%status, "Printful {} failed: {}", context, message);
        Err(map_printful_status(status, context, message))
    }
}

fn vendor_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope
            .error
            .and_then(|e| e.message)
            .or_else(|| {
                envelope
                    .result
                    .and_then(|r| r.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

fn map_printful_status(status: StatusCode, context: &str, message: String) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ServiceError::UpstreamAuthError(format!("Printful rejected credentials: {}", message))
        }
        StatusCode::NOT_FOUND => ServiceError::NotFound(format!("Printful {}: {}", context, message)),
        StatusCode::TOO_MANY_REQUESTS => {
            ServiceError::UpstreamUnavailable(format!("Printful rate limited: {}", message))
        }
        s if s.is_server_error() => {
            ServiceError::UpstreamUnavailable(format!("Printful {}: {}", s, message))
        }
        _ => ServiceError::ExternalApiError(format!("Printful {}: {}", context, message)),
    }
}

#[async_trait]
impl FulfillmentGateway for PrintfulClient {
    #[instrument(skip(self))]
    async fn list_catalog_products(&self) -> Result<Vec<CatalogProduct>, ServiceError> {
        let raw: Vec<RawSyncProduct> =
            Self::send(self.request(reqwest::Method::GET, "/store/products")?, "product list")
                .await?;
        Ok(raw.into_iter().map(CatalogProduct::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_product_detail(&self, product_id: i64) -> Result<ProductDetail, ServiceError> {
        let raw: RawProductDetail = Self::send(
            self.request(
                reqwest::Method::GET,
                &format!("/store/products/{}", product_id),
            )?,
            "product detail",
        )
        .await?;

        let variants = raw
            .sync_variants
            .into_iter()
            .map(RawSyncVariant::into_variant)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProductDetail {
            product: raw.sync_product.into(),
            variants,
        })
    }

    #[instrument(skip(self, address, items), fields(country = %address.country_code))]
    async fn quote_shipping(
        &self,
        address: &ShippingAddress,
        items: &[ShippingQuoteItem],
        currency: &str,
    ) -> Result<Vec<ShippingOption>, ServiceError> {
        let body = json!({
            "recipient": {
                "address1": address.address1,
                "city": address.city,
                "country_code": address.country_code,
                "state_code": address.state_code,
                "zip": address.zip,
            },
            "items": items
                .iter()
                .map(|item| json!({ "variant_id": item.variant_id, "quantity": item.quantity }))
                .collect::<Vec<_>>(),
            "currency": currency,
        });

        let result: Result<Vec<RawShippingRate>, ServiceError> = Self::send(
            self.request(reqwest::Method::POST, "/shipping/rates")?.json(&body),
            "shipping rates",
        )
        .await;

        let rates = match result {
            Ok(rates) => rates,
            // Printful answers 400 for destinations it cannot ship to
            Err(ServiceError::ExternalApiError(message)) => {
                return Err(ServiceError::InvalidAddress(message))
            }
            Err(other) => return Err(other),
        };

        if rates.is_empty() {
            return Err(ServiceError::NoOptionsAvailable);
        }

        rates
            .into_iter()
            .map(|rate| {
                Ok(ShippingOption {
                    rate: to_minor_units(&rate.rate)?,
                    id: rate.id,
                    name: rate.name,
                    currency: rate.currency.to_ascii_uppercase(),
                    min_delivery_days: rate.min_delivery_days,
                    max_delivery_days: rate.max_delivery_days,
                })
            })
            .collect()
    }

    #[instrument(skip(self, spec), fields(external_id = %spec.external_id, confirm = confirm_immediately))]
    async fn create_order(
        &self,
        spec: &FulfillmentOrderSpec,
        confirm_immediately: bool,
    ) -> Result<VendorOrder, ServiceError> {
        let body = json!({
            "external_id": spec.external_id,
            "shipping": spec.shipping_method,
            "recipient": spec.recipient,
            "items": spec
                .items
                .iter()
                .map(|line| json!({ "sync_variant_id": line.variant_id, "quantity": line.quantity }))
                .collect::<Vec<_>>(),
        });

        let order: VendorOrder = Self::send(
            self.request(reqwest::Method::POST, "/orders")?
                .query(&[("confirm", confirm_immediately)])
                .json(&body),
            "order creation",
        )
        .await?;

        info!(printful_order_id = order.id, status = %order.status, "Printful order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn confirm_order(&self, vendor_order_id: i64) -> Result<VendorOrder, ServiceError> {
        let order: VendorOrder = Self::send(
            self.request(
                reqwest::Method::POST,
                &format!("/orders/{}/confirm", vendor_order_id),
            )?,
            "order confirmation",
        )
        .await?;
        info!(printful_order_id = order.id, status = %order.status, "Printful order confirmed");
        Ok(order)
    }
}
