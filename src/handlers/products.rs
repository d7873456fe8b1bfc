use crate::handlers::common::validate_input;
use crate::{
    errors::ServiceError,
    models::{ShippingAddress, ShippingOption},
    services::printful_integration::{CatalogProduct, ProductDetail, ShippingQuoteItem},
    AppState,
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const MAX_QUOTE_ITEMS: usize = 50;

/// Creates the router for catalog and shipping endpoints
pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/shipping/rates", post(quote_shipping))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<CatalogProduct>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ShippingRatesRequest {
    pub address: ShippingAddress,
    pub items: Vec<ShippingQuoteItem>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingRatesResponse {
    pub options: Vec<ShippingOption>,
}

/// List products synced to the Printful store
#[utoipa::path(
    get,
    path = "/api/v1/products",
    summary = "List products",
    responses(
        (status = 200, description = "Catalog", body = ProductListResponse),
        (status = 502, description = "Printful unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<ProductListResponse>, ServiceError> {
    let products = state.services.fulfillment.list_catalog_products().await?;
    Ok(Json(ProductListResponse { products }))
}

/// Product with its purchasable variants
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    summary = "Get product",
    params(("id" = i64, Path, description = "Printful sync product ID")),
    responses(
        (status = 200, description = "Product detail", body = ProductDetail),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Printful unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductDetail>, ServiceError> {
    let detail = state.services.fulfillment.get_product_detail(id).await?;
    Ok(Json(detail))
}

/// Quote shipping for a destination and a set of catalog variants
#[utoipa::path(
    post,
    path = "/api/v1/shipping/rates",
    summary = "Quote shipping",
    request_body = ShippingRatesRequest,
    responses(
        (status = 200, description = "Shipping options, cheapest first as Printful orders them", body = ShippingRatesResponse),
        (status = 400, description = "Address rejected or no options", body = crate::errors::ErrorResponse),
        (status = 502, description = "Printful unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn quote_shipping(
    State(state): State<AppState>,
    Json(payload): Json<ShippingRatesRequest>,
) -> Result<Json<ShippingRatesResponse>, ServiceError> {
    if payload.items.is_empty() || payload.items.len() > MAX_QUOTE_ITEMS {
        return Err(ServiceError::ValidationError(format!(
            "between 1 and {} items are required",
            MAX_QUOTE_ITEMS
        )));
    }
    if payload.items.iter().any(|item| item.quantity == 0) {
        return Err(ServiceError::ValidationError(
            "item quantities must be positive".into(),
        ));
    }

    let address = payload.address.normalized();
    validate_input(&address)?;
    if !state
        .config
        .shipping_countries()
        .contains(&address.country_code)
    {
        return Err(ServiceError::InvalidAddress(format!(
            "we do not ship to {}",
            address.country_code
        )));
    }

    let currency = payload
        .currency
        .unwrap_or_else(|| state.config.default_currency.clone())
        .to_ascii_uppercase();
    let options = state
        .services
        .fulfillment
        .quote_shipping(&address, &payload.items, &currency)
        .await?;
    Ok(Json(ShippingRatesResponse { options }))
}
