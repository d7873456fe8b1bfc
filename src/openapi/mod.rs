use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Merch storefront backend: Printful print-on-demand catalog, Stripe Checkout,
and order tracking.

## Order lifecycle

1. `POST /checkout/session` turns a cart into a hosted Stripe Checkout Session.
2. Stripe calls `POST /webhooks/stripe` once the buyer has paid; the order is
   recorded and a Printful **draft** order is created.
3. The success page may call `POST /checkout/confirm`; it is safe to race the webhook.
4. Printful calls `POST /webhooks/printful` as the order moves through production and shipping.

## Identity

Order history is scoped to the buyer's `pubkey` and/or `email`, passed as
query parameters. Orders that do not belong to the caller are reported as not found.

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "Invalid cart state: cart is empty",
  "request_id": "4f1c…",
  "timestamp": "2025-03-09T10:30:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "checkout", description = "Cart to Stripe Checkout"),
        (name = "orders", description = "Buyer order history"),
        (name = "catalog", description = "Printful catalog and shipping quotes"),
        (name = "webhooks", description = "Stripe and Printful callbacks"),
        (name = "admin", description = "Operator endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::checkout::create_checkout_session,
        crate::handlers::checkout::confirm_checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::quote_shipping,
        crate::handlers::payment_webhooks::stripe_webhook,
        crate::handlers::printful_webhooks::printful_webhook,
        crate::handlers::admin::confirm_order,
        crate::health::health_check,
    ),
    components(
        schemas(
            crate::models::CartItem,
            crate::models::OrderLine,
            crate::models::ShippingAddress,
            crate::models::ShippingOption,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutSessionResponse,
            crate::services::checkout::ConfirmCheckoutRequest,
            crate::services::checkout::ConfirmCheckoutResponse,
            crate::services::reconciler::PaymentWebhookAck,
            crate::services::reconciler::FulfillmentWebhookAck,
            crate::services::printful_integration::CatalogProduct,
            crate::services::printful_integration::ProductDetail,
            crate::services::printful_integration::ProductVariant,
            crate::services::printful_integration::VariantAvailability,
            crate::services::printful_integration::ShippingQuoteItem,
            crate::services::order_status::OrderStatus,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderEventResponse,
            crate::handlers::orders::OrderListResponse,
            crate::handlers::orders::OrderDetailResponse,
            crate::handlers::products::ProductListResponse,
            crate::handlers::products::ShippingRatesRequest,
            crate::handlers::products::ShippingRatesResponse,
            crate::health::HealthInfo,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
