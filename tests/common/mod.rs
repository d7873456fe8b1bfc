#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{order, order_event},
    errors::ServiceError,
    handlers::AppServices,
    models::{OrderLine, ShippingAddress, ShippingOption},
    services::printful_integration::{
        CatalogProduct, FulfillmentGateway, FulfillmentOrderSpec, ProductDetail, ProductVariant,
        ShippingQuoteItem, VariantAvailability, VendorOrder,
    },
    services::session_metadata::CheckoutMetadata,
    services::stripe_integration::{
        signature_header, CheckoutSession, CreatedCheckoutSession, NewCheckoutSession,
        PaymentGateway,
    },
    AppState,
};
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_storefront";
pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const BUYER_PUBKEY: &str = "npub1buyerpubkey";
pub const BUYER_EMAIL: &str = "ada@example.org";

/// Stripe stand-in that keeps sessions in memory.
#[derive(Default)]
pub struct InMemoryPaymentGateway {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    created: Mutex<Vec<NewCheckoutSession>>,
    metadata_updates: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl InMemoryPaymentGateway {
    pub fn insert_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn session(&self, id: &str) -> Option<CheckoutSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn created(&self) -> Vec<NewCheckoutSession> {
        self.created.lock().unwrap().clone()
    }

    pub fn metadata_updates(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.metadata_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CreatedCheckoutSession, ServiceError> {
        let mut created = self.created.lock().unwrap();
        created.push(session.clone());
        let id = format!("cs_test_fake_{}", created.len());
        let url = format!("https://checkout.stripe.test/c/pay/{}", id);

        let stored = CheckoutSession {
            id: id.clone(),
            url: Some(url.clone()),
            status: Some("open".into()),
            payment_status: "unpaid".into(),
            payment_intent: None,
            amount_subtotal: None,
            amount_total: None,
            currency: Some(session.currency.to_ascii_lowercase()),
            livemode: false,
            customer_email: session.customer_email.clone(),
            customer_details: None,
            shipping_details: None,
            collected_information: None,
            metadata: session.metadata.clone(),
            total_details: None,
        };
        self.sessions.lock().unwrap().insert(id.clone(), stored);

        Ok(CreatedCheckoutSession { id, url: Some(url) })
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
        _expand: &[&str],
    ) -> Result<CheckoutSession, ServiceError> {
        self.session(session_id)
            .ok_or_else(|| ServiceError::NotFound(format!("checkout session {}", session_id)))
    }

    async fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ServiceError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ServiceError::NotFound(format!("checkout session {}", session_id)))?;
        session
            .metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.metadata_updates
            .lock()
            .unwrap()
            .push((session_id.to_string(), metadata.clone()));
        Ok(())
    }
}

/// Printful stand-in that records every order it is asked to create.
pub struct InMemoryFulfillmentGateway {
    next_id: AtomicI64,
    fail_orders: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    orders: Mutex<Vec<(FulfillmentOrderSpec, bool)>>,
    confirmed: Mutex<Vec<i64>>,
}

impl Default for InMemoryFulfillmentGateway {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(90_001),
            fail_orders: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            orders: Mutex::new(Vec::new()),
            confirmed: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryFulfillmentGateway {
    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn delay_orders(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn orders(&self) -> Vec<(FulfillmentOrderSpec, bool)> {
        self.orders.lock().unwrap().clone()
    }

    pub fn confirmed(&self) -> Vec<i64> {
        self.confirmed.lock().unwrap().clone()
    }
}

#[async_trait]
impl FulfillmentGateway for InMemoryFulfillmentGateway {
    async fn list_catalog_products(&self) -> Result<Vec<CatalogProduct>, ServiceError> {
        Ok(vec![CatalogProduct {
            id: 301,
            external_id: Some("protocol-tee".into()),
            name: "Protocol Tee".into(),
            variants: 2,
            synced: 2,
            thumbnail_url: Some("https://files.example/tee.png".into()),
        }])
    }

    async fn get_product_detail(&self, product_id: i64) -> Result<ProductDetail, ServiceError> {
        let products = self.list_catalog_products().await?;
        let product = products
            .into_iter()
            .find(|p| p.id == product_id)
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))?;
        Ok(ProductDetail {
            product,
            variants: vec![ProductVariant {
                id: 4011,
                catalog_variant_id: Some(4011),
                external_id: None,
                name: "Protocol Tee / M".into(),
                sku: Some("TEE-M".into()),
                retail_price: 2000,
                currency: "USD".into(),
                size: Some("M".into()),
                color: Some("Black".into()),
                image: None,
                availability: VariantAvailability::Active,
            }],
        })
    }

    async fn quote_shipping(
        &self,
        address: &ShippingAddress,
        _items: &[ShippingQuoteItem],
        currency: &str,
    ) -> Result<Vec<ShippingOption>, ServiceError> {
        if address.country_code == "AQ" {
            return Err(ServiceError::NoOptionsAvailable);
        }
        Ok(vec![standard_shipping_in(currency)])
    }

    async fn create_order(
        &self,
        spec: &FulfillmentOrderSpec,
        confirm_immediately: bool,
    ) -> Result<VendorOrder, ServiceError> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ServiceError::UpstreamUnavailable(
                "Printful returned 503".into(),
            ));
        }
        self.orders
            .lock()
            .unwrap()
            .push((spec.clone(), confirm_immediately));
        Ok(VendorOrder {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            external_id: Some(spec.external_id.clone()),
            status: if confirm_immediately { "pending" } else { "draft" }.into(),
        })
    }

    async fn confirm_order(&self, vendor_order_id: i64) -> Result<VendorOrder, ServiceError> {
        self.confirmed.lock().unwrap().push(vendor_order_id);
        Ok(VendorOrder {
            id: vendor_order_id,
            external_id: None,
            status: "pending".into(),
        })
    }
}

pub fn standard_shipping_in(currency: &str) -> ShippingOption {
    ShippingOption {
        id: "STANDARD".into(),
        name: "Flat Rate (3-4 business days)".into(),
        rate: 500,
        currency: currency.to_ascii_uppercase(),
        min_delivery_days: Some(3),
        max_delivery_days: Some(4),
    }
}

pub fn buyer_address() -> ShippingAddress {
    ShippingAddress {
        name: "Ada Lovelace".into(),
        address1: "12 Analytical Way".into(),
        address2: None,
        city: "Portland".into(),
        state_code: Some("OR".into()),
        country_code: "US".into(),
        zip: "97201".into(),
        phone: None,
        email: Some(BUYER_EMAIL.into()),
    }
}

/// Metadata exactly as checkout writes it for a two-line cart:
/// 2000 + 1500 of merchandise plus 500 shipping.
pub fn cart_metadata() -> BTreeMap<String, String> {
    CheckoutMetadata {
        lines: vec![
            OrderLine {
                variant_id: 4011,
                quantity: 1,
            },
            OrderLine {
                variant_id: 4012,
                quantity: 1,
            },
        ],
        shipping_method: "STANDARD".into(),
        shipping_cost: 500,
        subtotal: 3500,
        address: Some(buyer_address()),
        pubkey: Some(BUYER_PUBKEY.into()),
        printful_order_id: None,
    }
    .encode()
    .expect("cart metadata fits Stripe limits")
}

/// A paid Checkout Session as Stripe sends it, with the buyer's address
/// collected by Stripe.
pub fn paid_session_json(session_id: &str) -> Value {
    json!({
        "id": session_id,
        "object": "checkout.session",
        "status": "complete",
        "payment_status": "paid",
        "payment_intent": "pi_test_123",
        "amount_subtotal": 4000,
        "amount_total": 4000,
        "currency": "usd",
        "livemode": false,
        "customer_email": null,
        "customer_details": {
            "email": BUYER_EMAIL,
            "name": "Ada Lovelace",
            "phone": null,
            "address": {
                "line1": "12 Analytical Way",
                "line2": null,
                "city": "Portland",
                "state": "OR",
                "postal_code": "97201",
                "country": "US"
            }
        },
        "collected_information": {
            "shipping_details": {
                "name": "Ada Lovelace",
                "address": {
                    "line1": "12 Analytical Way",
                    "line2": "Apt 3",
                    "city": "Portland",
                    "state": "OR",
                    "postal_code": "97201",
                    "country": "US"
                }
            }
        },
        "metadata": cart_metadata(),
        "total_details": { "amount_tax": 0, "amount_shipping": 0, "amount_discount": 0 }
    })
}

pub fn paid_session(session_id: &str) -> CheckoutSession {
    serde_json::from_value(paid_session_json(session_id)).expect("valid checkout session")
}

pub fn stripe_event(event_type: &str, object: Value) -> Value {
    json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "object": "event",
        "type": event_type,
        "created": Utc::now().timestamp(),
        "livemode": false,
        "data": { "object": object }
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Application wired to in-memory vendors and an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub payments: Arc<InMemoryPaymentGateway>,
    pub fulfillment: Arc<InMemoryFulfillmentGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "https://shop.example.org".to_string(),
            "test".to_string(),
        );
        // One connection, or every query would see its own empty in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_secret_key = Some("sk_test_storefront".into());
        cfg.stripe_webhook_secret = Some(WEBHOOK_SECRET.into());
        cfg.printful_api_key = Some("pf_test_token".into());
        cfg.admin_api_token = Some(ADMIN_TOKEN.into());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let payments = Arc::new(InMemoryPaymentGateway::default());
        let fulfillment = Arc::new(InMemoryFulfillmentGateway::default());
        let services =
            AppServices::new(db_arc.clone(), &cfg, payments.clone(), fulfillment.clone());

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            payments,
            fulfillment,
        }
    }

    /// Send a request against the router with optional JSON body and extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri, None, &[]).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.request(Method::POST, uri, Some(body), &[]).await
    }

    /// Posts raw bytes, exactly as given, with the given headers.
    pub async fn post_raw(&self, uri: &str, payload: Vec<u8>, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(payload))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts raw bytes to the Stripe webhook with the given signature header.
    pub async fn post_stripe_raw(&self, payload: Vec<u8>, signature: Option<&str>) -> Response {
        match signature {
            Some(signature) => {
                self.post_raw(
                    "/api/v1/webhooks/stripe",
                    payload,
                    &[("stripe-signature", signature)],
                )
                .await
            }
            None => self.post_raw("/api/v1/webhooks/stripe", payload, &[]).await,
        }
    }

    /// Posts `event` to the Stripe webhook, signed with the test secret.
    pub async fn post_stripe_event(&self, event: &Value) -> Response {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let signature = signature_header(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        self.post_stripe_raw(payload, Some(&signature)).await
    }

    pub async fn post_printful_event(&self, event: Value) -> Response {
        self.post_json("/api/v1/webhooks/printful", event).await
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(self.state.db.as_ref())
            .await
            .expect("count orders")
    }

    pub async fn event_count(&self) -> u64 {
        order_event::Entity::find()
            .count(self.state.db.as_ref())
            .await
            .expect("count order events")
    }

    /// Delivers a paid `checkout.session.completed` for `session_id` and
    /// returns the order it produced.
    pub async fn drafted_order(&self, session_id: &str) -> order::Model {
        let event = stripe_event("checkout.session.completed", paid_session_json(session_id));
        let response = self.post_stripe_event(&event).await;
        assert_eq!(response.status(), 200, "webhook should be accepted");
        self.order_for_session(session_id).await
    }

    /// Puts the session's order back into an unfinished `pending` claim last
    /// written `age` ago, as if its delivery died before Printful answered.
    pub async fn abandon_claim(&self, session_id: &str, age: chrono::Duration) {
        order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value("pending"))
            .col_expr(order::Column::PrintfulOrderId, Expr::value(Option::<i64>::None))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now() - age))
            .filter(order::Column::StripeSessionId.eq(session_id))
            .exec(self.state.db.as_ref())
            .await
            .expect("rewind order to a pending claim");
    }

    pub async fn order_for_session(&self, session_id: &str) -> order::Model {
        self.state
            .services
            .orders
            .find_order_by_session(session_id)
            .await
            .expect("query order")
            .expect("order exists")
    }
}
