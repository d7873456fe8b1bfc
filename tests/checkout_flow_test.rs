//! Integration tests for the checkout flow.
//!
//! Tests cover:
//! - Cart → Stripe Checkout Session with metadata
//! - Cart validation failures
//! - Success-page confirmation and its interplay with the webhook

mod common;

use common::{
    buyer_address, response_json, stripe_event, TestApp, BUYER_EMAIL, BUYER_PUBKEY,
};
use rstest::rstest;
use serde_json::{json, Value};

fn cart_request() -> Value {
    json!({
        "items": [
            { "variantId": 4011, "name": "Protocol Tee / M", "quantity": 1, "price": 2000,
              "image": "https://files.example/tee-m.png" },
            { "variantId": 4012, "name": "Protocol Tee / L", "quantity": 1, "price": 1500 }
        ],
        "shipping": {
            "id": "STANDARD",
            "name": "Flat Rate (3-4 business days)",
            "rate": 500,
            "currency": "USD"
        },
        "shippingAddress": buyer_address(),
        "pubkey": BUYER_PUBKEY
    })
}

/// Creates a session through the API and marks it paid, as Stripe would after payment.
async fn paid_checkout(app: &TestApp) -> String {
    let response = app
        .post_json("/api/v1/checkout/session", cart_request())
        .await;
    assert_eq!(response.status(), 200);
    let session_id = response_json(response).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    let mut session = app.payments.session(&session_id).unwrap();
    session.payment_status = "paid".into();
    session.status = Some("complete".into());
    session.amount_total = Some(4000);
    app.payments.insert_session(session);
    session_id
}

#[tokio::test]
async fn cart_becomes_checkout_session() {
    let app = TestApp::new().await;

    let response = app
        .post_json("/api/v1/checkout/session", cart_request())
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["sessionId"], "cs_test_fake_1");
    assert!(body["url"].as_str().unwrap().starts_with("https://"));

    let created = app.payments.created();
    assert_eq!(created.len(), 1);
    let session = &created[0];
    assert_eq!(session.line_items.len(), 2);
    assert_eq!(session.line_items[0].unit_amount, 2000);
    assert_eq!(session.shipping_line_item.name, "Shipping: Flat Rate (3-4 business days)");
    assert_eq!(session.shipping_line_item.unit_amount, 500);
    assert_eq!(session.currency, "USD");
    assert_eq!(session.customer_email.as_deref(), Some(BUYER_EMAIL));
    assert_eq!(
        session.success_url,
        "https://shop.example.org/store/success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(session.cancel_url, "https://shop.example.org/store/cart");

    assert_eq!(session.metadata["items"], "[[4011,1],[4012,1]]");
    assert_eq!(session.metadata["shipping_method"], "STANDARD");
    assert_eq!(session.metadata["shipping_cost"], "500");
    assert_eq!(session.metadata["subtotal"], "3500");
    assert_eq!(session.metadata["pubkey"], BUYER_PUBKEY);
    assert!(session.metadata["shipping_address"].contains("Analytical"));

    // Nothing is recorded until payment is confirmed
    assert_eq!(app.order_count().await, 0);
}

#[rstest]
#[case::empty_cart(|cart: &mut Value| cart["items"] = json!([]))]
#[case::zero_quantity(|cart: &mut Value| cart["items"][0]["quantity"] = json!(0))]
#[case::no_shipping(|cart: &mut Value| cart["shipping"] = Value::Null)]
#[case::no_address(|cart: &mut Value| cart["shippingAddress"] = Value::Null)]
#[case::blank_city(|cart: &mut Value| cart["shippingAddress"]["city"] = json!("  "))]
#[case::currency_mismatch(|cart: &mut Value| cart["shipping"]["currency"] = json!("EUR"))]
#[case::country_not_served(|cart: &mut Value| cart["shippingAddress"]["country_code"] = json!("AQ"))]
#[case::bad_email(|cart: &mut Value| cart["email"] = json!("not-an-email"))]
#[tokio::test]
async fn invalid_carts_are_rejected(#[case] break_cart: fn(&mut Value)) {
    let app = TestApp::new().await;
    let mut cart = cart_request();
    break_cart(&mut cart);

    let response = app.post_json("/api/v1/checkout/session", cart).await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Bad Request");
    assert!(app.payments.created().is_empty());
}

#[tokio::test]
async fn confirmation_creates_draft_and_marks_session() {
    let app = TestApp::new().await;
    let session_id = paid_checkout(&app).await;

    let response = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "printful_draft");
    assert_eq!(body["printfulOrderId"], 90001);
    assert!(body.get("alreadyProcessed").is_none());

    let updates = app.payments.metadata_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, session_id);
    assert_eq!(updates[0].1["printful_order_id"], "90001");

    // Typed-in address is all this session has
    let (spec, confirm) = &app.fulfillment.orders()[0];
    assert!(!confirm);
    assert_eq!(spec.recipient.city, "Portland");

    let order = app.order_for_session(&session_id).await;
    assert_eq!(order.total, 4000);
    assert_eq!(order.subtotal, 3500);
    let detail = app
        .get(&format!("/api/v1/orders/{}?pubkey={}", order.id, BUYER_PUBKEY))
        .await;
    let detail = response_json(detail).await;
    assert_eq!(detail["events"][0]["source"], "checkout_confirm");
}

#[tokio::test]
async fn second_confirmation_is_already_processed() {
    let app = TestApp::new().await;
    let session_id = paid_checkout(&app).await;

    let first = response_json(
        app.post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
            .await,
    )
    .await;
    let response = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["alreadyProcessed"], true);
    assert_eq!(body["printfulOrderId"], 90001);
    assert_eq!(body["orderId"], first["orderId"]);
    assert_eq!(body["status"], "printful_draft");

    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.fulfillment.orders().len(), 1);
}

#[tokio::test]
async fn webhook_after_confirmation_is_a_duplicate() {
    let app = TestApp::new().await;
    let session_id = paid_checkout(&app).await;
    app.post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
        .await;

    let session = serde_json::to_value(app.payments.session(&session_id).unwrap()).unwrap();
    let response = app
        .post_stripe_event(&stripe_event("checkout.session.completed", session))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await["duplicate"], true);
    assert_eq!(app.fulfillment.orders().len(), 1);
}

#[tokio::test]
async fn confirmation_after_webhook_reports_existing_order() {
    let app = TestApp::new().await;
    let session_id = paid_checkout(&app).await;

    let session = serde_json::to_value(app.payments.session(&session_id).unwrap()).unwrap();
    let webhook = app
        .post_stripe_event(&stripe_event("checkout.session.completed", session))
        .await;
    let webhook = response_json(webhook).await;

    let response = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["alreadyProcessed"], true);
    assert_eq!(body["orderId"], webhook["orderId"]);
    assert_eq!(app.fulfillment.orders().len(), 1);
}

#[tokio::test]
async fn unpaid_or_unknown_sessions_cannot_be_confirmed() {
    let app = TestApp::new().await;
    let response = app
        .post_json("/api/v1/checkout/session", cart_request())
        .await;
    let session_id = response_json(response).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    let unpaid = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
        .await;
    assert_eq!(unpaid.status(), 400);

    let unknown = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": "cs_test_nope" }))
        .await;
    assert_eq!(unknown.status(), 404);

    let blank = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": "" }))
        .await;
    assert_eq!(blank.status(), 400);

    // Session ids are placed in Stripe request paths
    let traversal = app
        .post_json(
            "/api/v1/checkout/confirm",
            json!({ "sessionId": "../../customers/cus_x" }),
        )
        .await;
    assert_eq!(traversal.status(), 400);

    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn vendor_failure_on_confirmation_is_reported() {
    let app = TestApp::new().await;
    let session_id = paid_checkout(&app).await;
    app.fulfillment.fail_orders(true);

    let response = app
        .post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
        .await;
    assert_eq!(response.status(), 502);
    assert_eq!(app.order_for_session(&session_id).await.status, "failed");
    assert!(app.payments.metadata_updates().is_empty());
}

#[tokio::test]
async fn retried_confirmation_after_vendor_failure_still_fails() {
    let app = TestApp::new().await;
    let session_id = paid_checkout(&app).await;
    app.fulfillment.fail_orders(true);

    for _ in 0..2 {
        let response = app
            .post_json("/api/v1/checkout/confirm", json!({ "sessionId": session_id }))
            .await;
        assert_eq!(response.status(), 502);
        let body = response_json(response).await;
        assert!(body.get("success").is_none());
    }

    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.order_for_session(&session_id).await.status, "failed");
    assert!(app.payments.metadata_updates().is_empty());
}
