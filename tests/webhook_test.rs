//! Webhook endpoint tests: signature gating, event handling, and the
//! webhook-vs-verify confirmation race.

mod common;

use axum::http::{Method, StatusCode};
use common::{assert_status, response_json, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

use storefront_api::entities::{customer::CustomerRole, order, Order, Payment, Product};
use storefront_api::gateway::sign_payload;

fn shipping_address() -> serde_json::Value {
    json!({
        "name": "Ada Obi",
        "line1": "14 Marina Road",
        "city": "Lagos",
        "state": "Lagos",
        "country": "NG"
    })
}

/// Seed a customer + product, place an order and hand back (reference, token,
/// product id).
async fn pending_order(app: &TestApp) -> (String, String, uuid::Uuid) {
    let (_, token) = app
        .seed_customer("web@example.com", CustomerRole::Customer)
        .await;
    let lamp = app.seed_product("Desk Lamp", dec!(10000), 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(json!({
                "items": [{"product_id": lamp.id, "quantity": 2}],
                "shipping_address": shipping_address(),
            })),
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    let body = response_json(response).await;
    let reference = body["order"]["payment_reference"]
        .as_str()
        .unwrap()
        .to_string();
    (reference, token, lamp.id)
}

fn charge_success_body(reference: &str) -> String {
    json!({
        "event": "charge.success",
        "data": {
            "id": 4099260516u64,
            "status": "success",
            "reference": reference,
            "amount": 2_160_000,
            "currency": "NGN",
            "channel": "card",
            "paid_at": "2024-06-01T12:30:45Z",
            "authorization": {"brand": "visa", "last4": "4081"}
        }
    })
    .to_string()
}

#[tokio::test]
async fn bad_signature_is_rejected_with_no_database_writes() {
    let app = TestApp::new().await;
    let (reference, _, _) = pending_order(&app).await;
    let body = charge_success_body(&reference);

    // Missing header.
    let response = app.post_webhook(&body, None).await;
    assert_status(&response, StatusCode::FORBIDDEN);

    // Wrong signature.
    let response = app.post_webhook(&body, Some("deadbeef")).await;
    assert_status(&response, StatusCode::FORBIDDEN);

    // Signature from another secret.
    let forged = sign_payload("some_other_secret", body.as_bytes());
    let response = app.post_webhook(&body, Some(&forged)).await;
    assert_status(&response, StatusCode::FORBIDDEN);

    // Zero writes happened: the order is still pending and no payment row
    // exists.
    let db_order = Order::find()
        .filter(order::Column::PaymentReference.eq(reference.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_order.payment_status, order::PaymentStatus::Pending);
    assert_eq!(Payment::find().count(&*app.state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn signed_charge_success_confirms_the_order() {
    let app = TestApp::new().await;
    let (reference, _, product_id) = pending_order(&app).await;
    let body = charge_success_body(&reference);
    let signature = sign_payload(WEBHOOK_SECRET, body.as_bytes());

    let response = app.post_webhook(&body, Some(&signature)).await;
    assert_status(&response, StatusCode::OK);
    let ack = response_json(response).await;
    assert_eq!(ack["status"], "ok");

    let db_order = Order::find()
        .filter(order::Column::PaymentReference.eq(reference.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_order.status, order::OrderStatus::Confirmed);
    assert_eq!(db_order.payment_status, order::PaymentStatus::Completed);

    let db_product = Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_product.stock_quantity, 3);
}

#[tokio::test]
async fn replayed_webhook_applies_side_effects_once() {
    let app = TestApp::new().await;
    let (reference, _, product_id) = pending_order(&app).await;
    let body = charge_success_body(&reference);
    let signature = sign_payload(WEBHOOK_SECRET, body.as_bytes());

    for _ in 0..3 {
        let response = app.post_webhook(&body, Some(&signature)).await;
        assert_status(&response, StatusCode::OK);
    }

    let db_product = Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_product.stock_quantity, 3);
    assert_eq!(Payment::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn webhook_and_verify_race_settles_exactly_once() {
    let app = TestApp::new().await;
    let (reference, token, product_id) = pending_order(&app).await;

    // Webhook lands first...
    let body = charge_success_body(&reference);
    let signature = sign_payload(WEBHOOK_SECRET, body.as_bytes());
    let response = app.post_webhook(&body, Some(&signature)).await;
    assert_status(&response, StatusCode::OK);

    // ...then the customer's browser comes back and verifies. Both report
    // success; only one applied effects.
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders/verify",
            Some(&token),
            Some(json!({"reference": reference})),
        )
        .await;
    assert_status(&response, StatusCode::OK);

    let db_product = Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_product.stock_quantity, 3);
    assert_eq!(Payment::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn charge_failed_marks_a_pending_order_failed() {
    let app = TestApp::new().await;
    let (reference, _, _) = pending_order(&app).await;

    let body = json!({
        "event": "charge.failed",
        "data": {
            "reference": reference,
            "gateway_response": "Insufficient funds"
        }
    })
    .to_string();
    let signature = sign_payload(WEBHOOK_SECRET, body.as_bytes());

    let response = app.post_webhook(&body, Some(&signature)).await;
    assert_status(&response, StatusCode::OK);

    let db_order = Order::find()
        .filter(order::Column::PaymentReference.eq(reference.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_order.payment_status, order::PaymentStatus::Failed);
    assert_eq!(db_order.status, order::OrderStatus::Pending);
}

#[tokio::test]
async fn charge_failed_never_downgrades_a_settled_order() {
    let app = TestApp::new().await;
    let (reference, _, _) = pending_order(&app).await;

    let success = charge_success_body(&reference);
    let signature = sign_payload(WEBHOOK_SECRET, success.as_bytes());
    app.post_webhook(&success, Some(&signature)).await;

    // A late/out-of-order failure event for the same reference.
    let failed = json!({
        "event": "charge.failed",
        "data": {"reference": reference}
    })
    .to_string();
    let signature = sign_payload(WEBHOOK_SECRET, failed.as_bytes());
    let response = app.post_webhook(&failed, Some(&signature)).await;
    assert_status(&response, StatusCode::OK);

    let db_order = Order::find()
        .filter(order::Column::PaymentReference.eq(reference.as_str()))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db_order.payment_status, order::PaymentStatus::Completed);
}

#[tokio::test]
async fn unhandled_events_are_acknowledged() {
    let app = TestApp::new().await;
    let body = json!({"event": "subscription.create", "data": {}}).to_string();
    let signature = sign_payload(WEBHOOK_SECRET, body.as_bytes());

    let response = app.post_webhook(&body, Some(&signature)).await;
    assert_status(&response, StatusCode::OK);
}
