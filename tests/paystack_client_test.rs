//! Paystack client tests against a mock HTTP server.

use assert_matches::assert_matches;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storefront_api::config::PaystackConfig;
use storefront_api::errors::ServiceError;
use storefront_api::gateway::{
    ChargeStatus, InitializeRequest, PaymentGateway, PaystackClient,
};

fn client_for(server: &MockServer) -> PaystackClient {
    PaystackClient::new(&PaystackConfig {
        secret_key: "sk_test_abc".to_string(),
        webhook_secret: None,
        base_url: server.uri(),
        timeout_secs: 5,
        callback_url: None,
    })
    .expect("client builds")
}

fn initialize_request() -> InitializeRequest {
    InitializeRequest {
        email: "ada@example.com".to_string(),
        amount_minor: 6_480_000,
        reference: "PSK-1700000000000-a1b2c3d4".to_string(),
        currency: "NGN".to_string(),
        callback_url: None,
        metadata: serde_json::json!({"order_number": "ORD-20240601120000-0001"}),
    }
}

#[tokio::test]
async fn initialize_returns_the_hosted_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", "Bearer sk_test_abc"))
        .and(body_partial_json(serde_json::json!({
            "email": "ada@example.com",
            "amount": 6_480_000,
            "reference": "PSK-1700000000000-a1b2c3d4",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.paystack.com/0peioxfhpn",
                "access_code": "0peioxfhpn",
                "reference": "PSK-1700000000000-a1b2c3d4"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client_for(&server)
        .initialize_transaction(&initialize_request())
        .await
        .expect("initialize succeeds");

    assert_eq!(
        session.authorization_url,
        "https://checkout.paystack.com/0peioxfhpn"
    );
    assert_eq!(session.access_code, "0peioxfhpn");
    assert_eq!(session.reference, "PSK-1700000000000-a1b2c3d4");
}

#[tokio::test]
async fn false_status_envelope_is_a_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": false,
            "message": "Invalid key"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .initialize_transaction(&initialize_request())
        .await
        .unwrap_err();

    match err {
        ServiceError::GatewayError(msg) => assert!(msg.contains("Invalid key")),
        other => panic!("expected GatewayError, got {other:?}"),
    }
}

#[tokio::test]
async fn http_error_is_a_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .initialize_transaction(&initialize_request())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GatewayError(_));
}

#[tokio::test]
async fn verify_maps_a_successful_charge() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PSK-1700000000000-a1b2c3d4"))
        .and(header("authorization", "Bearer sk_test_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "id": 4099260516u64,
                "status": "success",
                "reference": "PSK-1700000000000-a1b2c3d4",
                "amount": 6_480_000,
                "currency": "NGN",
                "channel": "card",
                "paid_at": "2024-06-01T12:30:45Z",
                "authorization": {"brand": "visa", "last4": "4081"}
            }
        })))
        .mount(&server)
        .await;

    let charge = client_for(&server)
        .verify_transaction("PSK-1700000000000-a1b2c3d4")
        .await
        .expect("verify succeeds");

    assert_eq!(charge.status, ChargeStatus::Success);
    assert_eq!(charge.transaction_id.as_deref(), Some("4099260516"));
    assert_eq!(charge.amount_minor, 6_480_000);
    assert_eq!(charge.card_brand.as_deref(), Some("visa"));
    assert_eq!(charge.card_last4.as_deref(), Some("4081"));
}

#[tokio::test]
async fn verify_maps_an_abandoned_charge() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PSK-x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": true,
            "data": {
                "id": 1u64,
                "status": "abandoned",
                "reference": "PSK-x",
                "amount": 100,
                "currency": "NGN"
            }
        })))
        .mount(&server)
        .await;

    let charge = client_for(&server)
        .verify_transaction("PSK-x")
        .await
        .expect("verify succeeds");
    assert_eq!(charge.status, ChargeStatus::Abandoned);
    assert!(charge.paid_at.is_none());
}

#[tokio::test]
async fn refund_posts_the_transaction_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refund"))
        .and(body_partial_json(
            serde_json::json!({"transaction": "4099260516"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": true,
            "data": {"id": 90210u64, "status": "processed"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .create_refund("4099260516")
        .await
        .expect("refund succeeds");

    assert_eq!(outcome.refund_id, "90210");
    assert_eq!(outcome.status, "processed");
}
