//! `HttpPaymentGateway` against a wiremock gateway.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::time::Duration;

use rental_core::gateway::{GatewayError, GatewayStatus, InitializeRequest, PaymentGateway};
use rental_core::types::{Currency, GatewayReference, Money, PaymentChannel};
use rental_gateway::{GatewayConfig, HttpPaymentGateway};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "sk_test_123";

fn client(server: &MockServer) -> HttpPaymentGateway {
    HttpPaymentGateway::new(GatewayConfig {
        base_url: server.uri(),
        secret_key: SECRET.into(),
        timeout: Duration::from_millis(500),
    })
    .unwrap()
}

fn request() -> InitializeRequest {
    InitializeRequest {
        amount: Money::from_minor(300_000),
        currency: Currency::ngn(),
        email: "renter@example.com".into(),
        callback_url: Some("https://rentals.example.com/payments/callback".into()),
        metadata: json!({"booking_id": "5b0c"}),
    }
}

fn reference() -> GatewayReference {
    GatewayReference::parse("T12345").unwrap()
}

#[tokio::test]
async fn test_initialize_sends_bearer_and_minor_amount() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", format!("Bearer {SECRET}").as_str()))
        .and(body_partial_json(json!({
            "amount": 300_000,
            "currency": "NGN",
            "email": "renter@example.com",
            "metadata": {"booking_id": "5b0c"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.example.com/abc",
                "access_code": "abc",
                "reference": "T12345"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client(&server).initialize(request()).await.unwrap();
    assert_eq!(session.reference, reference());
    assert_eq!(session.authorization_url, "https://checkout.example.com/abc");
    assert_eq!(session.access_code, "abc");
}

#[tokio::test]
async fn test_verify_maps_successful_transaction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/T12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "reference": "T12345",
                "status": "success",
                "amount": 300_000,
                "currency": "NGN",
                "paid_at": "2024-05-20T12:10:00.000Z",
                "channel": "bank_transfer",
                "gateway_response": "Successful"
            }
        })))
        .mount(&server)
        .await;

    let verification = client(&server).verify(&reference()).await.unwrap();
    assert_eq!(verification.status, GatewayStatus::Success);
    assert_eq!(verification.amount, Money::from_minor(300_000));
    assert_eq!(verification.channel, Some(PaymentChannel::BankTransfer));
    assert!(verification.paid_at.is_some());
}

#[tokio::test]
async fn test_verify_keeps_abandoned_checkout_pending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/T12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "reference": "T12345",
                "status": "abandoned",
                "amount": 300_000,
                "currency": "NGN",
                "paid_at": null,
                "channel": "card",
                "gateway_response": "The transaction was not completed"
            }
        })))
        .mount(&server)
        .await;

    let verification = client(&server).verify(&reference()).await.unwrap();
    assert_eq!(verification.status, GatewayStatus::Pending);
    assert!(verification.paid_at.is_none());
}

#[tokio::test]
async fn test_server_errors_and_throttling_are_unavailable() {
    for status in [500, 502, 503, 429] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string("upstream trouble"))
            .mount(&server)
            .await;

        let err = client(&server).verify(&reference()).await.unwrap_err();
        assert!(err.is_transient(), "status {status} gave {err:?}");
        assert!(matches!(err, GatewayError::Unavailable(ref message) if message.contains("upstream trouble")));
    }
}

#[tokio::test]
async fn test_client_errors_are_rejected_with_gateway_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": false,
            "message": "Invalid email address"
        })))
        .mount(&server)
        .await;

    let err = client(&server).initialize(request()).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Rejected {
            status: 400,
            message: "Invalid email address".into()
        }
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_malformed_bodies_are_invalid_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/T12345"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": false,
            "message": "Duplicate Transaction Reference"
        })))
        .mount(&server)
        .await;

    let gateway = client(&server);
    assert!(matches!(
        gateway.verify(&reference()).await,
        Err(GatewayError::InvalidResponse(_))
    ));
    assert_eq!(
        gateway.initialize(request()).await.unwrap_err(),
        GatewayError::InvalidResponse("Duplicate Transaction Reference".into())
    );
}

#[tokio::test]
async fn test_timeout_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = client(&server).verify(&reference()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn test_unreachable_gateway_is_unavailable() {
    let server = MockServer::start().await;
    let gateway = client(&server);
    drop(server);

    let err = gateway.verify(&reference()).await.unwrap_err();
    assert!(err.is_transient());
}
