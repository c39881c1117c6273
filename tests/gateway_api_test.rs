//! HTTP-level gateway client tests against a local mock server.

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kangan_api::config::{RazorpayConfig, ShiprocketConfig, StripeConfig};
use kangan_api::errors::ServiceError;
use kangan_api::services::payments::{RazorpayGateway, StripeGateway};
use kangan_api::services::shiprocket::{
    LogisticsProvider, PaymentCollection, ShipmentItem, ShipmentRequest, ShiprocketClient,
};

fn razorpay(base_url: String) -> RazorpayGateway {
    RazorpayGateway::with_base_url(
        RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "test_secret".to_string(),
            webhook_secret: "whsec".to_string(),
        },
        base_url,
    )
}

fn stripe(base_url: String) -> StripeGateway {
    StripeGateway::with_base_url(
        StripeConfig {
            secret_key: "sk_test_key".to_string(),
            webhook_secret: "whsec".to_string(),
            webhook_tolerance_secs: 300,
        },
        base_url,
    )
}

#[tokio::test]
async fn razorpay_order_creation_maps_the_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(body_string_contains("\"amount\":131600"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "order_N9z3K",
            "amount": 131600,
            "currency": "INR",
            "status": "created",
            "receipt": "KGN-1731145000000-0001"
        })))
        .mount(&server)
        .await;

    let gateway = razorpay(server.uri());
    let order = gateway
        .create_order(131_600, "INR", "KGN-1731145000000-0001")
        .await
        .unwrap();
    assert_eq!(order.id, "order_N9z3K");
    assert_eq!(order.amount, 131_600);
    assert_eq!(order.status, "created");
}

#[tokio::test]
async fn razorpay_upstream_error_surfaces_as_external_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "description": "Authentication failed" }
        })))
        .mount(&server)
        .await;

    let err = razorpay(server.uri())
        .create_order(100, "INR", "r1")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalApiError(_)));
}

#[tokio::test]
async fn stripe_intent_uses_form_encoding_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("amount=131600"))
        .and(body_string_contains("metadata%5Border_id%5D="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_3abc",
            "amount": 131600,
            "currency": "inr",
            "status": "requires_payment_method",
            "client_secret": "pi_3abc_secret_xyz"
        })))
        .mount(&server)
        .await;

    let intent = stripe(server.uri())
        .create_payment_intent(131_600, "INR", "d2cf8d7e-0000-0000-0000-000000000000")
        .await
        .unwrap();
    assert_eq!(intent.id, "pi_3abc");
    assert_eq!(intent.client_secret.as_deref(), Some("pi_3abc_secret_xyz"));
}

#[tokio::test]
async fn shiprocket_logs_in_once_and_reuses_the_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/external/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "sr_token_1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/external/orders/create/adhoc"))
        .and(header("authorization", "Bearer sr_token_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "order_id": 481939,
            "shipment_id": 481054,
            "status": "NEW",
            "awb_code": "",
            "courier_name": ""
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = ShiprocketClient::new(ShiprocketConfig {
        base_url: server.uri(),
        email: "ops@kangan.shop".to_string(),
        password: "pw".to_string(),
        webhook_secret: None,
    });

    let request = ShipmentRequest {
        order_number: "KGN-1731145000000-0002".to_string(),
        order_date: chrono::Utc::now(),
        pickup_location: "Primary".to_string(),
        billing_customer_name: "Asha Devi".to_string(),
        billing_address: "12 MG Road".to_string(),
        billing_city: "Jaipur".to_string(),
        billing_pincode: "302001".to_string(),
        billing_state: "Rajasthan".to_string(),
        billing_country: "India".to_string(),
        billing_email: "asha@example.com".to_string(),
        billing_phone: "9876543210".to_string(),
        items: vec![ShipmentItem {
            name: "Meenakari Bangle".to_string(),
            sku: "LIFE-001".to_string(),
            units: 1,
            selling_price: rust_decimal_macros::dec!(650.00),
        }],
        payment_method: PaymentCollection::Prepaid,
        sub_total: rust_decimal_macros::dec!(650.00),
        weight_kg: 0.5,
        length_cm: 12.0,
        breadth_cm: 12.0,
        height_cm: 6.0,
    };

    // Two calls, one login: the second request reuses the cached token.
    let first = client.create_order(&request).await.unwrap();
    assert_eq!(first.order_id, "481939");
    assert_eq!(first.shipment_id, "481054");
    assert!(first.awb.is_none(), "empty awb_code maps to None");

    let second = client.create_order(&request).await.unwrap();
    assert_eq!(second.order_id, "481939");

    server.verify().await;
}

#[tokio::test]
async fn shiprocket_reauthenticates_after_a_401() {
    let server = MockServer::start().await;

    // Login succeeds every time, handing out the same token.
    Mock::given(method("POST"))
        .and(path("/v1/external/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "sr_token_2"
        })))
        .mount(&server)
        .await;

    // Tracking rejects the first attempt, then succeeds on the retry.
    Mock::given(method("GET"))
        .and(path("/v1/external/courier/track/awb/AWB000001"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/external/courier/track/awb/AWB000001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tracking_data": {
                "shipment_track": [{ "current_status": "IN TRANSIT" }],
                "shipment_track_activities": []
            }
        })))
        .mount(&server)
        .await;

    let client = ShiprocketClient::new(ShiprocketConfig {
        base_url: server.uri(),
        email: "ops@kangan.shop".to_string(),
        password: "pw".to_string(),
        webhook_secret: None,
    });

    let info = client.track_by_awb("AWB000001").await.unwrap();
    assert_eq!(info.current_status, "IN TRANSIT");
}
