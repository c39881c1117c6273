//! Regression tests for the payment-confirmation idempotency guard: a
//! webhook racing a client-side confirm must decrement stock exactly once.

mod common;

use common::TestApp;
use kangan_api::entities::order::PaymentStatus;
use kangan_api::services::payments::{PaymentConfirmation, PaymentRefs, SideEffect};

#[tokio::test]
async fn double_confirmation_decrements_stock_once() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let product_id = app.seed_product("IDEM-001", 10).await;
    let placed = app.place_order(product_id, 3).await;
    let order_id = placed.order.id;

    let first = app
        .services
        .payments
        .confirm_success(
            order_id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "client:razorpay",
        )
        .await
        .unwrap();
    assert_eq!(first.payment, PaymentConfirmation::Confirmed);
    assert_eq!(app.product_stock(product_id).await, 7);

    // The webhook arrives after the client confirm already won.
    let second = app
        .services
        .payments
        .confirm_success(
            order_id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "webhook:razorpay",
        )
        .await
        .unwrap();
    assert_eq!(second.payment, PaymentConfirmation::AlreadyConfirmed);
    assert_eq!(second.email, SideEffect::Skipped);
    assert_eq!(second.shipment, SideEffect::Skipped);

    // Stock unchanged, and no duplicate remote shipment was requested.
    assert_eq!(app.product_stock(product_id).await, 7);
    assert_eq!(
        app.logistics
            .create_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn concurrent_confirmations_have_exactly_one_winner() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let product_id = app.seed_product("IDEM-002", 10).await;
    let placed = app.place_order(product_id, 2).await;
    let order_id = placed.order.id;

    let (a, b) = tokio::join!(
        app.services.payments.confirm_success(
            order_id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "client:razorpay",
        ),
        app.services.payments.confirm_success(
            order_id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "webhook:razorpay",
        ),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    let winners = outcomes
        .iter()
        .filter(|o| o.payment == PaymentConfirmation::Confirmed)
        .count();
    assert_eq!(winners, 1, "exactly one confirmation path may win");

    assert_eq!(app.product_stock(product_id).await, 8);
    assert_eq!(
        app.logistics
            .create_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn insufficient_stock_fails_the_whole_confirmation() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let product_id = app.seed_product("IDEM-003", 5).await;
    let placed = app.place_order(product_id, 4).await;

    // Someone else bought the stock between placement and payment.
    let other = app.place_order(product_id, 4).await;
    app.services
        .payments
        .confirm_success(
            other.order.id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "webhook:razorpay",
        )
        .await
        .unwrap();
    assert_eq!(app.product_stock(product_id).await, 1);

    let err = app
        .services
        .payments
        .confirm_success(
            placed.order.id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "webhook:razorpay",
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        kangan_api::errors::ServiceError::InsufficientStock(_)
    ));

    // The transaction rolled back: the order is still unpaid, stock intact.
    let order = app
        .services
        .orders
        .get_order_model(placed.order.id)
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(app.product_stock(product_id).await, 1);
}
