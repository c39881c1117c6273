//! End-to-end order lifecycle over in-memory SQLite with a scripted
//! logistics provider: place → pay → auto-ship → dispatch → deliver.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use kangan_api::entities::order::{OrderStatus, PaymentStatus};
use kangan_api::services::payments::{
    PaymentConfirmation, PaymentRefs, SideEffect,
};

#[tokio::test]
async fn full_lifecycle_from_placement_to_delivery() {
    let app = TestApp::new().await;
    let automation = app.automation();

    // Place: snapshot items, status `placed`, one tracking entry.
    let product_id = app.seed_product("LIFE-001", 10).await;
    let placed = app.place_order(product_id, 2).await;
    assert_eq!(placed.order.status, OrderStatus::Placed);
    assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.tracking.len(), 1);
    // 2 × 650 + 80 shipping + 3% tax on subtotal
    assert_eq!(placed.order.subtotal, rust_decimal_macros::dec!(1300.00));
    assert_eq!(placed.order.total_amount, rust_decimal_macros::dec!(1419.00));

    let order_id = placed.order.id;

    // Payment webhook confirms: status `confirmed`, stock drops by quantity,
    // and automation immediately registers the shipment.
    let outcome = app
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
        .expect("confirm payment");

    assert_eq!(outcome.payment, PaymentConfirmation::Confirmed);
    assert_eq!(outcome.email, SideEffect::Succeeded);
    assert_matches!(outcome.shipment, SideEffect::Succeeded);
    assert_eq!(app.product_stock(product_id).await, 8);

    let after_payment = app.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(after_payment.order.status, OrderStatus::ReadyToShip);
    assert_eq!(after_payment.order.payment_status, PaymentStatus::Completed);
    assert!(after_payment.order.paid_at.is_some());
    assert!(after_payment.order.shiprocket_order_id.is_some());
    let awb = after_payment.order.awb_code.clone().expect("awb assigned");
    // placed -> confirmed -> ready_to_ship: three tracking entries so far.
    assert_eq!(after_payment.tracking.len(), 3);

    // Admin dispatch: pickup requested, status `shipped`, timestamp set.
    let shipped = app
        .services
        .fulfillment
        .ship_order(order_id)
        .await
        .expect("ship order");
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert!(shipped.shipped_at.is_some());
    assert_eq!(app.logistics.pickup_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Courier webhook reports delivery.
    let delivered = app
        .services
        .fulfillment
        .handle_tracking_update(&awb, "DELIVERED")
        .await
        .expect("tracking update")
        .expect("order found by awb");
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());

    let final_state = app.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(final_state.tracking.len(), 5);
    assert!(final_state.order.can_be_returned());
}

#[tokio::test]
async fn payment_failure_cancels_the_order() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("LIFE-002", 5).await;
    let placed = app.place_order(product_id, 1).await;

    app.services
        .payments
        .record_failure(placed.order.id, "razorpay", "signature verification failed")
        .await
        .expect("record failure");

    let order = app
        .services
        .orders
        .get_order_model(placed.order.id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    // Stock was never decremented for a failed payment.
    assert_eq!(app.product_stock(product_id).await, 5);
}

#[tokio::test]
async fn manual_approval_gate_holds_back_auto_shipping() {
    let app = TestApp::new().await;
    let mut automation = app.automation();
    automation.require_order_approval = true;

    let product_id = app.seed_product("LIFE-003", 5).await;
    let placed = app.place_order(product_id, 1).await;

    let outcome = app
        .services
        .payments
        .confirm_success(
            placed.order.id,
            "stripe",
            kangan_api::services::payments::PaymentRefs::default(),
            &automation,
            "webhook:stripe",
        )
        .await
        .unwrap();

    // Payment lands, but shipping waits for an admin.
    assert_eq!(outcome.payment, PaymentConfirmation::Confirmed);
    assert_eq!(outcome.shipment, SideEffect::Skipped);

    let order = app
        .services
        .orders
        .get_order_model(placed.order.id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.shiprocket_order_id.is_none());
    assert_eq!(
        app.logistics
            .create_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn cancellation_rejected_after_dispatch() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let product_id = app.seed_product("LIFE-004", 5).await;
    let placed = app.place_order(product_id, 1).await;
    let order_id = placed.order.id;

    app.services
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
    app.services.fulfillment.ship_order(order_id).await.unwrap();

    let err = app
        .services
        .orders
        .cancel_order(order_id, None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no longer be cancelled"));

    let order = app.services.orders.get_order_model(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
}
