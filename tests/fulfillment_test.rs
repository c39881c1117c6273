//! Shipment orchestration tests: duplicate prevention, the partial AWB
//! outcome, webhook transition safety, and the retry queue.

mod common;

use std::sync::atomic::Ordering;

use common::TestApp;
use kangan_api::entities::fulfillment_task::{self, TaskStatus};
use kangan_api::entities::order::OrderStatus;
use kangan_api::services::fulfillment::ShipmentOutcome;
use kangan_api::services::payments::PaymentRefs;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

async fn paid_order(app: &TestApp, sku: &str) -> Uuid {
    let product_id = app.seed_product(sku, 10).await;
    let placed = app.place_order(product_id, 1).await;
    // Confirm without automation so tests control shipment creation.
    let mut automation = app.automation();
    automation.auto_create_shipment = false;
    app.services
        .payments
        .confirm_success(
            placed.order.id,
            "razorpay",
            PaymentRefs::default(),
            &automation,
            "webhook:razorpay",
        )
        .await
        .expect("confirm");
    placed.order.id
}

#[tokio::test]
async fn creating_a_shipment_twice_is_a_noop() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let order_id = paid_order(&app, "FUL-001").await;

    let first = app
        .services
        .fulfillment
        .create_shipment(order_id, &automation)
        .await
        .unwrap();
    assert!(matches!(first, ShipmentOutcome::Created { awb: Some(_) }));

    let second = app
        .services
        .fulfillment
        .create_shipment(order_id, &automation)
        .await
        .unwrap();
    assert_eq!(second, ShipmentOutcome::AlreadyExists);

    // The provider saw exactly one order.
    assert_eq!(app.logistics.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn awb_failure_yields_partial_shipment_not_silent_success() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let order_id = paid_order(&app, "FUL-002").await;

    app.logistics.fail_awb.store(true, Ordering::SeqCst);
    let outcome = app
        .services
        .fulfillment
        .create_shipment(order_id, &automation)
        .await
        .unwrap();
    assert_eq!(outcome, ShipmentOutcome::Created { awb: None });

    let order = app.services.orders.get_order_model(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::ReadyToShip);
    assert!(order.shiprocket_order_id.is_some());
    assert!(order.awb_code.is_none(), "no tracking number was assigned");
}

#[tokio::test]
async fn late_webhook_cannot_rewind_a_delivered_order() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let order_id = paid_order(&app, "FUL-003").await;

    app.services
        .fulfillment
        .create_shipment(order_id, &automation)
        .await
        .unwrap();
    app.services.fulfillment.ship_order(order_id).await.unwrap();

    let order = app.services.orders.get_order_model(order_id).await.unwrap();
    let awb = order.awb_code.clone().unwrap();

    app.services
        .fulfillment
        .handle_tracking_update(&awb, "DELIVERED")
        .await
        .unwrap();

    // A delayed pickup scan arrives after delivery; the order must not move.
    let after = app
        .services
        .fulfillment
        .handle_tracking_update(&awb, "PICKED UP")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, OrderStatus::Delivered);

    // Redelivered DELIVERED webhook is acknowledged without error.
    let again = app
        .services
        .fulfillment
        .handle_tracking_update(&awb, "DELIVERED")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn unknown_awb_is_acknowledged_without_effect() {
    let app = TestApp::new().await;
    let result = app
        .services
        .fulfillment
        .handle_tracking_update("AWB-UNKNOWN", "DELIVERED")
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn failed_shipment_is_retried_from_the_queue() {
    let app = TestApp::new().await;
    let order_id = paid_order(&app, "FUL-004").await;

    app.services
        .fulfillment
        .enqueue_shipment_retry(order_id, "provider timeout")
        .await
        .unwrap();

    // Make the task due now instead of waiting out the backoff.
    fulfillment_task::Entity::update_many()
        .col_expr(
            fulfillment_task::Column::AvailableAt,
            sea_orm::sea_query::Expr::value(chrono::Utc::now() - chrono::Duration::seconds(1)),
        )
        .filter(fulfillment_task::Column::OrderId.eq(order_id))
        .exec(&*app.db)
        .await
        .unwrap();

    let processed = app
        .services
        .fulfillment
        .drain_due_tasks(&app.services.settings)
        .await
        .unwrap();
    assert_eq!(processed, 1);

    let task = fulfillment_task::Entity::find()
        .filter(fulfillment_task::Column::OrderId.eq(order_id))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);

    let order = app.services.orders.get_order_model(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::ReadyToShip);
    assert!(order.shiprocket_order_id.is_some());
}

#[tokio::test]
async fn cancelled_order_is_not_shippable() {
    let app = TestApp::new().await;
    let automation = app.automation();
    let product_id = app.seed_product("FUL-005", 5).await;
    let placed = app.place_order(product_id, 1).await;

    app.services
        .orders
        .cancel_order(placed.order.id, Some("changed my mind".to_string()), None)
        .await
        .unwrap();

    let err = app
        .services
        .fulfillment
        .create_shipment(placed.order.id, &automation)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        kangan_api::errors::ServiceError::InvalidStatus(_)
    ));
    assert_eq!(app.logistics.create_calls.load(Ordering::SeqCst), 0);
}
