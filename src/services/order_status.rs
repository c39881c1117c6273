use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, EntityTrait,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    entities::order_tracking_event,
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Everything that can move an order through its lifecycle. All five mutation
/// call sites (Stripe confirm, Razorpay confirm, payment webhooks, admin
/// actions, Shiprocket webhook) funnel through this one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    PaymentCompleted,
    PaymentFailed,
    Approve,
    ShipmentCreated,
    Dispatched,
    OutForDelivery,
    Delivered,
    Cancel,
    Return,
}

impl OrderEvent {
    /// The status this event drives an order into.
    pub fn target_status(self) -> OrderStatus {
        match self {
            OrderEvent::PaymentCompleted => OrderStatus::Confirmed,
            OrderEvent::PaymentFailed => OrderStatus::Cancelled,
            OrderEvent::Approve => OrderStatus::Processing,
            OrderEvent::ShipmentCreated => OrderStatus::ReadyToShip,
            OrderEvent::Dispatched => OrderStatus::Shipped,
            OrderEvent::OutForDelivery => OrderStatus::OutForDelivery,
            OrderEvent::Delivered => OrderStatus::Delivered,
            OrderEvent::Cancel => OrderStatus::Cancelled,
            OrderEvent::Return => OrderStatus::Returned,
        }
    }
}

/// Validates `(current, event) -> next` against the transition table.
///
/// An event whose target equals the current status is accepted as a no-op so
/// that redelivered webhooks do not error. Anything else outside the table is
/// rejected; the caller must leave the order untouched.
pub fn transition(current: OrderStatus, event: OrderEvent) -> Result<OrderStatus, ServiceError> {
    use OrderEvent::*;
    use OrderStatus::*;

    let allowed = match (current, event) {
        (Placed, PaymentCompleted) => true,
        (Placed, PaymentFailed) => true,
        (Confirmed, Approve) => true,
        (Confirmed, ShipmentCreated) | (Processing, ShipmentCreated) => true,
        (ReadyToShip, Dispatched) => true,
        (Shipped, OrderEvent::OutForDelivery) => true,
        (Shipped, OrderEvent::Delivered) | (OrderStatus::OutForDelivery, OrderEvent::Delivered) => true,
        (Placed, Cancel) | (Confirmed, Cancel) | (Processing, Cancel) => true,
        (OrderStatus::Delivered, Return) => true,
        _ => false,
    };

    if allowed {
        Ok(event.target_status())
    } else if event.target_status() == current {
        // Redelivered webhook for a transition we already applied.
        Ok(current)
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "cannot apply {:?} to order in status '{}'",
            event, current
        )))
    }
}

/// Applies an order event on an existing connection/transaction: validates the
/// transition, writes the new status, stamps `shipped_at`/`delivered_at`, and
/// appends one tracking entry. No-op transitions return the unchanged row
/// without appending anything.
pub async fn apply_on<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    event: OrderEvent,
    message: &str,
    actor: Option<&str>,
) -> Result<(OrderModel, bool), ServiceError> {
    let current = OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    let next = transition(current.status, event)?;
    if next == current.status {
        return Ok((current, false));
    }

    let now = Utc::now();
    let mut active: order::ActiveModel = current.clone().into();
    active.status = Set(next);
    active.updated_at = Set(Some(now));
    active.version = Set(current.version + 1);
    match event {
        OrderEvent::Dispatched => {
            if current.shipped_at.is_none() {
                active.shipped_at = Set(Some(now));
            }
        }
        OrderEvent::Delivered => {
            if current.delivered_at.is_none() {
                active.delivered_at = Set(Some(now));
            }
        }
        _ => {}
    }
    let updated = active.update(conn).await?;

    order_tracking_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(next.to_string()),
        message: Set(message.to_string()),
        actor: Set(actor.map(str::to_string)),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    Ok((updated, true))
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Applies an order event in its own transaction and emits a status-change
    /// event on success.
    #[instrument(skip(self), fields(order_id = %order_id, event = ?event))]
    pub async fn apply(
        &self,
        order_id: Uuid,
        event: OrderEvent,
        message: &str,
        actor: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        let old_status = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .map(|o| o.status);
        let (updated, changed) = apply_on(&txn, order_id, event, message, actor).await?;
        txn.commit().await?;

        if changed {
            info!(
                order_id = %order_id,
                from = %old_status.map(|s| s.to_string()).unwrap_or_default(),
                to = %updated.status,
                "Order status updated"
            );
            if let Err(e) = self
                .event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.map(|s| s.to_string()).unwrap_or_default(),
                    new_status: updated.status.to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send status change event");
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_the_full_lifecycle() {
        let mut status = OrderStatus::Placed;
        for event in [
            OrderEvent::PaymentCompleted,
            OrderEvent::Approve,
            OrderEvent::ShipmentCreated,
            OrderEvent::Dispatched,
            OrderEvent::OutForDelivery,
            OrderEvent::Delivered,
        ] {
            status = transition(status, event).expect("legal transition");
        }
        assert_eq!(status, OrderStatus::Delivered);
    }

    #[test]
    fn shipment_can_follow_confirmation_without_approval_step() {
        assert_eq!(
            transition(OrderStatus::Confirmed, OrderEvent::ShipmentCreated).unwrap(),
            OrderStatus::ReadyToShip
        );
    }

    #[test]
    fn delivery_straight_from_shipped_is_legal() {
        // Couriers do not always report an out-for-delivery scan.
        assert_eq!(
            transition(OrderStatus::Shipped, OrderEvent::Delivered).unwrap(),
            OrderStatus::Delivered
        );
    }

    #[test]
    fn cancel_is_rejected_once_shipped() {
        for status in [
            OrderStatus::ReadyToShip,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            assert!(transition(status, OrderEvent::Cancel).is_err(), "{}", status);
        }
    }

    #[test]
    fn late_webhook_cannot_regress_a_delivered_order() {
        assert!(transition(OrderStatus::Delivered, OrderEvent::ShipmentCreated).is_err());
        assert!(transition(OrderStatus::Delivered, OrderEvent::Dispatched).is_err());
    }

    #[test]
    fn redelivered_webhook_is_a_noop_not_an_error() {
        assert_eq!(
            transition(OrderStatus::Delivered, OrderEvent::Delivered).unwrap(),
            OrderStatus::Delivered
        );
        assert_eq!(
            transition(OrderStatus::Cancelled, OrderEvent::Cancel).unwrap(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn return_only_from_delivered() {
        assert!(transition(OrderStatus::Delivered, OrderEvent::Return).is_ok());
        assert!(transition(OrderStatus::Shipped, OrderEvent::Return).is_err());
        assert!(transition(OrderStatus::Placed, OrderEvent::Return).is_err());
    }

    #[test]
    fn payment_failure_cancels_a_placed_order() {
        assert_eq!(
            transition(OrderStatus::Placed, OrderEvent::PaymentFailed).unwrap(),
            OrderStatus::Cancelled
        );
        // But cannot cancel an order that was already confirmed by a racing path.
        assert!(transition(OrderStatus::Shipped, OrderEvent::PaymentFailed).is_err());
    }
}
