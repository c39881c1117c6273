use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Domain events emitted by the services after their transaction commits.
/// Consumed by the in-process event processor for logging and fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    OrderReturned(Uuid),
    PaymentCompleted {
        order_id: Uuid,
        gateway: String,
        amount: Decimal,
        currency: String,
    },
    PaymentFailed {
        order_id: Uuid,
        gateway: String,
        reason: String,
    },
    PaymentRefunded {
        order_id: Uuid,
        amount: Decimal,
    },
    ShipmentCreated {
        order_id: Uuid,
        shiprocket_order_id: String,
        awb_code: Option<String>,
    },
    ShipmentDispatched(Uuid),
    ShipmentDelivered(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Builds a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Background task draining the event channel. Today this only records events
/// to the log; it is the single place to attach external fan-out later.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, from = %old_status, to = %new_status, "event: order status changed");
            }
            Event::PaymentCompleted {
                order_id,
                gateway,
                amount,
                currency,
            } => {
                info!(order_id = %order_id, gateway = %gateway, amount = %amount, currency = %currency, "event: payment completed");
            }
            Event::ShipmentCreated {
                order_id,
                shiprocket_order_id,
                awb_code,
            } => {
                info!(order_id = %order_id, remote_order = %shiprocket_order_id, awb = ?awb_code, "event: shipment created");
            }
            other => debug!(event = ?other, "event"),
        }
    }
    info!("Event processor stopped (channel closed)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_round_trip_through_the_channel() {
        let (sender, mut rx) = channel(8);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderPlaced(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderPlaced(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
