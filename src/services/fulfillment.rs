use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::fulfillment_task::{self, Entity as TaskEntity, TaskKind, TaskStatus},
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::notifications::OrderMailer,
    services::order_status::{transition, OrderEvent, OrderStatusService},
    services::settings::{ShipmentAutomation, StoreSettingsService},
    services::shiprocket::{
        CourierChoices, LogisticsProvider, NewPickupLocation, PaymentCollection, PickupLocation,
        ShipmentItem, ShipmentRequest, TrackingInfo,
    },
};

const DEFAULT_WEIGHT_KG: f64 = 0.5;
const DEFAULT_DIMENSIONS_CM: (f64, f64, f64) = (12.0, 12.0, 6.0);
const MAX_TASK_ATTEMPTS: i32 = 5;
const RETRY_BASE_DELAY_SECS: u64 = 30;
const WORKER_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a shipment-creation attempt. `Created { awb: None }` is the
/// partial case: the provider accepted the order but AWB assignment failed;
/// that is reported, not hidden behind a blanket success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ShipmentOutcome {
    Created { awb: Option<String> },
    AlreadyExists,
}

/// Per-order result of a bulk operation. Batches continue past individual
/// failures and report them item by item.
#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub order_id: Uuid,
    pub success: bool,
    pub detail: String,
}

/// Storefront address JSON stored on the order.
#[derive(Debug, Clone, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub phone: String,
}

fn default_country() -> String {
    "India".to_string()
}

pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    logistics: Arc<dyn LogisticsProvider>,
    mailer: Arc<OrderMailer>,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        logistics: Arc<dyn LogisticsProvider>,
        mailer: Arc<OrderMailer>,
    ) -> Self {
        Self {
            db,
            event_sender,
            logistics,
            mailer,
        }
    }

    fn status_service(&self) -> OrderStatusService {
        OrderStatusService::new(self.db.clone(), self.event_sender.clone())
    }

    async fn order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Registers the order with the logistics provider and assigns an AWB.
    ///
    /// Calling this twice for the same order never creates two remote
    /// shipments: there is an early existence check, and the winner of a
    /// concurrent race is decided by a conditional update guarded on
    /// `shiprocket_order_id IS NULL` (backed by the unique index).
    #[instrument(skip(self, automation), fields(order_id = %order_id))]
    pub async fn create_shipment(
        &self,
        order_id: Uuid,
        automation: &ShipmentAutomation,
    ) -> Result<ShipmentOutcome, ServiceError> {
        let order = self.order(order_id).await?;
        if order.has_remote_shipment() {
            info!(order_id = %order_id, "Shipment already exists, skipping");
            return Ok(ShipmentOutcome::AlreadyExists);
        }

        // Reject before calling out when the lifecycle does not allow a
        // shipment (cancelled, delivered, ...).
        transition(order.status, OrderEvent::ShipmentCreated)?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Order has no items to ship".to_string(),
            ));
        }

        let address: ShippingAddress =
            serde_json::from_str(&order.shipping_address).map_err(|e| {
                ServiceError::ValidationError(format!("order has an unusable address: {}", e))
            })?;

        let cod = order.payment_method.as_deref() == Some("cod");
        let weight = order.package_weight_kg.unwrap_or(DEFAULT_WEIGHT_KG);
        let (length, breadth, height) = DEFAULT_DIMENSIONS_CM;

        let request = ShipmentRequest {
            order_number: order.order_number.clone(),
            order_date: order.created_at,
            pickup_location: automation.pickup_location.clone(),
            billing_customer_name: order.customer_name.clone(),
            billing_address: address.address.clone(),
            billing_city: address.city.clone(),
            billing_pincode: address.pincode.clone(),
            billing_state: address.state.clone(),
            billing_country: address.country.clone(),
            billing_email: order.customer_email.clone(),
            billing_phone: address.phone.clone(),
            items: items
                .iter()
                .map(|item| ShipmentItem {
                    name: item.name.clone(),
                    sku: item.sku.clone(),
                    units: item.quantity,
                    selling_price: item.unit_price,
                })
                .collect(),
            payment_method: if cod {
                PaymentCollection::Cod
            } else {
                PaymentCollection::Prepaid
            },
            sub_total: order.subtotal,
            weight_kg: weight,
            length_cm: length,
            breadth_cm: breadth,
            height_cm: height,
        };

        let remote = self.logistics.create_order(&request).await?;

        // Secondary AWB step: the provider sometimes accepts the order
        // without assigning a courier. Ask for serviceable couriers and
        // assign explicitly; failure here leaves a shipment without a
        // tracking number and is reported as such.
        let mut awb = remote.awb.clone();
        let mut courier_id = remote.courier_id;
        let mut courier_name = remote.courier_name.clone();
        if awb.is_none() {
            match self
                .assign_awb(&remote.shipment_id, &automation.pickup_pincode, &address.pincode, weight, cod)
                .await
            {
                Ok(assignment) => {
                    awb = Some(assignment.awb);
                    courier_id = Some(assignment.courier_id);
                    courier_name = Some(assignment.courier_name);
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "AWB assignment failed; shipment created without tracking number");
                }
            }
        }

        let claimed = OrderEntity::update_many()
            .col_expr(
                order::Column::ShiprocketOrderId,
                Expr::value(remote.order_id.clone()),
            )
            .col_expr(
                order::Column::ShiprocketShipmentId,
                Expr::value(remote.shipment_id.clone()),
            )
            .col_expr(order::Column::AwbCode, Expr::value(awb.clone()))
            .col_expr(order::Column::CourierId, Expr::value(courier_id))
            .col_expr(order::Column::CourierName, Expr::value(courier_name))
            .col_expr(order::Column::PackageWeightKg, Expr::value(weight))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ShiprocketOrderId.is_null())
            .exec(&*self.db)
            .await?
            .rows_affected;

        if claimed == 0 {
            // A concurrent caller created the shipment first; withdraw ours
            // so the provider does not carry a duplicate.
            warn!(order_id = %order_id, "Lost shipment-creation race, cancelling duplicate remote shipment");
            if let Some(ref awb) = awb {
                if let Err(e) = self.logistics.cancel_shipment(&[awb.clone()]).await {
                    error!(order_id = %order_id, error = %e, "Failed to cancel duplicate remote shipment");
                }
            }
            return Ok(ShipmentOutcome::AlreadyExists);
        }

        let message = match &awb {
            Some(awb) => format!("Shipment registered with courier (AWB {})", awb),
            None => "Shipment registered with courier; AWB assignment pending".to_string(),
        };
        let updated = self
            .status_service()
            .apply(order_id, OrderEvent::ShipmentCreated, &message, Some("system"))
            .await?;

        if let Err(e) = self.mailer.send_ready_to_ship(&updated).await {
            warn!(order_id = %order_id, error = %e, "Ready-to-ship email failed");
            let _ = self.enqueue_email_retry(order_id, &e.to_string()).await;
        }

        if let Err(e) = self
            .event_sender
            .send(Event::ShipmentCreated {
                order_id,
                shiprocket_order_id: remote.order_id,
                awb_code: awb.clone(),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send shipment created event");
        }

        Ok(ShipmentOutcome::Created { awb })
    }

    async fn assign_awb(
        &self,
        shipment_id: &str,
        pickup_pincode: &str,
        delivery_pincode: &str,
        weight_kg: f64,
        cod: bool,
    ) -> Result<crate::services::shiprocket::AwbAssignment, ServiceError> {
        let choices = self
            .logistics
            .serviceable_couriers(pickup_pincode, delivery_pincode, weight_kg, cod)
            .await?;
        let courier = choices.pick().ok_or_else(|| {
            ServiceError::ExternalApiError(format!(
                "no serviceable courier for {} -> {}",
                pickup_pincode, delivery_pincode
            ))
        })?;
        self.logistics
            .generate_awb(shipment_id, courier.id)
            .await
    }

    /// Requests physical pickup from the provider and marks the order
    /// shipped.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn ship_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.order(order_id).await?;
        let shipment_id = order.shiprocket_shipment_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "Order has no shipment yet; create one before dispatching".to_string(),
            )
        })?;

        let pickup = self.logistics.request_pickup(&shipment_id).await?;

        OrderEntity::update_many()
            .col_expr(
                order::Column::PickupScheduledAt,
                Expr::value(Utc::now()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        let message = match pickup.scheduled_at {
            Some(ref when) => format!("Courier pickup scheduled for {}", when),
            None => "Courier pickup requested".to_string(),
        };
        let updated = self
            .status_service()
            .apply(order_id, OrderEvent::Dispatched, &message, Some("system"))
            .await?;

        if let Err(e) = self.mailer.send_shipped(&updated).await {
            warn!(order_id = %order_id, error = %e, "Shipped email failed");
            let _ = self.enqueue_email_retry(order_id, &e.to_string()).await;
        }

        if let Err(e) = self
            .event_sender
            .send(Event::ShipmentDispatched(order_id))
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send dispatch event");
        }

        Ok(updated)
    }

    /// Sequentially creates shipments for a batch of orders, collecting
    /// per-order outcomes. There is no rollback across items.
    #[instrument(skip(self, automation), fields(count = order_ids.len()))]
    pub async fn bulk_create_shipments(
        &self,
        order_ids: &[Uuid],
        automation: &ShipmentAutomation,
    ) -> Vec<BulkItemResult> {
        let mut results = Vec::with_capacity(order_ids.len());
        for &order_id in order_ids {
            let result = match self.create_shipment(order_id, automation).await {
                Ok(ShipmentOutcome::Created { awb }) => BulkItemResult {
                    order_id,
                    success: true,
                    detail: match awb {
                        Some(awb) => format!("shipment created, AWB {}", awb),
                        None => "shipment created, AWB pending".to_string(),
                    },
                },
                Ok(ShipmentOutcome::AlreadyExists) => BulkItemResult {
                    order_id,
                    success: true,
                    detail: "shipment already exists".to_string(),
                },
                Err(e) => BulkItemResult {
                    order_id,
                    success: false,
                    detail: e.to_string(),
                },
            };
            results.push(result);
        }
        info!(
            succeeded = results.iter().filter(|r| r.success).count(),
            failed = results.iter().filter(|r| !r.success).count(),
            "Bulk shipment creation finished"
        );
        results
    }

    #[instrument(skip(self), fields(count = order_ids.len()))]
    pub async fn bulk_ship_orders(&self, order_ids: &[Uuid]) -> Vec<BulkItemResult> {
        let mut results = Vec::with_capacity(order_ids.len());
        for &order_id in order_ids {
            let result = match self.ship_order(order_id).await {
                Ok(_) => BulkItemResult {
                    order_id,
                    success: true,
                    detail: "dispatched".to_string(),
                },
                Err(e) => BulkItemResult {
                    order_id,
                    success: false,
                    detail: e.to_string(),
                },
            };
            results.push(result);
        }
        results
    }

    /// Applies a courier tracking update coming in via webhook. Unknown
    /// statuses are logged and acknowledged; transitions the state machine
    /// rejects leave the order untouched.
    #[instrument(skip(self), fields(awb = %awb, status = %current_status))]
    pub async fn handle_tracking_update(
        &self,
        awb: &str,
        current_status: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::AwbCode.eq(awb))
            .one(&*self.db)
            .await?;
        let Some(order) = order else {
            warn!(awb = %awb, "Tracking update for unknown AWB");
            return Ok(None);
        };

        let Some(event) = map_courier_status(current_status) else {
            info!(awb = %awb, status = %current_status, "Ignoring unmapped courier status");
            return Ok(Some(order));
        };

        match self
            .status_service()
            .apply(
                order.id,
                event,
                &format!("Courier update: {}", current_status),
                Some("webhook:shiprocket"),
            )
            .await
        {
            Ok(updated) => {
                if updated.status == OrderStatus::Delivered {
                    if let Err(e) = self
                        .event_sender
                        .send(Event::ShipmentDelivered(order.id))
                        .await
                    {
                        warn!(error = %e, order_id = %order.id, "Failed to send delivered event");
                    }
                }
                Ok(Some(updated))
            }
            Err(ServiceError::InvalidStatus(msg)) => {
                // A late or out-of-order webhook; the order keeps its state.
                warn!(order_id = %order.id, "{}", msg);
                Ok(Some(order))
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort cancellation of the remote shipment when an order is
    /// cancelled after registration.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn cancel_remote_shipment(&self, order: &OrderModel) {
        if let Some(ref awb) = order.awb_code {
            if let Err(e) = self.logistics.cancel_shipment(&[awb.clone()]).await {
                error!(order_id = %order.id, error = %e, "Remote shipment cancellation failed");
            }
        }
    }

    pub async fn track(&self, awb: &str) -> Result<TrackingInfo, ServiceError> {
        self.logistics.track_by_awb(awb).await
    }

    pub async fn shipping_rates(
        &self,
        pickup_pincode: &str,
        delivery_pincode: &str,
        weight_kg: f64,
        cod: bool,
    ) -> Result<CourierChoices, ServiceError> {
        self.logistics
            .serviceable_couriers(pickup_pincode, delivery_pincode, weight_kg, cod)
            .await
    }

    pub async fn pickup_locations(&self) -> Result<Vec<PickupLocation>, ServiceError> {
        self.logistics.pickup_locations().await
    }

    pub async fn add_pickup_location(
        &self,
        location: &NewPickupLocation,
    ) -> Result<(), ServiceError> {
        self.logistics.add_pickup_location(location).await
    }

    // ---- retry queue -----------------------------------------------------

    pub async fn enqueue_shipment_retry(
        &self,
        order_id: Uuid,
        error: &str,
    ) -> Result<(), ServiceError> {
        self.enqueue_task(order_id, TaskKind::CreateShipment, error)
            .await
    }

    pub async fn enqueue_email_retry(
        &self,
        order_id: Uuid,
        error: &str,
    ) -> Result<(), ServiceError> {
        self.enqueue_task(order_id, TaskKind::SendEmail, error).await
    }

    async fn enqueue_task(
        &self,
        order_id: Uuid,
        kind: TaskKind,
        error: &str,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        fulfillment_task::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            kind: Set(kind),
            status: Set(TaskStatus::Pending),
            attempts: Set(0),
            last_error: Set(Some(error.to_string())),
            available_at: Set(now + chrono::Duration::seconds(RETRY_BASE_DELAY_SECS as i64)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?;
        info!(order_id = %order_id, kind = %kind, "Queued fulfillment retry task");
        Ok(())
    }

    /// Spawns the background worker that drains due retry tasks. Automation
    /// settings are re-read per run so an admin toggle takes effect without a
    /// restart.
    pub fn spawn_retry_worker(
        self: &Arc<Self>,
        settings: StoreSettingsService,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            info!("Fulfillment retry worker started");
            loop {
                if let Err(e) = service.drain_due_tasks(&settings).await {
                    error!(error = %e, "Retry worker pass failed");
                }
                tokio::time::sleep(WORKER_POLL_INTERVAL).await;
            }
        })
    }

    /// Runs one pass over due pending tasks.
    pub async fn drain_due_tasks(
        &self,
        settings: &StoreSettingsService,
    ) -> Result<usize, ServiceError> {
        let due = TaskEntity::find()
            .filter(fulfillment_task::Column::Status.eq(TaskStatus::Pending))
            .filter(fulfillment_task::Column::AvailableAt.lte(Utc::now()))
            .order_by_asc(fulfillment_task::Column::CreatedAt)
            .limit(20)
            .all(&*self.db)
            .await?;

        let mut processed = 0;
        for task in due {
            // Claim the task; another worker pass may have taken it already.
            let claimed = TaskEntity::update_many()
                .col_expr(
                    fulfillment_task::Column::Status,
                    Expr::value("processing"),
                )
                .col_expr(
                    fulfillment_task::Column::Attempts,
                    Expr::col(fulfillment_task::Column::Attempts).add(1),
                )
                .col_expr(fulfillment_task::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(fulfillment_task::Column::Id.eq(task.id))
                .filter(fulfillment_task::Column::Status.eq(TaskStatus::Pending))
                .exec(&*self.db)
                .await?
                .rows_affected;
            if claimed == 0 {
                continue;
            }

            let attempt = task.attempts + 1;
            let result = self.run_task(&task, settings).await;
            match result {
                Ok(()) => {
                    TaskEntity::update_many()
                        .col_expr(
                            fulfillment_task::Column::Status,
                            Expr::value("succeeded"),
                        )
                        .col_expr(fulfillment_task::Column::LastError, Expr::value(Option::<String>::None))
                        .col_expr(fulfillment_task::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(fulfillment_task::Column::Id.eq(task.id))
                        .exec(&*self.db)
                        .await?;
                    info!(task_id = %task.id, order_id = %task.order_id, kind = %task.kind, "Retry task succeeded");
                }
                Err(e) => {
                    let dead = attempt >= MAX_TASK_ATTEMPTS;
                    let next_status = if dead { "dead" } else { "pending" };
                    let backoff_secs =
                        RETRY_BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(attempt as u32));
                    let jitter_ms: i64 = rand::thread_rng().gen_range(0..1000);
                    let available_at = Utc::now()
                        + chrono::Duration::seconds(backoff_secs as i64)
                        + chrono::Duration::milliseconds(jitter_ms);

                    TaskEntity::update_many()
                        .col_expr(fulfillment_task::Column::Status, Expr::value(next_status))
                        .col_expr(
                            fulfillment_task::Column::LastError,
                            Expr::value(e.to_string()),
                        )
                        .col_expr(
                            fulfillment_task::Column::AvailableAt,
                            Expr::value(available_at),
                        )
                        .col_expr(fulfillment_task::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(fulfillment_task::Column::Id.eq(task.id))
                        .exec(&*self.db)
                        .await?;

                    if dead {
                        error!(task_id = %task.id, order_id = %task.order_id, error = %e, "Retry task exhausted all attempts");
                    } else {
                        warn!(task_id = %task.id, attempt = attempt, error = %e, "Retry task failed, rescheduled");
                    }
                }
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn run_task(
        &self,
        task: &fulfillment_task::Model,
        settings: &StoreSettingsService,
    ) -> Result<(), ServiceError> {
        match task.kind {
            TaskKind::CreateShipment => {
                let automation = settings.shipment_automation().await?;
                self.create_shipment(task.order_id, &automation)
                    .await
                    .map(|_| ())
            }
            TaskKind::SendEmail => {
                let order = self.order(task.order_id).await?;
                if order.has_remote_shipment() {
                    self.mailer.send_ready_to_ship(&order).await
                } else {
                    self.mailer.send_order_confirmation(&order).await
                }
            }
        }
    }
}

/// Maps a Shiprocket `current_status` string to an order event. Unmapped
/// statuses (RTO flows, cancellations, intermediate scans) return `None` and
/// are only logged.
pub fn map_courier_status(status: &str) -> Option<OrderEvent> {
    match status.trim().to_ascii_uppercase().as_str() {
        "PICKED UP" | "PICKUP COMPLETE" | "SHIPPED" | "IN TRANSIT" => Some(OrderEvent::Dispatched),
        "OUT FOR DELIVERY" => Some(OrderEvent::OutForDelivery),
        "DELIVERED" => Some(OrderEvent::Delivered),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn courier_status_mapping_covers_the_delivery_path() {
        assert_eq!(map_courier_status("PICKED UP"), Some(OrderEvent::Dispatched));
        assert_eq!(map_courier_status("In Transit"), Some(OrderEvent::Dispatched));
        assert_eq!(
            map_courier_status("OUT FOR DELIVERY"),
            Some(OrderEvent::OutForDelivery)
        );
        assert_eq!(map_courier_status("delivered"), Some(OrderEvent::Delivered));
    }

    #[test]
    fn undelivered_and_rto_are_not_mistaken_for_delivery() {
        assert_eq!(map_courier_status("UNDELIVERED"), None);
        assert_eq!(map_courier_status("RTO DELIVERED"), None);
        assert_eq!(map_courier_status("RTO INITIATED"), None);
        assert_eq!(map_courier_status("CANCELED"), None);
        assert_eq!(map_courier_status(""), None);
    }

    #[test]
    fn address_json_parses_with_partial_fields() {
        let parsed: ShippingAddress =
            serde_json::from_str(r#"{"address":"12 MG Road","city":"Jaipur","pincode":"302001","state":"Rajasthan"}"#)
                .unwrap();
        assert_eq!(parsed.country, "India");
        assert_eq!(parsed.pincode, "302001");
        assert!(parsed.phone.is_empty());
    }
}
