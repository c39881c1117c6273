use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    entities::order_tracking_event::{self, Entity as TrackingEventEntity},
    entities::product::Entity as ProductEntity,
    entities::product_variant::Entity as VariantEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::order_status::{self, OrderEvent},
};

/// GST rate applied to jewellery orders.
const TAX_RATE: Decimal = dec!(0.03);

static ORDER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Builds an order number from the wall clock plus a process-wide sequence
/// suffix, so two orders placed in the same millisecond still come out
/// distinct.
pub fn generate_order_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let seq = ORDER_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("KGN-{}-{:04}", millis, seq)
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderRequest {
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 1))]
    pub customer_name: String,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<PlaceOrderItem>,
    /// Serialized address JSON from the storefront.
    #[validate(length(min = 2))]
    pub shipping_address: String,
    pub billing_address: Option<String>,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

fn default_currency() -> String {
    "INR".to_string()
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub tracking: Vec<order_tracking_event::Model>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Places a new order: snapshots catalog data into line items, computes
    /// the pricing breakdown, and records the initial tracking entry, all in
    /// one transaction. Stock is only checked here; it is decremented when
    /// payment completes.
    #[instrument(skip(self, request, customer_id), fields(customer_email = %request.customer_email))]
    pub async fn place_order(
        &self,
        customer_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<OrderDetail, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let mut snapshots: Vec<order_item::ActiveModel> = Vec::with_capacity(request.items.len());
        let mut subtotal = Decimal::ZERO;

        for line in &request.items {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "Quantity must be at least 1".to_string(),
                ));
            }
            let product = ProductEntity::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;
            if !product.is_active {
                return Err(ServiceError::InvalidOperation(format!(
                    "Product '{}' is no longer available",
                    product.name
                )));
            }

            let (sku, unit_price, available) = match line.variant_id {
                Some(variant_id) => {
                    let variant = VariantEntity::find_by_id(variant_id)
                        .one(&txn)
                        .await?
                        .filter(|v| v.product_id == product.id)
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Variant {} not found for product {}",
                                variant_id, product.id
                            ))
                        })?;
                    (variant.sku, variant.price, variant.stock)
                }
                None => (product.sku.clone(), product.price, product.stock),
            };

            if available < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "'{}' has only {} units left",
                    product.name, available
                )));
            }

            let line_total = unit_price * Decimal::from(line.quantity);
            subtotal += line_total;

            snapshots.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                variant_id: Set(line.variant_id),
                sku: Set(sku),
                name: Set(product.name.clone()),
                image_url: Set(product.image_url.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(unit_price),
                line_total: Set(line_total),
            });
        }

        let shipping_cost = request.shipping_cost.unwrap_or(Decimal::ZERO);
        let discount = request.discount.unwrap_or(Decimal::ZERO);
        let tax = (subtotal * TAX_RATE).round_dp(2);
        let total_amount = subtotal + shipping_cost + tax - discount;

        let order_number = generate_order_number();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(customer_id),
            customer_email: Set(request.customer_email.clone()),
            customer_name: Set(request.customer_name.clone()),
            status: Set(OrderStatus::Placed),
            subtotal: Set(subtotal),
            shipping_cost: Set(shipping_cost),
            tax: Set(tax),
            discount: Set(discount),
            total_amount: Set(total_amount),
            currency: Set(request.currency.clone()),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(request.payment_method.clone()),
            stripe_payment_intent_id: Set(None),
            razorpay_order_id: Set(None),
            razorpay_payment_id: Set(None),
            razorpay_signature: Set(None),
            paid_at: Set(None),
            shiprocket_order_id: Set(None),
            shiprocket_shipment_id: Set(None),
            awb_code: Set(None),
            courier_id: Set(None),
            courier_name: Set(None),
            package_weight_kg: Set(None),
            package_dimensions_cm: Set(None),
            pickup_scheduled_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            shipping_address: Set(request.shipping_address.clone()),
            billing_address: Set(request.billing_address.clone()),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order = order_model.insert(&txn).await?;

        let mut items = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            items.push(snapshot.insert(&txn).await?);
        }

        let tracking_entry = order_tracking_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(OrderStatus::Placed.to_string()),
            message: Set("Order placed".to_string()),
            actor: Set(Some("system".to_string())),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_number, total = %total_amount, "Order placed");

        if let Err(e) = self.event_sender.send(Event::OrderPlaced(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order placed event");
        }

        Ok(OrderDetail {
            order,
            items,
            tracking: vec![tracking_entry],
        })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let tracking = TrackingEventEntity::find()
            .filter(order_tracking_event::Column::OrderId.eq(order_id))
            .order_by_asc(order_tracking_event::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderDetail {
            order,
            items,
            tracking,
        })
    }

    pub async fn get_order_model(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn find_by_razorpay_order_id(
        &self,
        razorpay_order_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::RazorpayOrderId.eq(razorpay_order_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_stripe_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::StripePaymentIntentId.eq(intent_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_awb(&self, awb: &str) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::AwbCode.eq(awb))
            .one(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        limit: u64,
        status: Option<OrderStatus>,
        customer_id: Option<Uuid>,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = OrderEntity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(customer) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Admin approval step; moves a confirmed order into processing.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn approve_order(
        &self,
        order_id: Uuid,
        actor: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let status_service =
            order_status::OrderStatusService::new(self.db.clone(), self.event_sender.clone());
        status_service
            .apply(
                order_id,
                OrderEvent::Approve,
                "Order approved for fulfillment",
                Some(&actor.to_string()),
            )
            .await
    }

    /// Cancels an order while the cancellation predicate still holds. The
    /// remote shipment, when one exists, is cancelled separately by the
    /// fulfillment service.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get_order_model(order_id).await?;
        if !order.can_be_cancelled() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status '{}' can no longer be cancelled",
                order.status
            )));
        }

        let message = reason
            .map(|r| format!("Order cancelled: {}", r))
            .unwrap_or_else(|| "Order cancelled".to_string());

        let status_service =
            order_status::OrderStatusService::new(self.db.clone(), self.event_sender.clone());
        let updated = status_service
            .apply(order_id, OrderEvent::Cancel, &message, actor)
            .await?;

        if let Err(e) = self.event_sender.send(Event::OrderCancelled(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order cancelled event");
        }
        Ok(updated)
    }

    /// Registers a return for a delivered order within the return window.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn return_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        actor: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get_order_model(order_id).await?;
        if !order.can_be_returned() {
            return Err(ServiceError::InvalidOperation(
                "Order is outside the 7-day return window".to_string(),
            ));
        }

        let message = reason
            .map(|r| format!("Return requested: {}", r))
            .unwrap_or_else(|| "Return requested".to_string());

        let status_service =
            order_status::OrderStatusService::new(self.db.clone(), self.event_sender.clone());
        let updated = status_service
            .apply(order_id, OrderEvent::Return, &message, actor)
            .await?;

        if let Err(e) = self.event_sender.send(Event::OrderReturned(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order returned event");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn order_numbers_are_distinct_within_one_millisecond() {
        // A burst far faster than one per millisecond must still be unique
        // thanks to the sequence suffix.
        let numbers: HashSet<String> = (0..500).map(|_| generate_order_number()).collect();
        assert_eq!(numbers.len(), 500);
    }

    #[test]
    fn order_number_has_timestamp_and_sequence_parts() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "KGN");
        assert!(parts[1].parse::<i64>().is_ok(), "timestamp part: {}", parts[1]);
        assert_eq!(parts[2].len(), 4, "sequence part: {}", parts[2]);
    }

    #[test]
    fn tax_is_three_percent_rounded() {
        let subtotal = dec!(1999.00);
        let tax = (subtotal * TAX_RATE).round_dp(2);
        assert_eq!(tax, dec!(59.97));
    }
}
