use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Customer-facing order lifecycle stage. Distinct from the payment state and
/// from the carrier-side shipping metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "placed")]
    Placed,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "ready_to_ship")]
    ReadyToShip,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "out_for_delivery")]
    OutForDelivery,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "returned")]
    Returned,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::ReadyToShip => "ready_to_ship",
            OrderStatus::Shipped => "shipped",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "partially_refunded")]
    PartiallyRefunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        };
        write!(f, "{}", s)
    }
}

/// Window during which a delivered order may still be returned.
pub const RETURN_WINDOW_DAYS: i64 = 7;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    pub customer_id: Uuid,
    pub customer_email: String,
    pub customer_name: String,

    pub status: OrderStatus,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,

    // Payment sub-state
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,

    // Shipping sub-state, populated only after the logistics provider accepts
    // the order. May stay partially filled when AWB assignment fails after
    // remote order creation.
    #[sea_orm(unique)]
    pub shiprocket_order_id: Option<String>,
    pub shiprocket_shipment_id: Option<String>,
    pub awb_code: Option<String>,
    pub courier_id: Option<i64>,
    pub courier_name: Option<String>,
    pub package_weight_kg: Option<f64>,
    pub package_dimensions_cm: Option<String>,
    pub pickup_scheduled_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,

    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_tracking_event::Entity")]
    TrackingEvent,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_tracking_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrackingEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// An order can be cancelled only before it leaves the warehouse.
    pub fn can_be_cancelled(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Placed | OrderStatus::Confirmed | OrderStatus::Processing
        )
    }

    /// A delivered order can be returned strictly within the return window.
    pub fn can_be_returned(&self) -> bool {
        self.can_be_returned_at(Utc::now())
    }

    pub(crate) fn can_be_returned_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != OrderStatus::Delivered {
            return false;
        }
        match self.delivered_at {
            Some(delivered) => now - delivered < Duration::days(RETURN_WINDOW_DAYS),
            None => false,
        }
    }

    pub fn has_remote_shipment(&self) -> bool {
        self.shiprocket_order_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_with(status: OrderStatus, delivered_at: Option<DateTime<Utc>>) -> Model {
        Model {
            id: Uuid::new_v4(),
            order_number: "KGN-1731145000000-0001".to_string(),
            customer_id: Uuid::new_v4(),
            customer_email: "asha@example.com".to_string(),
            customer_name: "Asha".to_string(),
            status,
            subtotal: dec!(1200.00),
            shipping_cost: dec!(80.00),
            tax: dec!(36.00),
            discount: Decimal::ZERO,
            total_amount: dec!(1316.00),
            currency: "INR".to_string(),
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            stripe_payment_intent_id: None,
            razorpay_order_id: None,
            razorpay_payment_id: None,
            razorpay_signature: None,
            paid_at: None,
            shiprocket_order_id: None,
            shiprocket_shipment_id: None,
            awb_code: None,
            courier_id: None,
            courier_name: None,
            package_weight_kg: None,
            package_dimensions_cm: None,
            pickup_scheduled_at: None,
            shipped_at: None,
            delivered_at,
            shipping_address: "{}".to_string(),
            billing_address: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: None,
            version: 1,
        }
    }

    #[test]
    fn cancellable_only_before_shipping() {
        for status in [
            OrderStatus::Placed,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
        ] {
            assert!(order_with(status, None).can_be_cancelled(), "{}", status);
        }
        for status in [
            OrderStatus::ReadyToShip,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Returned,
        ] {
            assert!(!order_with(status, None).can_be_cancelled(), "{}", status);
        }
    }

    #[test]
    fn returnable_within_seven_days_of_delivery() {
        let delivered = Utc::now();
        let order = order_with(OrderStatus::Delivered, Some(delivered));

        assert!(order.can_be_returned_at(delivered + Duration::days(3)));
        assert!(order.can_be_returned_at(delivered + Duration::days(7) - Duration::seconds(1)));
        // Exactly at the boundary the window has closed.
        assert!(!order.can_be_returned_at(delivered + Duration::days(7)));
        assert!(!order.can_be_returned_at(delivered + Duration::days(7) + Duration::seconds(1)));
    }

    #[test]
    fn not_returnable_without_delivery_timestamp_or_wrong_status() {
        assert!(!order_with(OrderStatus::Delivered, None).can_be_returned());
        assert!(!order_with(OrderStatus::Shipped, Some(Utc::now())).can_be_returned());
    }
}
