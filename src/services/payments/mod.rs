pub mod razorpay;
pub mod stripe;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use rust_decimal_macros::dec;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::decrement_stock_for_items,
    services::fulfillment::{FulfillmentService, ShipmentOutcome},
    services::notifications::OrderMailer,
    services::order_status::{apply_on, OrderEvent},
    services::settings::ShipmentAutomation,
};

pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

/// Constant-time byte comparison for signature checks.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Converts a decimal major-unit amount into gateway minor units (paise,
/// cents).
pub(crate) fn to_minor_units(amount: Decimal) -> Result<u64, ServiceError> {
    (amount * dec!(100))
        .round()
        .to_u64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount {} not representable", amount)))
}

/// Result of one best-effort side effect of payment confirmation. Failures
/// are queued for retry and reported, never swallowed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SideEffect {
    Succeeded,
    Skipped,
    Failed { reason: String, queued: bool },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentConfirmation {
    Confirmed,
    /// Another confirmation path (webhook vs. client confirm) already won the
    /// race; no side effects were re-run.
    AlreadyConfirmed,
}

/// Full outcome of a payment confirmation, surfaced to the caller instead of
/// logging-and-continuing.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationOutcome {
    pub order_id: Uuid,
    pub payment: PaymentConfirmation,
    pub email: SideEffect,
    pub shipment: SideEffect,
}

/// Gateway references persisted together with the confirmation.
#[derive(Debug, Default, Clone)]
pub struct PaymentRefs {
    pub stripe_payment_intent_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
}

pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    stripe: Arc<StripeGateway>,
    razorpay: Arc<RazorpayGateway>,
    fulfillment: Arc<FulfillmentService>,
    mailer: Arc<OrderMailer>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        stripe: Arc<StripeGateway>,
        razorpay: Arc<RazorpayGateway>,
        fulfillment: Arc<FulfillmentService>,
        mailer: Arc<OrderMailer>,
    ) -> Self {
        Self {
            db,
            event_sender,
            stripe,
            razorpay,
            fulfillment,
            mailer,
        }
    }

    async fn order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Creates a Stripe payment intent for an order and records its id.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_stripe_intent(
        &self,
        order_id: Uuid,
    ) -> Result<stripe::PaymentIntent, ServiceError> {
        if !self.stripe.is_configured() {
            return Err(ServiceError::InvalidOperation(
                "Stripe is not configured".to_string(),
            ));
        }
        let order = self.order(order_id).await?;
        if order.payment_status == PaymentStatus::Completed {
            return Err(ServiceError::Conflict("Order is already paid".to_string()));
        }

        let amount = to_minor_units(order.total_amount)?;
        let intent = self
            .stripe
            .create_payment_intent(amount, &order.currency, &order_id.to_string())
            .await?;

        OrderEntity::update_many()
            .col_expr(
                order::Column::StripePaymentIntentId,
                Expr::value(intent.id.clone()),
            )
            .col_expr(order::Column::PaymentMethod, Expr::value("stripe"))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        Ok(intent)
    }

    /// Creates a Razorpay order for checkout and records its id.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_razorpay_order(
        &self,
        order_id: Uuid,
    ) -> Result<razorpay::RazorpayOrder, ServiceError> {
        if !self.razorpay.is_configured() {
            return Err(ServiceError::InvalidOperation(
                "Razorpay is not configured".to_string(),
            ));
        }
        let order = self.order(order_id).await?;
        if order.payment_status == PaymentStatus::Completed {
            return Err(ServiceError::Conflict("Order is already paid".to_string()));
        }

        let amount = to_minor_units(order.total_amount)?;
        let remote = self
            .razorpay
            .create_order(amount, &order.currency, &order.order_number)
            .await?;

        OrderEntity::update_many()
            .col_expr(
                order::Column::RazorpayOrderId,
                Expr::value(remote.id.clone()),
            )
            .col_expr(order::Column::PaymentMethod, Expr::value("razorpay"))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        Ok(remote)
    }

    /// Client-side Stripe confirmation: checks with Stripe that the intent
    /// actually succeeded before marking the order paid.
    #[instrument(skip(self, automation), fields(intent_id = %intent_id))]
    pub async fn confirm_stripe(
        &self,
        intent_id: &str,
        automation: &ShipmentAutomation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::StripePaymentIntentId.eq(intent_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for payment intent {}", intent_id))
            })?;

        let intent = self.stripe.retrieve_payment_intent(intent_id).await?;
        if intent.status != "succeeded" {
            return Err(ServiceError::PaymentFailed(format!(
                "payment intent is in state '{}'",
                intent.status
            )));
        }

        self.confirm_success(
            order.id,
            "stripe",
            PaymentRefs::default(),
            automation,
            "client:stripe",
        )
        .await
    }

    /// Client-side Razorpay confirmation: verifies the checkout signature. A
    /// bad signature marks the payment failed and cancels the order.
    #[instrument(skip(self, automation, signature), fields(razorpay_order_id = %razorpay_order_id))]
    pub async fn confirm_razorpay(
        &self,
        razorpay_order_id: &str,
        razorpay_payment_id: &str,
        signature: &str,
        automation: &ShipmentAutomation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::RazorpayOrderId.eq(razorpay_order_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order for Razorpay order {}",
                    razorpay_order_id
                ))
            })?;

        if !self
            .razorpay
            .verify_payment_signature(razorpay_order_id, razorpay_payment_id, signature)
        {
            warn!(order_id = %order.id, "Razorpay signature verification failed");
            self.record_failure(order.id, "razorpay", "signature verification failed")
                .await?;
            return Err(ServiceError::PaymentFailed(
                "invalid payment signature".to_string(),
            ));
        }

        self.confirm_success(
            order.id,
            "razorpay",
            PaymentRefs {
                razorpay_payment_id: Some(razorpay_payment_id.to_string()),
                razorpay_signature: Some(signature.to_string()),
                ..Default::default()
            },
            automation,
            "client:razorpay",
        )
        .await
    }

    /// Shared success path for client confirms and webhooks.
    ///
    /// The conditional payment-status update is the idempotency guard: only
    /// the caller that flips `pending -> completed` runs the stock decrement
    /// and side effects, so a webhook racing a client confirm cannot decrement
    /// twice.
    #[instrument(skip(self, refs, automation), fields(order_id = %order_id, gateway = %gateway))]
    pub async fn confirm_success(
        &self,
        order_id: Uuid,
        gateway: &str,
        refs: PaymentRefs,
        automation: &ShipmentAutomation,
        actor: &str,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value("completed"))
            .col_expr(order::Column::PaidAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed));
        if let Some(intent_id) = refs.stripe_payment_intent_id {
            update = update.col_expr(order::Column::StripePaymentIntentId, Expr::value(intent_id));
        }
        if let Some(payment_id) = refs.razorpay_payment_id {
            update = update.col_expr(order::Column::RazorpayPaymentId, Expr::value(payment_id));
        }
        if let Some(sig) = refs.razorpay_signature {
            update = update.col_expr(order::Column::RazorpaySignature, Expr::value(sig));
        }

        let claimed = update.exec(&txn).await?.rows_affected;
        if claimed == 0 {
            txn.commit().await?;
            info!(order_id = %order_id, "Payment already confirmed by a concurrent path");
            return Ok(ConfirmationOutcome {
                order_id,
                payment: PaymentConfirmation::AlreadyConfirmed,
                email: SideEffect::Skipped,
                shipment: SideEffect::Skipped,
            });
        }

        let (order, _) = apply_on(
            &txn,
            order_id,
            OrderEvent::PaymentCompleted,
            &format!("Payment received via {}", gateway),
            Some(actor),
        )
        .await?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        decrement_stock_for_items(&txn, &items).await?;

        txn.commit().await?;

        info!(order_id = %order_id, gateway = %gateway, "Payment confirmed, stock decremented");

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentCompleted {
                order_id,
                gateway: gateway.to_string(),
                amount: order.total_amount,
                currency: order.currency.clone(),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send payment completed event");
        }

        // Best-effort side effects; failures enqueue a retry task and are
        // surfaced in the outcome.
        let email = match self.mailer.send_order_confirmation(&order).await {
            Ok(()) => SideEffect::Succeeded,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Confirmation email failed");
                let queued = self
                    .fulfillment
                    .enqueue_email_retry(order_id, &e.to_string())
                    .await
                    .is_ok();
                SideEffect::Failed {
                    reason: e.to_string(),
                    queued,
                }
            }
        };

        let shipment = if automation.triggers_on_payment() {
            match self.fulfillment.create_shipment(order_id, automation).await {
                Ok(ShipmentOutcome::Created { awb }) => {
                    info!(order_id = %order_id, awb = ?awb, "Shipment auto-created");
                    SideEffect::Succeeded
                }
                Ok(ShipmentOutcome::AlreadyExists) => SideEffect::Skipped,
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "Automatic shipment creation failed");
                    let queued = self
                        .fulfillment
                        .enqueue_shipment_retry(order_id, &e.to_string())
                        .await
                        .is_ok();
                    SideEffect::Failed {
                        reason: e.to_string(),
                        queued,
                    }
                }
            }
        } else {
            SideEffect::Skipped
        };

        Ok(ConfirmationOutcome {
            order_id,
            payment: PaymentConfirmation::Confirmed,
            email,
            shipment,
        })
    }

    /// Marks a payment failed and cancels the order when the state machine
    /// still allows it. A confirmation that already won is never overwritten.
    #[instrument(skip(self), fields(order_id = %order_id, gateway = %gateway))]
    pub async fn record_failure(
        &self,
        order_id: Uuid,
        gateway: &str,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let claimed = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value("failed"))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed))
            .exec(&*self.db)
            .await?
            .rows_affected;

        if claimed == 0 {
            warn!(order_id = %order_id, "Ignoring failure report for already-completed payment");
            return Ok(());
        }

        let txn = self.db.begin().await?;
        match apply_on(
            &txn,
            order_id,
            OrderEvent::PaymentFailed,
            &format!("Payment failed via {}: {}", gateway, reason),
            Some(&format!("webhook:{}", gateway)),
        )
        .await
        {
            Ok(_) => txn.commit().await?,
            Err(ServiceError::InvalidStatus(msg)) => {
                // Order already moved on (e.g. manually cancelled); record
                // nothing further.
                warn!(order_id = %order_id, "{}", msg);
                txn.commit().await?;
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentFailed {
                order_id,
                gateway: gateway.to_string(),
                reason: reason.to_string(),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send payment failed event");
        }
        Ok(())
    }

    /// Refunds a paid order through whichever gateway captured it. `amount`
    /// in major units; `None` refunds in full.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.order(order_id).await?;
        if !matches!(
            order.payment_status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order payment is '{}', nothing to refund",
                order.payment_status
            )));
        }
        if let Some(amount) = amount {
            if amount <= Decimal::ZERO || amount > order.total_amount {
                return Err(ServiceError::ValidationError(
                    "Refund amount must be positive and within the order total".to_string(),
                ));
            }
        }

        let minor = amount.map(to_minor_units).transpose()?;
        match order.payment_method.as_deref() {
            Some("stripe") => {
                let intent = order.stripe_payment_intent_id.as_deref().ok_or_else(|| {
                    ServiceError::InvalidOperation("Order has no payment intent".to_string())
                })?;
                self.stripe.refund(intent, minor).await?;
            }
            Some("razorpay") => {
                let payment_id = order.razorpay_payment_id.as_deref().ok_or_else(|| {
                    ServiceError::InvalidOperation("Order has no captured payment".to_string())
                })?;
                self.razorpay.refund(payment_id, minor).await?;
            }
            other => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Cannot refund payment method {:?}",
                    other
                )))
            }
        }

        let partial = matches!(amount, Some(a) if a < order.total_amount);
        let new_status = if partial {
            "partially_refunded"
        } else {
            "refunded"
        };
        OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        let refunded_amount = amount.unwrap_or(order.total_amount);
        info!(order_id = %order_id, amount = %refunded_amount, partial = partial, "Refund issued");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentRefunded {
                order_id,
                amount: refunded_amount,
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send refund event");
        }

        self.order(order_id).await
    }

    /// Dispatches a verified Stripe webhook event.
    #[instrument(skip(self, payload, automation))]
    pub async fn handle_stripe_event(
        &self,
        payload: &serde_json::Value,
        automation: &ShipmentAutomation,
    ) -> Result<(), ServiceError> {
        let event_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let object = payload.pointer("/data/object").cloned().unwrap_or_default();
        let intent_id = object.get("id").and_then(|v| v.as_str());

        match event_type {
            "payment_intent.succeeded" => {
                let intent_id = intent_id.ok_or_else(|| {
                    ServiceError::BadRequest("webhook payload missing intent id".to_string())
                })?;
                let order = OrderEntity::find()
                    .filter(order::Column::StripePaymentIntentId.eq(intent_id))
                    .one(&*self.db)
                    .await?;
                match order {
                    Some(order) => {
                        self.confirm_success(
                            order.id,
                            "stripe",
                            PaymentRefs::default(),
                            automation,
                            "webhook:stripe",
                        )
                        .await?;
                    }
                    None => {
                        warn!(intent_id = %intent_id, "Webhook for unknown payment intent")
                    }
                }
            }
            "payment_intent.payment_failed" => {
                if let Some(intent_id) = intent_id {
                    if let Some(order) = OrderEntity::find()
                        .filter(order::Column::StripePaymentIntentId.eq(intent_id))
                        .one(&*self.db)
                        .await?
                    {
                        let reason = object
                            .pointer("/last_payment_error/message")
                            .and_then(|v| v.as_str())
                            .unwrap_or("payment failed")
                            .to_string();
                        self.record_failure(order.id, "stripe", &reason).await?;
                    }
                }
            }
            other => {
                info!(event_type = %other, "Unhandled Stripe webhook event");
            }
        }
        Ok(())
    }

    /// Dispatches a verified Razorpay webhook event.
    #[instrument(skip(self, payload, automation))]
    pub async fn handle_razorpay_event(
        &self,
        payload: &serde_json::Value,
        automation: &ShipmentAutomation,
    ) -> Result<(), ServiceError> {
        let event_type = payload.get("event").and_then(|v| v.as_str()).unwrap_or("");
        let payment = payload.pointer("/payload/payment/entity");

        match event_type {
            "payment.captured" | "order.paid" => {
                let (remote_order_id, payment_id) = match payment {
                    Some(entity) => (
                        entity.get("order_id").and_then(|v| v.as_str()),
                        entity.get("id").and_then(|v| v.as_str()),
                    ),
                    None => (
                        payload
                            .pointer("/payload/order/entity/id")
                            .and_then(|v| v.as_str()),
                        None,
                    ),
                };
                let remote_order_id = remote_order_id.ok_or_else(|| {
                    ServiceError::BadRequest("webhook payload missing order id".to_string())
                })?;
                let order = OrderEntity::find()
                    .filter(order::Column::RazorpayOrderId.eq(remote_order_id))
                    .one(&*self.db)
                    .await?;
                match order {
                    Some(order) => {
                        self.confirm_success(
                            order.id,
                            "razorpay",
                            PaymentRefs {
                                razorpay_payment_id: payment_id.map(str::to_string),
                                ..Default::default()
                            },
                            automation,
                            "webhook:razorpay",
                        )
                        .await?;
                    }
                    None => {
                        warn!(remote_order_id = %remote_order_id, "Webhook for unknown Razorpay order")
                    }
                }
            }
            "payment.failed" => {
                if let Some(remote_order_id) =
                    payment.and_then(|p| p.get("order_id")).and_then(|v| v.as_str())
                {
                    if let Some(order) = OrderEntity::find()
                        .filter(order::Column::RazorpayOrderId.eq(remote_order_id))
                        .one(&*self.db)
                        .await?
                    {
                        let reason = payment
                            .and_then(|p| p.get("error_description"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("payment failed")
                            .to_string();
                        self.record_failure(order.id, "razorpay", &reason).await?;
                    }
                }
            }
            other => {
                info!(event_type = %other, "Unhandled Razorpay webhook event");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_unit_conversion_rounds_paise() {
        assert_eq!(to_minor_units(dec!(1316.00)).unwrap(), 131_600);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(dec!(59.975)).unwrap(), 5998);
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(to_minor_units(dec!(-5)).is_err());
    }

    #[test]
    fn constant_time_eq_compares_content_and_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
