use async_trait::async_trait;
use tracing::info;

use crate::{entities::order::Model as OrderModel, errors::ServiceError};

/// Outbound mail seam. The default implementation records messages to the log;
/// a real transport slots in behind the same trait.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError>;
}

/// Log-only mailer used in development and tests.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError> {
        info!(to = %to, subject = %subject, bytes = body.len(), "email dispatched");
        Ok(())
    }
}

/// Renders the customer-facing order emails.
pub struct OrderMailer {
    mailer: std::sync::Arc<dyn Mailer>,
    from: String,
}

impl OrderMailer {
    pub fn new(mailer: std::sync::Arc<dyn Mailer>, from: String) -> Self {
        Self { mailer, from }
    }

    pub async fn send_order_confirmation(&self, order: &OrderModel) -> Result<(), ServiceError> {
        let subject = format!("Order {} confirmed", order.order_number);
        let body = format!(
            "Hi {},\n\nYour payment of {} {} for order {} was received. \
             We will let you know as soon as it ships.\n\n— {}",
            order.customer_name, order.total_amount, order.currency, order.order_number, self.from
        );
        self.mailer.send(&order.customer_email, &subject, &body).await
    }

    /// Sent when the shipment is registered with the courier. The order is not
    /// shipped yet at this point; the wording must not claim it is.
    pub async fn send_ready_to_ship(&self, order: &OrderModel) -> Result<(), ServiceError> {
        let subject = format!("Order {} is ready to ship", order.order_number);
        let tracking_line = match &order.awb_code {
            Some(awb) => format!("Tracking number: {}\n", awb),
            None => "Your tracking number will follow shortly.\n".to_string(),
        };
        let body = format!(
            "Hi {},\n\nOrder {} has been packed and handed to our courier partner.\n{}\n— {}",
            order.customer_name, order.order_number, tracking_line, self.from
        );
        self.mailer.send(&order.customer_email, &subject, &body).await
    }

    pub async fn send_shipped(&self, order: &OrderModel) -> Result<(), ServiceError> {
        let subject = format!("Order {} is on its way", order.order_number);
        let body = format!(
            "Hi {},\n\nOrder {} was picked up by {} and is on its way to you.\n\n— {}",
            order.customer_name,
            order.order_number,
            order.courier_name.as_deref().unwrap_or("our courier partner"),
            self.from
        );
        self.mailer.send(&order.customer_email, &subject, &body).await
    }
}
