use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::{config::RazorpayConfig, errors::ServiceError};

use super::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote order as returned by the Razorpay Orders API.
#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayRefund {
    pub id: String,
    pub amount: u64,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
}

/// Client for the Razorpay REST API plus the two signature checks the
/// checkout flow depends on.
pub struct RazorpayGateway {
    http: reqwest::Client,
    base_url: String,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> Self {
        Self::with_base_url(config, "https://api.razorpay.com".to_string())
    }

    pub fn with_base_url(config: RazorpayConfig, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.is_empty()
    }

    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.config.key_id, self.config.key_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    /// Creates a Razorpay order for the given amount in minor units (paise).
    #[instrument(skip(self), fields(amount = amount, currency = %currency))]
    pub async fn create_order(
        &self,
        amount: u64,
        currency: &str,
        receipt: &str,
    ) -> Result<RazorpayOrder, ServiceError> {
        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .header("Authorization", self.basic_auth())
            .json(&CreateOrderBody {
                amount,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("razorpay: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Razorpay order creation failed");
            return Err(ServiceError::ExternalApiError(format!(
                "razorpay order creation failed with status {}",
                status
            )));
        }

        let order: RazorpayOrder = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("razorpay response: {}", e)))?;

        info!(razorpay_order_id = %order.id, "Razorpay order created");
        Ok(order)
    }

    /// Recomputes the checkout signature over `order_id|payment_id` and
    /// compares in constant time against what the client submitted.
    pub fn verify_payment_signature(
        &self,
        razorpay_order_id: &str,
        razorpay_payment_id: &str,
        signature: &str,
    ) -> bool {
        let payload = format!("{}|{}", razorpay_order_id, razorpay_payment_id);
        let mut mac = match HmacSha256::new_from_slice(self.config.key_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    /// Verifies `X-Razorpay-Signature` over the raw webhook body.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    /// Issues a refund against a captured payment. `amount` in minor units;
    /// `None` refunds the full amount.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn refund(
        &self,
        payment_id: &str,
        amount: Option<u64>,
    ) -> Result<RazorpayRefund, ServiceError> {
        let mut body = serde_json::Map::new();
        if let Some(amount) = amount {
            body.insert("amount".to_string(), amount.into());
        }

        let response = self
            .http
            .post(format!("{}/v1/payments/{}/refund", self.base_url, payment_id))
            .header("Authorization", self.basic_auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("razorpay: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::ExternalApiError(format!(
                "razorpay refund failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("razorpay response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: "test_secret".to_string(),
            webhook_secret: "whsec_test".to_string(),
        })
    }

    fn sign(secret: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_correctly_signed_payment() {
        let gw = gateway();
        let signature = sign("test_secret", "order_abc|pay_xyz");
        assert!(gw.verify_payment_signature("order_abc", "pay_xyz", &signature));
    }

    #[test]
    fn rejects_every_single_byte_mutation_of_the_signature() {
        let gw = gateway();
        let signature = sign("test_secret", "order_abc|pay_xyz");

        for i in 0..signature.len() {
            let mut mutated = signature.clone().into_bytes();
            // Flip to a different hex digit at position i.
            mutated[i] = if mutated[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(mutated).unwrap();
            if mutated == signature {
                continue;
            }
            assert!(
                !gw.verify_payment_signature("order_abc", "pay_xyz", &mutated),
                "mutation at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn rejects_signature_for_different_payment() {
        let gw = gateway();
        let signature = sign("test_secret", "order_abc|pay_xyz");
        assert!(!gw.verify_payment_signature("order_abc", "pay_other", &signature));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let gw = gateway();
        let body = br#"{"event":"payment.captured"}"#;
        let signature = sign("whsec_test", std::str::from_utf8(body).unwrap());
        assert!(gw.verify_webhook_signature(body, &signature));
        assert!(!gw.verify_webhook_signature(b"{}", &signature));
    }
}
