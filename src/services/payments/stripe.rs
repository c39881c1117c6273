use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::{config::StripeConfig, errors::ServiceError};

use super::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    /// "requires_payment_method", "processing", "succeeded", "canceled", ...
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRefund {
    pub id: String,
    pub amount: u64,
    pub status: String,
}

/// Client for the Stripe PaymentIntents API. Stripe takes form-encoded
/// requests, not JSON.
pub struct StripeGateway {
    http: reqwest::Client,
    base_url: String,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self::with_base_url(config, "https://api.stripe.com".to_string())
    }

    pub fn with_base_url(config: StripeConfig, base_url: String) -> Self {
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
        !self.config.secret_key.is_empty()
    }

    /// Creates a payment intent for the given amount in minor units, tagged
    /// with the internal order id so webhooks can be correlated.
    #[instrument(skip(self), fields(amount = amount, currency = %currency, order_id = %order_id))]
    pub async fn create_payment_intent(
        &self,
        amount: u64,
        currency: &str,
        order_id: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let amount_str = amount.to_string();
        let currency_lower = currency.to_ascii_lowercase();
        let params: Vec<(&str, &str)> = vec![
            ("amount", amount_str.as_str()),
            ("currency", currency_lower.as_str()),
            ("metadata[order_id]", order_id),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Stripe intent creation failed");
            return Err(ServiceError::ExternalApiError(format!(
                "stripe intent creation failed with status {}",
                status
            )));
        }

        let intent: PaymentIntent = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe response: {}", e)))?;

        info!(payment_intent_id = %intent.id, "Stripe payment intent created");
        Ok(intent)
    }

    /// Fetches the current state of an intent. The confirm endpoint uses this
    /// to check the intent actually succeeded instead of trusting the client.
    #[instrument(skip(self), fields(intent_id = %intent_id))]
    pub async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalApiError(format!(
                "stripe intent lookup failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe response: {}", e)))
    }

    /// Refunds a captured intent. `amount` in minor units; `None` refunds in
    /// full.
    #[instrument(skip(self), fields(intent_id = %payment_intent_id))]
    pub async fn refund(
        &self,
        payment_intent_id: &str,
        amount: Option<u64>,
    ) -> Result<StripeRefund, ServiceError> {
        let amount_str = amount.map(|a| a.to_string());
        let mut params: Vec<(&str, &str)> = vec![("payment_intent", payment_intent_id)];
        if let Some(ref amount) = amount_str {
            params.push(("amount", amount.as_str()));
        }

        let response = self
            .http
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalApiError(format!(
                "stripe refund failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe response: {}", e)))
    }

    /// Verifies a `Stripe-Signature` header (`t=...,v1=...`) against the raw
    /// payload: HMAC-SHA256 over `"{t}.{payload}"` with the webhook secret,
    /// rejecting timestamps outside the configured tolerance.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        self.verify_webhook_signature_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_unix: i64,
    ) -> bool {
        let mut timestamp = "";
        let mut v1 = "";
        for part in signature_header.split(',') {
            let mut it = part.trim().splitn(2, '=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => timestamp = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if timestamp.is_empty() || v1.is_empty() {
            return false;
        }

        match timestamp.parse::<i64>() {
            Ok(ts) if (now_unix - ts).unsigned_abs() <= self.config.webhook_tolerance_secs => {}
            _ => return false,
        }

        let mut mac = match HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        constant_time_eq(expected.as_bytes(), v1.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test_key".to_string(),
            webhook_secret: "whsec_test".to_string(),
            webhook_tolerance_secs: 300,
        })
    }

    fn sign_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_fresh_correctly_signed_webhook() {
        let gw = gateway();
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let now = 1_700_000_000;
        let header = sign_header("whsec_test", now, payload);
        assert!(gw.verify_webhook_signature_at(payload, &header, now + 10));
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let gw = gateway();
        let payload = b"{}";
        let then = 1_700_000_000;
        let header = sign_header("whsec_test", then, payload);
        assert!(!gw.verify_webhook_signature_at(payload, &header, then + 301));
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let gw = gateway();
        let now = 1_700_000_000;
        let header = sign_header("whsec_test", now, b"{\"a\":1}");
        assert!(!gw.verify_webhook_signature_at(b"{\"a\":2}", &header, now));
    }

    #[test]
    fn rejects_malformed_headers() {
        let gw = gateway();
        assert!(!gw.verify_webhook_signature_at(b"{}", "", 0));
        assert!(!gw.verify_webhook_signature_at(b"{}", "t=abc,v1=", 0));
        assert!(!gw.verify_webhook_signature_at(b"{}", "v1=deadbeef", 0));
    }
}
