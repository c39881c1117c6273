use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::{config::ShiprocketConfig, errors::ServiceError};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Provider tokens last ~24h; refresh an hour early.
const TOKEN_TTL: chrono::Duration = chrono::Duration::hours(23);

/// One line of an outbound shipment request.
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentItem {
    pub name: String,
    pub sku: String,
    pub units: i32,
    pub selling_price: Decimal,
}

/// Internal order snapshot mapped onto the provider's adhoc-order schema.
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentRequest {
    pub order_number: String,
    pub order_date: DateTime<Utc>,
    pub pickup_location: String,
    pub billing_customer_name: String,
    pub billing_address: String,
    pub billing_city: String,
    pub billing_pincode: String,
    pub billing_state: String,
    pub billing_country: String,
    pub billing_email: String,
    pub billing_phone: String,
    pub items: Vec<ShipmentItem>,
    pub payment_method: PaymentCollection,
    pub sub_total: Decimal,
    pub weight_kg: f64,
    pub length_cm: f64,
    pub breadth_cm: f64,
    pub height_cm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaymentCollection {
    Prepaid,
    Cod,
}

impl PaymentCollection {
    fn as_provider_str(self) -> &'static str {
        match self {
            PaymentCollection::Prepaid => "Prepaid",
            PaymentCollection::Cod => "COD",
        }
    }
}

/// Provider-side shipment created from an order. `awb` stays `None` when the
/// provider accepted the order but courier assignment is still pending.
#[derive(Debug, Clone)]
pub struct RemoteShipment {
    pub order_id: String,
    pub shipment_id: String,
    pub awb: Option<String>,
    pub courier_id: Option<i64>,
    pub courier_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierOption {
    #[serde(rename = "courier_company_id")]
    pub id: i64,
    pub courier_name: String,
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub etd: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CourierChoices {
    pub recommended_id: Option<i64>,
    pub couriers: Vec<CourierOption>,
}

impl CourierChoices {
    /// The provider's recommended courier, falling back to the first
    /// available one.
    pub fn pick(&self) -> Option<&CourierOption> {
        self.recommended_id
            .and_then(|id| self.couriers.iter().find(|c| c.id == id))
            .or_else(|| self.couriers.first())
    }
}

#[derive(Debug, Clone)]
pub struct AwbAssignment {
    pub awb: String,
    pub courier_id: i64,
    pub courier_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingScan {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackingInfo {
    pub awb: String,
    pub current_status: String,
    pub scans: Vec<TrackingScan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupLocation {
    pub pickup_location: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub pin_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PickupConfirmation {
    pub shipment_id: String,
    pub scheduled_at: Option<String>,
}

/// Seam between fulfillment orchestration and the logistics provider. Tests
/// substitute a mock; production wires in `ShiprocketClient`.
#[async_trait]
pub trait LogisticsProvider: Send + Sync {
    async fn create_order(&self, request: &ShipmentRequest)
        -> Result<RemoteShipment, ServiceError>;

    async fn serviceable_couriers(
        &self,
        pickup_pincode: &str,
        delivery_pincode: &str,
        weight_kg: f64,
        cod: bool,
    ) -> Result<CourierChoices, ServiceError>;

    async fn generate_awb(
        &self,
        shipment_id: &str,
        courier_id: i64,
    ) -> Result<AwbAssignment, ServiceError>;

    async fn track_by_awb(&self, awb: &str) -> Result<TrackingInfo, ServiceError>;

    async fn cancel_shipment(&self, awb_codes: &[String]) -> Result<(), ServiceError>;

    async fn request_pickup(&self, shipment_id: &str)
        -> Result<PickupConfirmation, ServiceError>;

    async fn pickup_locations(&self) -> Result<Vec<PickupLocation>, ServiceError>;

    async fn add_pickup_location(
        &self,
        location: &NewPickupLocation,
    ) -> Result<(), ServiceError>;
}

/// Registration payload for a new pickup address at the provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPickupLocation {
    pub pickup_location: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub pin_code: String,
}

struct CachedToken {
    token: String,
    acquired_at: DateTime<Utc>,
}

/// HTTP client for the Shiprocket external API with a lazily refreshed
/// bearer token.
pub struct ShiprocketClient {
    http: reqwest::Client,
    config: ShiprocketConfig,
    token: RwLock<Option<CachedToken>>,
}

impl ShiprocketClient {
    pub fn new(config: ShiprocketConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            config,
            token: RwLock::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.email.is_empty() && !self.config.password.is_empty()
    }

    /// Logs in with the configured credentials and caches the bearer token.
    async fn authenticate(&self) -> Result<String, ServiceError> {
        #[derive(Serialize)]
        struct LoginBody<'a> {
            email: &'a str,
            password: &'a str,
        }
        #[derive(Deserialize)]
        struct LoginResponse {
            token: String,
        }

        let response = self
            .http
            .post(format!("{}/v1/external/auth/login", self.config.base_url))
            .json(&LoginBody {
                email: &self.config.email,
                password: &self.config.password,
            })
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("shiprocket login: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalApiError(format!(
                "shiprocket login failed with status {}",
                response.status()
            )));
        }

        let body: LoginResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalApiError(format!("shiprocket login response: {}", e))
        })?;

        let mut guard = self.token.write().await;
        *guard = Some(CachedToken {
            token: body.token.clone(),
            acquired_at: Utc::now(),
        });
        info!("Shiprocket token refreshed");
        Ok(body.token)
    }

    /// Returns the cached token, re-authenticating when absent or past the
    /// soft expiry.
    async fn bearer(&self) -> Result<String, ServiceError> {
        {
            let guard = self.token.read().await;
            if let Some(cached) = guard.as_ref() {
                if Utc::now() - cached.acquired_at < TOKEN_TTL {
                    return Ok(cached.token.clone());
                }
                debug!("Shiprocket token past soft expiry");
            }
        }
        self.authenticate().await
    }

    async fn clear_token(&self) {
        let mut guard = self.token.write().await;
        *guard = None;
    }

    /// Sends an authorized request; a 401 clears the cached token and retries
    /// once with a fresh login.
    async fn send_authorized(
        &self,
        build: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, ServiceError> {
        let token = self.bearer().await?;
        let response = build(&self.http, &token)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("shiprocket: {}", e)))?;

        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Shiprocket rejected cached token, re-authenticating");
            self.clear_token().await;
            let token = self.bearer().await?;
            build(&self.http, &token)
                .send()
                .await
                .map_err(|e| ServiceError::ExternalApiError(format!("shiprocket: {}", e)))?
        } else {
            response
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Shiprocket request failed");
            return Err(ServiceError::ExternalApiError(format!(
                "shiprocket request failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("shiprocket response: {}", e)))
    }

    /// Verifies the webhook HMAC. Returns `true` when no secret is
    /// configured, in which case verification is disabled.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], signature: Option<&str>) -> bool {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return true;
        };
        let Some(signature) = signature else {
            return false;
        };
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());
        crate::services::payments::constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }
}

#[async_trait]
impl LogisticsProvider for ShiprocketClient {
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_order(
        &self,
        request: &ShipmentRequest,
    ) -> Result<RemoteShipment, ServiceError> {
        let order_items: Vec<serde_json::Value> = request
            .items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "name": item.name,
                    "sku": item.sku,
                    "units": item.units,
                    "selling_price": item.selling_price,
                })
            })
            .collect();

        let body = serde_json::json!({
            "order_id": request.order_number,
            "order_date": request.order_date.format("%Y-%m-%d %H:%M").to_string(),
            "pickup_location": request.pickup_location,
            "billing_customer_name": request.billing_customer_name,
            "billing_last_name": "",
            "billing_address": request.billing_address,
            "billing_city": request.billing_city,
            "billing_pincode": request.billing_pincode,
            "billing_state": request.billing_state,
            "billing_country": request.billing_country,
            "billing_email": request.billing_email,
            "billing_phone": request.billing_phone,
            "shipping_is_billing": true,
            "order_items": order_items,
            "payment_method": request.payment_method.as_provider_str(),
            "sub_total": request.sub_total,
            "length": request.length_cm,
            "breadth": request.breadth_cm,
            "height": request.height_cm,
            "weight": request.weight_kg,
        });

        let url = format!(
            "{}/v1/external/orders/create/adhoc",
            self.config.base_url
        );
        let value = self
            .send_authorized(move |http, token| {
                http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        let order_id = value
            .get("order_id")
            .map(json_id_to_string)
            .ok_or_else(|| {
                ServiceError::ExternalApiError("shiprocket response missing order_id".to_string())
            })?;
        let shipment_id = value
            .get("shipment_id")
            .map(json_id_to_string)
            .ok_or_else(|| {
                ServiceError::ExternalApiError(
                    "shiprocket response missing shipment_id".to_string(),
                )
            })?;
        let awb = value
            .get("awb_code")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let courier_id = value.get("courier_company_id").and_then(|v| v.as_i64());
        let courier_name = value
            .get("courier_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        info!(remote_order = %order_id, shipment = %shipment_id, awb = ?awb, "Shiprocket order created");
        Ok(RemoteShipment {
            order_id,
            shipment_id,
            awb,
            courier_id,
            courier_name,
        })
    }

    #[instrument(skip(self))]
    async fn serviceable_couriers(
        &self,
        pickup_pincode: &str,
        delivery_pincode: &str,
        weight_kg: f64,
        cod: bool,
    ) -> Result<CourierChoices, ServiceError> {
        let url = format!(
            "{}/v1/external/courier/serviceability/?pickup_postcode={}&delivery_postcode={}&weight={}&cod={}",
            self.config.base_url,
            pickup_pincode,
            delivery_pincode,
            weight_kg,
            if cod { 1 } else { 0 }
        );
        let value = self
            .send_authorized(move |http, token| http.get(&url).bearer_auth(token))
            .await?;

        let recommended_id = value
            .pointer("/data/recommended_courier_company_id")
            .and_then(|v| v.as_i64());
        let couriers: Vec<CourierOption> = value
            .pointer("/data/available_courier_companies")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                ServiceError::ExternalApiError(format!("shiprocket serviceability: {}", e))
            })?
            .unwrap_or_default();

        Ok(CourierChoices {
            recommended_id,
            couriers,
        })
    }

    #[instrument(skip(self))]
    async fn generate_awb(
        &self,
        shipment_id: &str,
        courier_id: i64,
    ) -> Result<AwbAssignment, ServiceError> {
        let body = serde_json::json!({
            "shipment_id": shipment_id,
            "courier_id": courier_id,
        });
        let url = format!("{}/v1/external/courier/assign/awb", self.config.base_url);
        let value = self
            .send_authorized(move |http, token| {
                http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        let data = value
            .pointer("/response/data")
            .cloned()
            .unwrap_or(value.clone());
        let awb = data
            .get("awb_code")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::ExternalApiError("AWB assignment returned no code".to_string())
            })?
            .to_string();
        let courier_name = data
            .get("courier_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        info!(awb = %awb, courier = %courier_name, "AWB assigned");
        Ok(AwbAssignment {
            awb,
            courier_id,
            courier_name,
        })
    }

    #[instrument(skip(self))]
    async fn track_by_awb(&self, awb: &str) -> Result<TrackingInfo, ServiceError> {
        let url = format!(
            "{}/v1/external/courier/track/awb/{}",
            self.config.base_url, awb
        );
        let value = self
            .send_authorized(move |http, token| http.get(&url).bearer_auth(token))
            .await?;

        let current_status = value
            .pointer("/tracking_data/shipment_track/0/current_status")
            .and_then(|v| v.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();
        let scans: Vec<TrackingScan> = value
            .pointer("/tracking_data/shipment_track_activities")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ServiceError::ExternalApiError(format!("shiprocket tracking: {}", e)))?
            .unwrap_or_default();

        Ok(TrackingInfo {
            awb: awb.to_string(),
            current_status,
            scans,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_shipment(&self, awb_codes: &[String]) -> Result<(), ServiceError> {
        let body = serde_json::json!({ "awbs": awb_codes });
        let url = format!(
            "{}/v1/external/orders/cancel/shipment/awbs",
            self.config.base_url
        );
        self.send_authorized(move |http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        info!(count = awb_codes.len(), "Shipment cancellation requested");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn request_pickup(
        &self,
        shipment_id: &str,
    ) -> Result<PickupConfirmation, ServiceError> {
        let body = serde_json::json!({ "shipment_id": [shipment_id] });
        let url = format!(
            "{}/v1/external/courier/generate/pickup",
            self.config.base_url
        );
        let value = self
            .send_authorized(move |http, token| {
                http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        let scheduled_at = value
            .pointer("/response/pickup_scheduled_date")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(PickupConfirmation {
            shipment_id: shipment_id.to_string(),
            scheduled_at,
        })
    }

    #[instrument(skip(self))]
    async fn pickup_locations(&self) -> Result<Vec<PickupLocation>, ServiceError> {
        let url = format!(
            "{}/v1/external/settings/company/pickup",
            self.config.base_url
        );
        let value = self
            .send_authorized(move |http, token| http.get(&url).bearer_auth(token))
            .await?;

        let locations: Vec<PickupLocation> = value
            .pointer("/data/shipping_address")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                ServiceError::ExternalApiError(format!("shiprocket pickup locations: {}", e))
            })?
            .unwrap_or_default();

        Ok(locations)
    }

    #[instrument(skip(self, location), fields(name = %location.pickup_location))]
    async fn add_pickup_location(
        &self,
        location: &NewPickupLocation,
    ) -> Result<(), ServiceError> {
        let body = serde_json::to_value(location)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let url = format!(
            "{}/v1/external/settings/company/addpickup",
            self.config.base_url
        );
        self.send_authorized(move |http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        info!(name = %location.pickup_location, "Pickup location registered");
        Ok(())
    }
}

fn json_id_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_secret(secret: Option<&str>) -> ShiprocketClient {
        ShiprocketClient::new(ShiprocketConfig {
            base_url: "https://apiv2.shiprocket.in".to_string(),
            email: "ops@kangan.shop".to_string(),
            password: "pw".to_string(),
            webhook_secret: secret.map(str::to_string),
        })
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn webhook_verification_skipped_without_secret() {
        let client = client_with_secret(None);
        assert!(client.verify_webhook_signature(b"anything", None));
        assert!(client.verify_webhook_signature(b"anything", Some("junk")));
    }

    #[test]
    fn webhook_verification_enforced_with_secret() {
        let client = client_with_secret(Some("sr_secret"));
        let body = br#"{"awb":"123","current_status":"DELIVERED"}"#;
        let good = sign("sr_secret", body);

        assert!(client.verify_webhook_signature(body, Some(&good)));
        assert!(!client.verify_webhook_signature(body, None));
        assert!(!client.verify_webhook_signature(b"other", Some(&good)));
    }

    #[test]
    fn courier_choice_prefers_recommended_then_first() {
        let choices = CourierChoices {
            recommended_id: Some(7),
            couriers: vec![
                CourierOption {
                    id: 3,
                    courier_name: "Bluedart".into(),
                    rate: 90.0,
                    etd: None,
                },
                CourierOption {
                    id: 7,
                    courier_name: "Delhivery".into(),
                    rate: 75.0,
                    etd: None,
                },
            ],
        };
        assert_eq!(choices.pick().unwrap().id, 7);

        let no_recommendation = CourierChoices {
            recommended_id: None,
            couriers: choices.couriers.clone(),
        };
        assert_eq!(no_recommendation.pick().unwrap().id, 3);

        let empty = CourierChoices {
            recommended_id: Some(1),
            couriers: vec![],
        };
        assert!(empty.pick().is_none());
    }
}
