use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use bytes::Bytes;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AdminUser,
    entities::order::Model as OrderModel,
    errors::ServiceError,
    services::payments::ConfirmationOutcome,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIntentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: u64,
    pub currency: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/intent",
    request_body = CreateIntentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = ApiResponse<CreateIntentResponse>),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    Json(payload): Json<CreateIntentRequest>,
) -> ApiResult<CreateIntentResponse> {
    let intent = state
        .services
        .payments
        .create_stripe_intent(payload.order_id)
        .await?;
    Ok(Json(ApiResponse::success(CreateIntentResponse {
        payment_intent_id: intent.id,
        client_secret: intent.client_secret,
        amount: intent.amount,
        currency: intent.currency,
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<serde_json::Value>),
        (status = 402, description = "Payment not successful", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> ApiResult<ConfirmationOutcome> {
    let automation = state.services.settings.shipment_automation().await?;
    let outcome = state
        .services
        .payments
        .confirm_stripe(&payload.payment_intent_id, &automation)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundRequest {
    pub order_id: Uuid,
    /// Major units; omit for a full refund.
    pub amount: Option<Decimal>,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund issued", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Nothing to refund", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<RefundRequest>,
) -> ApiResult<OrderModel> {
    let order = state
        .services
        .payments
        .refund(payload.order_id, payload.amount)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ServiceError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing Stripe-Signature".to_string()))?;

    if !state.services.stripe.verify_webhook_signature(&body, signature) {
        warn!("Stripe webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let automation = state.services.settings.shipment_automation().await?;
    state
        .services
        .payments
        .handle_stripe_event(&payload, &automation)
        .await?;

    Ok((StatusCode::OK, "ok"))
}
