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
pub struct CreateOrderRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    /// Razorpay order id; the storefront hands this to Checkout.js.
    pub razorpay_order_id: String,
    pub amount: u64,
    pub currency: String,
    /// Public key id for frontend initialization.
    pub key_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/razorpay/order",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Razorpay order created", body = ApiResponse<CreateOrderResponse>),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "razorpay"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> ApiResult<CreateOrderResponse> {
    let remote = state
        .services
        .payments
        .create_razorpay_order(payload.order_id)
        .await?;
    Ok(Json(ApiResponse::success(CreateOrderResponse {
        razorpay_order_id: remote.id,
        amount: remote.amount,
        currency: remote.currency,
        key_id: state.services.razorpay.key_id().to_string(),
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/razorpay/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified and confirmed", body = ApiResponse<serde_json::Value>),
        (status = 402, description = "Signature verification failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "razorpay"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> ApiResult<ConfirmationOutcome> {
    let automation = state.services.settings.shipment_automation().await?;
    let outcome = state
        .services
        .payments
        .confirm_razorpay(
            &payload.razorpay_order_id,
            &payload.razorpay_payment_id,
            &payload.razorpay_signature,
            &automation,
        )
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
    path = "/api/v1/razorpay/refund",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund issued", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "razorpay"
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
    path = "/api/v1/razorpay/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "razorpay"
)]
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ServiceError> {
    let signature = headers
        .get("X-Razorpay-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing X-Razorpay-Signature".to_string()))?;

    if !state
        .services
        .razorpay
        .verify_webhook_signature(&body, signature)
    {
        warn!("Razorpay webhook signature verification failed");
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
        .handle_razorpay_event(&payload, &automation)
        .await?;

    Ok((StatusCode::OK, "ok"))
}
