use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::AdminUser,
    entities::order::Model as OrderModel,
    errors::ServiceError,
    services::fulfillment::{BulkItemResult, ShipmentOutcome},
    services::shiprocket::NewPickupLocation,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateShipmentRequest {
    pub order_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/shipments",
    request_body = CreateShipmentRequest,
    responses(
        (status = 200, description = "Shipment created or already present", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Order not in a shippable state", body = crate::errors::ErrorResponse),
        (status = 502, description = "Logistics provider error", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn create_shipment(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<CreateShipmentRequest>,
) -> ApiResult<ShipmentOutcome> {
    let automation = state.services.settings.shipment_automation().await?;
    let outcome = state
        .services
        .fulfillment
        .create_shipment(payload.order_id, &automation)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/orders/:id/ship",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Pickup requested, order shipped", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "No shipment to dispatch", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn ship_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderModel> {
    let updated = state.services.fulfillment.ship_order(id).await?;
    Ok(Json(ApiResponse::success(updated)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkOrdersRequest {
    pub order_ids: Vec<Uuid>,
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/bulk/create",
    request_body = BulkOrdersRequest,
    responses(
        (status = 200, description = "Per-order results", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn bulk_create_shipments(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<BulkOrdersRequest>,
) -> ApiResult<Vec<BulkItemResult>> {
    let automation = state.services.settings.shipment_automation().await?;
    let results = state
        .services
        .fulfillment
        .bulk_create_shipments(&payload.order_ids, &automation)
        .await;
    Ok(Json(ApiResponse::success(results)))
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/bulk/ship",
    request_body = BulkOrdersRequest,
    responses(
        (status = 200, description = "Per-order results", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn bulk_ship_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<BulkOrdersRequest>,
) -> ApiResult<Vec<BulkItemResult>> {
    let results = state
        .services
        .fulfillment
        .bulk_ship_orders(&payload.order_ids)
        .await;
    Ok(Json(ApiResponse::success(results)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackingResponse {
    pub awb: String,
    pub current_status: String,
    pub order_status: Option<String>,
    pub scans: Vec<serde_json::Value>,
}

#[utoipa::path(
    get,
    path = "/api/v1/shipping/track/:awb",
    params(("awb" = String, Path, description = "Air waybill number")),
    responses(
        (status = 200, description = "Live tracking from the courier", body = ApiResponse<TrackingResponse>),
        (status = 502, description = "Logistics provider error", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn track_shipment(
    State(state): State<AppState>,
    Path(awb): Path<String>,
) -> ApiResult<TrackingResponse> {
    let info = state.services.fulfillment.track(&awb).await?;
    let order = state.services.orders.find_by_awb(&awb).await?;

    Ok(Json(ApiResponse::success(TrackingResponse {
        awb: info.awb,
        current_status: info.current_status,
        order_status: order.map(|o| o.status.to_string()),
        scans: info
            .scans
            .into_iter()
            .map(|s| serde_json::to_value(s).unwrap_or_default())
            .collect(),
    })))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RatesQuery {
    pub pickup_pincode: Option<String>,
    pub delivery_pincode: String,
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub cod: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/shipping/rates",
    params(RatesQuery),
    responses(
        (status = 200, description = "Serviceable couriers with rates", body = ApiResponse<serde_json::Value>)
    ),
    tag = "shipping"
)]
pub async fn shipping_rates(
    State(state): State<AppState>,
    Query(query): Query<RatesQuery>,
) -> ApiResult<serde_json::Value> {
    let pickup = match query.pickup_pincode {
        Some(pincode) => pincode,
        None => {
            state
                .services
                .settings
                .shipment_automation()
                .await?
                .pickup_pincode
        }
    };

    let choices = state
        .services
        .fulfillment
        .shipping_rates(
            &pickup,
            &query.delivery_pincode,
            query.weight_kg.unwrap_or(0.5),
            query.cod,
        )
        .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "recommended_courier_id": choices.recommended_id,
        "couriers": choices.couriers,
    }))))
}

#[utoipa::path(
    get,
    path = "/api/v1/shipping/pickup-locations",
    responses(
        (status = 200, description = "Registered pickup locations", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn pickup_locations(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<serde_json::Value> {
    let locations = state.services.fulfillment.pickup_locations().await?;
    Ok(Json(ApiResponse::success(
        serde_json::to_value(locations)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/pickup-locations",
    responses(
        (status = 200, description = "Pickup location registered", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn add_pickup_location(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<NewPickupLocation>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .fulfillment
        .add_pickup_location(&payload)
        .await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "registered": payload.pickup_location
    }))))
}

/// Payload Shiprocket posts on shipment status changes.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ShiprocketWebhookPayload {
    #[serde(default)]
    pub awb: Option<serde_json::Value>,
    #[serde(default)]
    pub current_status: Option<String>,
    #[serde(default)]
    pub shipment_status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/shipping/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "shipping"
)]
pub async fn shiprocket_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ServiceError> {
    let signature = headers
        .get("x-api-key")
        .or_else(|| headers.get("x-shiprocket-signature"))
        .and_then(|v| v.to_str().ok());

    if !state
        .services
        .shiprocket
        .verify_webhook_signature(&body, signature)
    {
        warn!("Shiprocket webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let payload: ShiprocketWebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let awb = payload.awb.as_ref().map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let status = payload
        .current_status
        .or(payload.shipment_status)
        .unwrap_or_default();

    match awb {
        Some(awb) if !awb.is_empty() && !status.is_empty() => {
            state
                .services
                .fulfillment
                .handle_tracking_update(&awb, &status)
                .await?;
        }
        _ => {
            info!("Shiprocket webhook without awb/status, acknowledged");
        }
    }

    Ok((StatusCode::OK, "ok"))
}
