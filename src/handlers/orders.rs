use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::{AdminUser, AuthUser},
    entities::order::{Model as OrderModel, OrderStatus},
    entities::order_tracking_event,
    entities::user::UserRole,
    errors::ServiceError,
    services::orders::{OrderDetail, PlaceOrderRequest},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Filter by lifecycle status (e.g. "confirmed", "ready_to_ship")
    pub status: Option<String>,
}

fn parse_status(value: &str) -> Result<OrderStatus, ServiceError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| ServiceError::ValidationError(format!("Unknown order status '{}'", value)))
}

fn ensure_owner_or_admin(order: &OrderModel, user: &AuthUser) -> Result<(), ServiceError> {
    if user.0.role != UserRole::Admin && order.customer_id != user.0.sub {
        return Err(ServiceError::Forbidden(
            "this order belongs to another customer".to_string(),
        ));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Order placed", body = ApiResponse<serde_json::Value>),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<PlaceOrderRequest>,
) -> ApiResult<OrderDetail> {
    let detail = state
        .services
        .orders
        .place_order(user.0.sub, payload)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders listed", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<PaginatedResponse<OrderModel>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let status = query.status.as_deref().map(parse_status).transpose()?;

    // Customers see their own orders; admins see everything.
    let customer_filter = if user.0.role == UserRole::Admin {
        None
    } else {
        Some(user.0.sub)
    };

    let (orders, total) = state
        .services
        .orders
        .list_orders(page, limit, status, customer_filter)
        .await?;

    let total_pages = total.div_ceil(limit);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: orders,
        total,
        page,
        limit,
        total_pages,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/:id",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order fetched", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let detail = state.services.orders.get_order(id).await?;
    ensure_owner_or_admin(&detail.order, &user)?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:id/approve",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order approved", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn approve_order(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderModel> {
    let updated = state.services.orders.approve_order(id, admin.0.sub).await?;
    Ok(Json(ApiResponse::success(updated)))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:id/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelOrderRequest>>,
) -> ApiResult<OrderModel> {
    let order = state.services.orders.get_order_model(id).await?;
    ensure_owner_or_admin(&order, &user)?;

    let reason = payload.and_then(|Json(p)| p.reason);
    let updated = state
        .services
        .orders
        .cancel_order(id, reason, Some(&user.0.sub.to_string()))
        .await?;

    // The remote shipment, when one was already registered, is withdrawn
    // best-effort; the cancellation itself has already been recorded.
    if order.has_remote_shipment() {
        state.services.fulfillment.cancel_remote_shipment(&order).await;
    }

    Ok(Json(ApiResponse::success(updated)))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReturnOrderRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:id/return",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ReturnOrderRequest,
    responses(
        (status = 200, description = "Return registered", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Outside the return window", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn return_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReturnOrderRequest>>,
) -> ApiResult<OrderModel> {
    let order = state.services.orders.get_order_model(id).await?;
    ensure_owner_or_admin(&order, &user)?;

    let reason = payload.and_then(|Json(p)| p.reason);
    let updated = state
        .services
        .orders
        .return_order(id, reason, Some(&user.0.sub.to_string()))
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/:id/tracking",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Tracking history", body = ApiResponse<serde_json::Value>)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn order_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<order_tracking_event::Model>> {
    let detail = state.services.orders.get_order(id).await?;
    ensure_owner_or_admin(&detail.order, &user)?;
    Ok(Json(ApiResponse::success(detail.tracking)))
}
