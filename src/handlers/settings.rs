use axum::{extract::State, Json};

use crate::{
    auth::AdminUser,
    entities::store_settings::Model as StoreSettingsModel,
    services::settings::SettingsPatch,
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/settings",
    responses(
        (status = 200, description = "Current store settings", body = ApiResponse<serde_json::Value>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "settings"
)]
pub async fn get_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<StoreSettingsModel> {
    let settings = state.services.settings.get_or_create().await?;
    Ok(Json(ApiResponse::success(settings)))
}

#[utoipa::path(
    put,
    path = "/api/v1/settings",
    responses(
        (status = 200, description = "Settings updated", body = ApiResponse<serde_json::Value>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "settings"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(patch): Json<SettingsPatch>,
) -> ApiResult<StoreSettingsModel> {
    let updated = state.services.settings.update(patch, admin.0.sub).await?;
    Ok(Json(ApiResponse::success(updated)))
}
