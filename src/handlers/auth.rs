use axum::{extract::State, Json};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::user::{self, Entity as UserEntity, UserRole},
    errors::ServiceError,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created", body = ApiResponse<AuthResponse>),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<AuthResponse> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let existing = UserEntity::find()
        .filter(user::Column::Email.eq(payload.email.clone()))
        .one(&*state.db)
        .await?;
    if existing.is_some() {
        return Err(ServiceError::Conflict(
            "An account with this email already exists".to_string(),
        ));
    }

    // The very first account becomes the store admin.
    let user_count = UserEntity::find().count(&*state.db).await?;
    let role = if user_count == 0 {
        UserRole::Admin
    } else {
        UserRole::Customer
    };

    let now = Utc::now();
    let created = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(payload.email.clone()),
        password_hash: Set(state.auth.hash_password(&payload.password)?),
        name: Set(payload.name.clone()),
        role: Set(role),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    }
    .insert(&*state.db)
    .await?;

    info!(user_id = %created.id, role = %created.role, "User registered");

    let token = state
        .auth
        .issue_token(created.id, &created.email, created.role)?;
    Ok(Json(ApiResponse::success(AuthResponse {
        token,
        user_id: created.id,
        email: created.email,
        role: created.role,
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<AuthResponse> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let user = UserEntity::find()
        .filter(user::Column::Email.eq(payload.email.clone()))
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("invalid email or password".to_string()))?;

    if !state.auth.verify_password(&payload.password, &user.password_hash)? {
        return Err(ServiceError::Unauthorized(
            "invalid email or password".to_string(),
        ));
    }

    let token = state.auth.issue_token(user.id, &user.email, user.role)?;
    Ok(Json(ApiResponse::success(AuthResponse {
        token,
        user_id: user.id,
        email: user.email,
        role: user.role,
    })))
}
