//! User endpoints.

use super::{ApiError, ApiState};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(super) struct CreateUserRequest {
    telegram_id: i64,
}

#[derive(Serialize)]
pub(super) struct UserResponse {
    telegram_id: i64,
    is_active: bool,
}

pub(super) async fn create(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = state.users.create_user(request.telegram_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            telegram_id: user.telegram_id,
            is_active: user.is_active,
        }),
    ))
}

#[derive(Serialize)]
pub(super) struct ExistsResponse {
    exists: bool,
}

pub(super) async fn exists(
    State(state): State<Arc<ApiState>>,
    Path(telegram_id): Path<i64>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let exists = state.users.user_exists(telegram_id).await?;
    Ok(Json(ExistsResponse { exists }))
}

#[derive(Serialize)]
pub(super) struct ActiveResponse {
    is_active: bool,
}

pub(super) async fn is_active(
    State(state): State<Arc<ApiState>>,
    Path(telegram_id): Path<i64>,
) -> Result<Json<ActiveResponse>, ApiError> {
    let is_active = state.users.is_user_active(telegram_id).await?;
    Ok(Json(ActiveResponse { is_active }))
}

#[derive(Deserialize)]
pub(super) struct SetActiveRequest {
    is_active: bool,
}

pub(super) async fn set_active(
    State(state): State<Arc<ApiState>>,
    Path(telegram_id): Path<i64>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<ActiveResponse>, ApiError> {
    state
        .users
        .set_user_active(telegram_id, request.is_active)
        .await?;
    Ok(Json(ActiveResponse {
        is_active: request.is_active,
    }))
}
