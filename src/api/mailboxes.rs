//! Mailbox endpoints.

use super::{ApiError, ApiState};
use crate::models::NewMailbox;
use crate::service::{MailboxDetails, MailboxSummary};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

pub(super) async fn create(
    State(state): State<Arc<ApiState>>,
    Path(telegram_id): Path<i64>,
    Json(request): Json<NewMailbox>,
) -> Result<(StatusCode, Json<MailboxDetails>), ApiError> {
    let details = state.mailboxes.create_mailbox(telegram_id, request).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

pub(super) async fn list(
    State(state): State<Arc<ApiState>>,
    Path(telegram_id): Path<i64>,
) -> Result<Json<Vec<MailboxSummary>>, ApiError> {
    let summaries = state.mailboxes.list_mailboxes(telegram_id).await?;
    Ok(Json(summaries))
}

pub(super) async fn get_one(
    State(state): State<Arc<ApiState>>,
    Path((telegram_id, box_id)): Path<(i64, i64)>,
) -> Result<Json<MailboxDetails>, ApiError> {
    let details = state.mailboxes.get_mailbox(telegram_id, box_id).await?;
    Ok(Json(details))
}

#[derive(Deserialize)]
pub(super) struct SetStatusRequest {
    is_active: bool,
}

pub(super) async fn set_status(
    State(state): State<Arc<ApiState>>,
    Path((telegram_id, box_id)): Path<(i64, i64)>,
    Json(request): Json<SetStatusRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .mailboxes
        .set_mailbox_status(telegram_id, box_id, request.is_active)
        .await?;
    Ok(StatusCode::OK)
}

pub(super) async fn delete(
    State(state): State<Arc<ApiState>>,
    Path((telegram_id, box_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state.mailboxes.delete_mailbox(telegram_id, box_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
