//! Mail-service catalog endpoints.

use super::{ApiError, ApiState};
use crate::service::ServiceView;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use std::sync::Arc;

pub(super) async fn list(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ServiceView>>, ApiError> {
    let services = state.mailboxes.list_services().await?;
    Ok(Json(services))
}

pub(super) async fn delete(
    State(state): State<Arc<ApiState>>,
    Path(service_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.mailboxes.delete_service(service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
