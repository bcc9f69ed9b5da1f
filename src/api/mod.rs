//! Boundary HTTP API.
//!
//! Thin translation layer: handlers validate the request shape, call into
//! the services, and map domain errors onto status codes. Everything
//! user-facing goes through [`Error::user_message`] so internals never leak
//! into responses.

mod mailboxes;
mod services;
mod users;

use crate::error::Error;
use crate::service::{MailboxService, UserService};

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use std::sync::Arc;

pub struct ApiState {
    pub users: UserService,
    pub mailboxes: MailboxService,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/users", post(users::create))
        .route("/api/v1/users/{telegram_id}/exist", get(users::exists))
        .route(
            "/api/v1/users/{telegram_id}/active",
            get(users::is_active).patch(users::set_active),
        )
        .route("/api/v1/mail-services", get(services::list))
        .route(
            "/api/v1/mail-services/{service_id}",
            axum::routing::delete(services::delete),
        )
        .route(
            "/api/v1/users/{telegram_id}/mailboxes",
            post(mailboxes::create).get(mailboxes::list),
        )
        .route(
            "/api/v1/users/{telegram_id}/mailboxes/{box_id}",
            get(mailboxes::get_one).delete(mailboxes::delete),
        )
        .route(
            "/api/v1/users/{telegram_id}/mailboxes/{box_id}/status",
            patch(mailboxes::set_status),
        )
        .with_state(state)
}

/// Domain error carried out of a handler.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::UserNotFound | Error::MailServiceNotFound | Error::MailboxNotFound => {
                StatusCode::NOT_FOUND
            }
            Error::UserAlreadyExists
            | Error::MailboxAlreadyExists
            | Error::MailServiceInUse
            | Error::AuthFailed
            | Error::ConnectionError
            | Error::ServerUnavailable
            | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Other(error) => {
                tracing::error!(%error, "request failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        (
            status,
            Json(serde_json::json!({ "detail": self.0.user_message() })),
        )
            .into_response()
    }
}
