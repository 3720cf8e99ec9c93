//! services/webui/src/web/response.rs
//!
//! The `{code, message, ...}` JSON envelope shared by every endpoint.
//!
//! `code` mirrors the HTTP status. Endpoint-specific fields are flattened next to
//! `code` and `message`.

use axum::{http::StatusCode, Json};
use chat_core::ports::PortError;
use serde::Serialize;
use tracing::error;

/// Marker payload for responses that carry only `code` and `message`.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T = Empty> {
    pub code: u16,
    pub message: String,
    #[serde(flatten)]
    pub data: T,
}

/// The error half of every handler's return type.
pub type ApiFailure = (StatusCode, Json<ApiResponse>);

pub type ApiResult<T> = Result<T, ApiFailure>;

pub fn ok<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    respond(StatusCode::OK, message, data)
}

pub fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: status.as_u16(),
        message: message.to_string(),
        data,
    })
}

pub fn fail(status: StatusCode, message: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ApiResponse {
            code: status.as_u16(),
            message: message.into(),
            data: Empty::default(),
        }),
    )
}

/// Maps a port error onto a status code, logging anything unexpected.
pub fn port_failure(err: PortError, context: &str) -> ApiFailure {
    match err {
        PortError::NotFound(what) => fail(StatusCode::NOT_FOUND, what),
        PortError::Conflict(what) => fail(StatusCode::CONFLICT, what),
        PortError::Unauthorized => fail(StatusCode::UNAUTHORIZED, "Not authenticated"),
        PortError::Unexpected(reason) => {
            error!("{}: {}", context, reason);
            fail(StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
        }
    }
}
