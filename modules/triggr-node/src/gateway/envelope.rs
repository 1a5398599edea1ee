//! Response envelopes. Success: `{data, status, message?, timestamp}`.
//! Errors: HTTP status plus `{code, message, details?, timestamp}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Serialize;

use triggr_common::TriggrError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, data, None)
}

pub fn created<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::CREATED, data, None)
}

pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    envelope(StatusCode::OK, data, Some(message.into()))
}

fn envelope<T: Serialize>(status: StatusCode, data: T, message: Option<String>) -> Response {
    let body = ApiResponse {
        data,
        status: status.as_u16(),
        message,
        timestamp: Utc::now().to_rfc3339(),
    };
    (status, Json(body)).into_response()
}

/// Error wrapper implementing `IntoResponse`; handlers return
/// `Result<Response, ApiError>` and use `?` on anything yielding a
/// `TriggrError`.
#[derive(Debug)]
pub struct ApiError(pub TriggrError);

impl From<TriggrError> for ApiError {
    fn from(err: TriggrError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match &self.0 {
            TriggrError::Validation {
                line: Some(line), ..
            } => Some(serde_json::json!({ "line": line })),
            _ => None,
        };
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
            details,
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}
