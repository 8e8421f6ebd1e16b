//! Response envelope and API error mapping.
//!
//! Every JSON endpoint answers with `{ "status", "message", "data" }`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::StoreError;
use crate::todo::TodoError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: EnvelopeStatus,
    pub message: String,
    pub data: Option<T>,
}

/// A successful response with a payload.
pub struct ApiResponse<T> {
    code: StatusCode,
    message: String,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK,
            message: message.into(),
            data,
        }
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::CREATED,
            message: message.into(),
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            status: EnvelopeStatus::Success,
            message: self.message,
            data: Some(self.data),
        };
        (self.code, Json(body)).into_response()
    }
}

/// An error response. Rendered with `data: null`.
#[derive(Debug)]
pub struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: Envelope<()> = Envelope {
            status: EnvelopeStatus::Error,
            message: self.message,
            data: None,
        };
        (self.code, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::not_found(format!("Todo {} not found", id)),
            StoreError::Rejected(TodoError::Validation(msg)) => Self::bad_request(msg),
            StoreError::Rejected(e @ TodoError::InvalidTransition { .. }) => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            StoreError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Task store unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Task store unavailable")
            }
            // Details stay in the log.
            StoreError::InvalidData(msg) => {
                tracing::error!(error = %msg, "Invalid persisted todo data");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred")
            }
        }
    }
}

impl From<TodoError> for ApiError {
    fn from(error: TodoError) -> Self {
        StoreError::Rejected(error).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;
