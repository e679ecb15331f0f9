//! Error types for web handlers.
//!
//! [`AppError`] maps the [`RentalError`] taxonomy onto HTTP statuses and
//! stable machine-readable codes. Every error body has the shape
//! `{"code": ..., "message": ..., "details": ...}`; `details` is only present
//! when the handler attached a payload (for example the verification report of
//! a payment that cleared after its range was lost).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rental_core::error::RentalError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// ```ignore
/// async fn handler() -> Result<Json<Booking>, AppError> {
///     let booking = state.bookings.get(&ctx, id).await?;
///     Ok(Json(booking))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Structured payload returned alongside the error
    details: Option<serde_json::Value>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            details: None,
            source: None,
        }
    }

    /// Attach the internal cause (logged, never returned).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a structured payload returned to the client.
    #[must_use]
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// HTTP status of this error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<RentalError> for AppError {
    fn from(err: RentalError) -> Self {
        let message = err.to_string();
        match err {
            RentalError::Conflict { .. } => Self::new(StatusCode::CONFLICT, "CONFLICT", message),
            RentalError::GatewayUnavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE", message)
            }
            RentalError::PaymentRejected(_) => Self::new(StatusCode::BAD_GATEWAY, "PAYMENT_REJECTED", message),
            RentalError::InvalidAmount(_) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_AMOUNT", message),
            RentalError::InvalidRange { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_RANGE", message)
            }
            RentalError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
            }
            RentalError::GroupClosed { .. } => Self::new(StatusCode::CONFLICT, "GROUP_CLOSED", message),
            RentalError::DuplicateParticipant { .. } => {
                Self::new(StatusCode::CONFLICT, "DUPLICATE_PARTICIPANT", message)
            }
            RentalError::OverCommitted { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "OVER_COMMITTED", message)
            }
            RentalError::GroupFull { .. } => Self::new(StatusCode::CONFLICT, "GROUP_FULL", message),
            RentalError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            RentalError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            RentalError::Validation(_) | RentalError::Overflow(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
            }
            RentalError::Storage(_) => {
                Self::internal("An internal error occurred").with_source(anyhow::Error::new(err))
            }
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::warn!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed upstream"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        (self.status, Json(body)).into_response()
    }
}
