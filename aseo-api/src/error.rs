//! HTTP error translation: every denial kind the core emits maps to exactly
//! one status code, matched from a core `Result` to a `StatusCode`.

use aseo_core::{CoreError, GateError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ErrorBody {
    fn simple(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            current_usage: None,
            limit: None,
            remaining: None,
            days_left: None,
            billing_end: None,
            status: None,
        }
    }
}

/// Wraps every fallible handler's error so `?` can be used with `CoreResult`
/// directly and `axum` knows how to turn it into a response.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        ApiError(CoreError::Gate(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            CoreError::Gate(GateError::InvalidCredential) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::simple("invalid_credential", "invalid or missing API credential"),
            ),
            CoreError::Gate(GateError::SubscriptionInactive { status }) => (
                StatusCode::PAYMENT_REQUIRED,
                ErrorBody {
                    status: Some(status),
                    ..ErrorBody::simple("subscription_inactive", "subscription is not active")
                },
            ),
            CoreError::Gate(GateError::RateLimitExceeded {
                current_usage,
                limit,
                overage: _,
                days_left,
                cycle_end,
            }) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    current_usage: Some(current_usage),
                    limit: Some(limit),
                    remaining: Some((limit - current_usage).max(0)),
                    days_left: Some(days_left),
                    billing_end: Some(cycle_end),
                    ..ErrorBody::simple("rate_limit_exceeded", "cycle allowance exhausted")
                },
            ),
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::simple("not_found", msg)),
            CoreError::DuplicateResource(msg) => {
                (StatusCode::BAD_REQUEST, ErrorBody::simple("duplicate_resource", msg))
            }
            CoreError::UnauthorizedAdmin => (
                StatusCode::FORBIDDEN,
                ErrorBody::simple("unauthorized_admin", "admin credential missing or invalid"),
            ),
            CoreError::InvalidPlan(msg) => (StatusCode::BAD_REQUEST, ErrorBody::simple("invalid_plan", msg)),
            CoreError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::simple("internal_error", "internal error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
