use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use scrapepilot_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AppError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(AppError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(AppError::Validation(rejection.body_text()))
    }
}

pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) | AppError::SerializationError(_) => StatusCode::BAD_REQUEST,
        AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::NotCancellable(_) | AppError::JobNotReady(_) => StatusCode::CONFLICT,
        AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        AppError::Navigation(_) | AppError::HttpError(_) | AppError::NetworkError(_) => {
            StatusCode::BAD_GATEWAY
        }
        AppError::BrowserLaunch(_) | AppError::ExtractionUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AppError::LlmError { .. } | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);

        // Internal details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}
