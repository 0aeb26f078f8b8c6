use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::db::StoreError;
use crate::services::scheduling::SchedulingError;
use crate::services::state_machine::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid webhook signature: {0}")]
    SignatureInvalid(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Store(StoreError::Timeout) => "STORE_TIMEOUT",
            AppError::Store(StoreError::Backend(_)) => "STORE_ERROR",
            AppError::Scheduling(e) => e.code(),
            AppError::Transition(e) => e.code(),
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "INVALID_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Store(StoreError::Timeout) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Scheduling(_) => StatusCode::CONFLICT,
            AppError::Transition(TransitionError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Transition(TransitionError::Store(StoreError::Timeout)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Transition(TransitionError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Transition(_) => StatusCode::CONFLICT,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}
