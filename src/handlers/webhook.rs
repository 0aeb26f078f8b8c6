use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::errors::AppError;
use crate::services::reconciler;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

// POST /webhook/payments
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match reconciler::ingest(&state, signature, &body, Utc::now()).await {
        Ok(delivery) => (StatusCode::OK, Json(delivery.to_json())).into_response(),
        // The ledger row was not written; a non-2xx makes the gateway redeliver.
        Err(AppError::Store(e)) => {
            tracing::error!(error = %e, "failed to record payment event");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string(), "code": "STORE_UNAVAILABLE"})),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}
