//! Provider completion webhook endpoint.
//!
//! Status codes tell the provider whether a redelivery could help:
//! 400 for malformed payloads, 404 when no version matches, 422 when the
//! payload names no entity, 5xx for storage or lock failures.

use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use trainsync_core::WebhookPayload;

pub async fn handle_training_webhook(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> impl IntoResponse {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            warn!("Rejected webhook body: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": rejection.body_text(),
                    "retryable": false,
                })),
            );
        }
    };

    match state.api.handle_webhook(&payload).await {
        Ok(outcome) => {
            if outcome.changed {
                info!(
                    "Webhook moved {} {} to {}",
                    outcome.entity, outcome.version_name, outcome.status
                );
            }
            let mut body = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
            if let Value::Object(map) = &mut body {
                map.insert("success".to_string(), Value::Bool(true));
            }
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warn!("Webhook failed ({}): {}", status, e);
            (
                status,
                Json(json!({
                    "success": false,
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                })),
            )
        }
    }
}
