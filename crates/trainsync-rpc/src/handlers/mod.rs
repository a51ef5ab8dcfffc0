//! JSON-RPC and webhook request handlers, split by domain.

mod registry;
mod training;
mod webhook;

pub use webhook::handle_training_webhook;

use crate::server::AppState;
use crate::wrapper::wrap_response;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};
use trainsync_core::{EntityKey, EntityKind, TrainsyncError};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.data = Some(data);
        }
        self
    }
}

const METHOD_NOT_FOUND: i32 = -32601;

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> trainsync_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| TrainsyncError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_bool())
}

/// Extract an optional u64 parameter, supporting both snake_case and camelCase.
pub(crate) fn get_u64_param(params: &Value, snake: &str, camel: &str) -> Option<u64> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_u64())
}

/// Parse an entity kind parameter (`style`/`actor`, plural accepted).
pub(crate) fn get_kind_param(params: &Value) -> trainsync_core::Result<Option<EntityKind>> {
    get_str_param(params, "entity_kind", "entityKind")
        .map(str::parse::<EntityKind>)
        .transpose()
}

/// Require `entity_kind` and `entity_id`.
pub(crate) fn require_entity_param(params: &Value) -> trainsync_core::Result<EntityKey> {
    let kind = get_kind_param(params)?.ok_or_else(|| TrainsyncError::InvalidParams {
        message: "Missing required parameter: entity_kind".to_string(),
    })?;
    let entity_id = require_str_param(params, "entity_id", "entityId")?;
    if !EntityKey::is_valid_id(&entity_id) {
        return Err(TrainsyncError::InvalidParams {
            message: format!("entity_id must be numeric, got {:?}", entity_id),
        });
    }
    Ok(EntityKey::new(kind, entity_id))
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id;

    debug!("RPC call: {}({:?})", method, params);

    // Handle built-in methods
    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    let Some(result) = dispatch_method(&state, method, &params).await else {
        warn!("Unknown RPC method: {}", method);
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        );
    };

    match result {
        Ok(value) => {
            let wrapped = wrap_response(method, value);
            (StatusCode::OK, Json(JsonRpcResponse::success(id, wrapped)))
        }
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            let retryable = e.is_retryable();
            (
                StatusCode::OK,
                Json(
                    JsonRpcResponse::error(id, code, e.to_string())
                        .with_data(json!({ "retryable": retryable })),
                ),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
///
/// Returns `None` for unknown methods.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> Option<trainsync_core::Result<Value>> {
    let result = match method {
        // Training lifecycle
        "submit_training" => training::submit_training(state, params).await,
        "poll_training_status" => training::poll_training_status(state, params).await,
        "poll_active_versions" => training::poll_active_versions(state, params).await,
        "sync_storage" => training::sync_storage(state, params).await,

        // Registry queries
        "list_versions" => registry::list_versions(state, params).await,
        "get_version" => registry::get_version(state, params).await,
        "set_version_quality" => registry::set_version_quality(state, params).await,
        "list_entities" => registry::list_entities(state, params).await,

        _ => return None,
    };
    Some(result)
}
