//! Training submission and reconciliation handlers.

use super::{
    get_kind_param, get_str_param, get_u64_param, require_entity_param, require_str_param,
};
use crate::server::AppState;
use serde_json::Value;
use trainsync_core::{SubmitRequest, TrainsyncError};

pub async fn submit_training(state: &AppState, params: &Value) -> trainsync_core::Result<Value> {
    let entity = require_entity_param(params)?;
    let image_count = get_u64_param(params, "image_count", "imageCount")
        .ok_or_else(|| TrainsyncError::InvalidParams {
            message: "Missing required parameter: image_count".to_string(),
        })
        .and_then(|n| {
            u32::try_from(n).map_err(|_| TrainsyncError::InvalidParams {
                message: format!("image_count out of range: {}", n),
            })
        })?;

    let mut request = SubmitRequest::new(entity, image_count);
    request.parameter_overrides = params
        .get("parameter_overrides")
        .or_else(|| params.get("parameterOverrides"))
        .and_then(Value::as_object)
        .cloned();
    request.description = get_str_param(params, "description", "description").map(String::from);
    request.dataset_url = get_str_param(params, "dataset_url", "datasetUrl").map(String::from);

    let submitted = state.api.submit(request).await?;
    Ok(serde_json::to_value(submitted)?)
}

pub async fn poll_training_status(
    state: &AppState,
    params: &Value,
) -> trainsync_core::Result<Value> {
    let entity = require_entity_param(params)?;
    let version_id = require_str_param(params, "version_id", "versionId")?;
    let outcome = state.api.poll(&entity, &version_id).await?;
    Ok(serde_json::to_value(outcome)?)
}

pub async fn poll_active_versions(
    state: &AppState,
    _params: &Value,
) -> trainsync_core::Result<Value> {
    let report = state.api.poll_active(&state.shutdown).await?;
    Ok(serde_json::to_value(report)?)
}

/// Sync one kind when `entity_kind` is given, otherwise every kind.
pub async fn sync_storage(state: &AppState, params: &Value) -> trainsync_core::Result<Value> {
    let report = match get_kind_param(params)? {
        Some(kind) => state.api.sync_storage(kind, &state.shutdown).await?,
        None => state.api.sync_all(&state.shutdown).await?,
    };
    Ok(serde_json::to_value(report)?)
}
