//! Registry query and curation handlers.

use super::{get_bool_param, get_kind_param, require_entity_param, require_str_param};
use crate::server::AppState;
use serde_json::{json, Value};
use trainsync_core::TrainsyncError;

pub async fn list_versions(state: &AppState, params: &Value) -> trainsync_core::Result<Value> {
    let entity = require_entity_param(params)?;
    let versions = state.api.list_versions(&entity)?;
    Ok(serde_json::to_value(versions)?)
}

pub async fn get_version(state: &AppState, params: &Value) -> trainsync_core::Result<Value> {
    let entity = require_entity_param(params)?;
    let version_id = require_str_param(params, "version_id", "versionId")?;
    let version = state.api.get_version(&entity, &version_id)?;
    Ok(serde_json::to_value(version)?)
}

/// `is_good` may be `true`, `false`, or `null` to clear the flag.
pub async fn set_version_quality(
    state: &AppState,
    params: &Value,
) -> trainsync_core::Result<Value> {
    let entity = require_entity_param(params)?;
    let version_id = require_str_param(params, "version_id", "versionId")?;
    let raw = params
        .get("is_good")
        .or_else(|| params.get("isGood"))
        .ok_or_else(|| TrainsyncError::InvalidParams {
            message: "Missing required parameter: is_good".to_string(),
        })?;
    let is_good = if raw.is_null() {
        None
    } else {
        Some(
            get_bool_param(params, "is_good", "isGood").ok_or_else(|| {
                TrainsyncError::InvalidParams {
                    message: "is_good must be a boolean or null".to_string(),
                }
            })?,
        )
    };

    let version = state
        .api
        .set_version_quality(&entity, &version_id, is_good)
        .await?;
    Ok(serde_json::to_value(version)?)
}

/// Entities with a registry on disk, optionally filtered by `entity_kind`.
pub async fn list_entities(state: &AppState, params: &Value) -> trainsync_core::Result<Value> {
    let kind = get_kind_param(params)?;
    let entities: Vec<Value> = state
        .api
        .list_entities()?
        .into_iter()
        .filter(|key| kind.map_or(true, |k| key.kind == k))
        .map(|key| json!({"kind": key.kind, "entityId": key.entity_id}))
        .collect();
    Ok(Value::Array(entities))
}
