//! Response wrapping for dashboard clients.
//!
//! Clients expect `{success: bool, ...data}`. The core API returns raw
//! values, so list and record results are wrapped under a named key here.

use serde_json::{json, Value};

/// Wrap API responses in the `{success, <key>: data}` envelope.
pub fn wrap_response(method: &str, result: Value) -> Value {
    match method {
        // List wrappers
        "list_versions" => {
            json!({
                "success": true,
                "versions": if result.is_null() { json!([]) } else { result }
            })
        }

        "list_entities" => {
            json!({
                "success": true,
                "entities": if result.is_null() { json!([]) } else { result }
            })
        }

        // Record wrappers
        "get_version" | "set_version_quality" => {
            json!({
                "success": true,
                "version": result
            })
        }

        "poll_training_status" => {
            json!({
                "success": true,
                "outcome": result
            })
        }

        "poll_active_versions" | "sync_storage" => {
            json!({
                "success": true,
                "report": if result.is_null() { json!({}) } else { result }
            })
        }

        // submit_training already carries entity, version and localReference
        "submit_training" => merge_success(result),

        // Default: return as-is (for methods not explicitly handled)
        _ => result,
    }
}

fn merge_success(result: Value) -> Value {
    match result {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        other => json!({"success": true, "result": other}),
    }
}
