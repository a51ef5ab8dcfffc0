//! Error types for Trainsync.
//!
//! Every failure the registry and its reconcilers can report lives in
//! [`TrainsyncError`]. Transport layers map these onto HTTP status codes
//! (webhook endpoint) or JSON-RPC error codes (RPC endpoint).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Trainsync library.
#[derive(Debug, Error)]
pub enum TrainsyncError {
    // Payload errors
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Could not resolve an entity from {input:?}")]
    EntityNotResolvable { input: String },

    #[error("Version {version_id} not found in registry for {entity}")]
    VersionNotFound {
        entity: String,
        version_id: String,
        /// Ids present in the registry at lookup time, for diagnosis.
        available: Vec<String>,
    },

    // Registry storage errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Failed to acquire registry lock for {entity}")]
    LockPoisoned { entity: String },

    // Provider errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Training provider returned {status_code:?}: {message}")]
    Provider {
        status_code: Option<u16>,
        message: String,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Trainsync operations.
pub type Result<T> = std::result::Result<T, TrainsyncError>;

impl From<std::io::Error> for TrainsyncError {
    fn from(err: std::io::Error) -> Self {
        TrainsyncError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TrainsyncError {
    fn from(err: serde_json::Error) -> Self {
        TrainsyncError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for TrainsyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrainsyncError::Timeout(std::time::Duration::from_secs(0))
        } else if let Some(status) = err.status() {
            TrainsyncError::Provider {
                status_code: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            TrainsyncError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl TrainsyncError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TrainsyncError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        TrainsyncError::MissingField {
            field: field.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Provider/network error
    /// - -32001: Version not found
    /// - -32002: Entity not resolvable
    /// - -32003: Registry storage error
    /// - -32602: Invalid params (missing field, validation)
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            TrainsyncError::Network { .. }
            | TrainsyncError::Timeout(_)
            | TrainsyncError::Provider { .. } => -32000,

            TrainsyncError::VersionNotFound { .. } => -32001,

            TrainsyncError::EntityNotResolvable { .. } => -32002,

            TrainsyncError::Io { .. }
            | TrainsyncError::Json { .. }
            | TrainsyncError::LockPoisoned { .. } => -32003,

            TrainsyncError::MissingField { .. }
            | TrainsyncError::Validation { .. }
            | TrainsyncError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// HTTP status code for the webhook endpoint.
    pub fn http_status(&self) -> u16 {
        match self {
            TrainsyncError::MissingField { .. }
            | TrainsyncError::Validation { .. }
            | TrainsyncError::InvalidParams { .. } => 400,
            TrainsyncError::VersionNotFound { .. } => 404,
            TrainsyncError::EntityNotResolvable { .. } => 422,
            TrainsyncError::Io { .. }
            | TrainsyncError::Json { .. }
            | TrainsyncError::LockPoisoned { .. } => 503,
            TrainsyncError::Network { .. }
            | TrainsyncError::Timeout(_)
            | TrainsyncError::Provider { .. } => 502,
            _ => 500,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrainsyncError::Network { .. }
            | TrainsyncError::Timeout(_)
            | TrainsyncError::Io { .. }
            | TrainsyncError::LockPoisoned { .. } => true,
            TrainsyncError::Provider { status_code, .. } => {
                matches!(status_code, Some(code) if *code == 429 || *code >= 500)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrainsyncError::VersionNotFound {
            entity: "actor/42".into(),
            version_id: "abc123".into(),
            available: vec!["def456".into()],
        };
        assert_eq!(
            err.to_string(),
            "Version abc123 not found in registry for actor/42"
        );
        assert_eq!(
            TrainsyncError::missing_field("status").to_string(),
            "Missing required field: status"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            TrainsyncError::missing_field("id").to_rpc_error_code(),
            -32602
        );
        assert_eq!(
            TrainsyncError::EntityNotResolvable {
                input: "xyz".into()
            }
            .to_rpc_error_code(),
            -32002
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(TrainsyncError::missing_field("id").http_status(), 400);
        assert_eq!(
            TrainsyncError::EntityNotResolvable { input: "".into() }.http_status(),
            422
        );
        let io = TrainsyncError::from(std::io::Error::other("disk full"));
        assert_eq!(io.http_status(), 503);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(TrainsyncError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(TrainsyncError::from(std::io::Error::other("busy")).is_retryable());
        assert!(TrainsyncError::Provider {
            status_code: Some(503),
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!TrainsyncError::Provider {
            status_code: Some(401),
            message: "unauthorized".into()
        }
        .is_retryable());
        assert!(!TrainsyncError::missing_field("status").is_retryable());
    }
}
