//! Collaborator boundaries: the training provider and the artifact bucket.
//!
//! The reconcilers only see these traits, so tests substitute in-memory
//! fakes and deployments plug in the HTTP implementations.

use crate::models::{EntityKey, EntityKind, TrainingParameters};
use crate::{Result, TrainsyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything the provider needs to start a run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingJobRequest {
    /// Local reference (`<kind>_<id>_<millis>`); providers echo it back as
    /// `output.job_id` in webhooks.
    pub job_reference: String,
    pub version_name: String,
    pub entity: EntityKey,
    pub image_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_url: Option<String>,
    pub parameters: TrainingParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Handle returned by a successful submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedJob {
    /// Provider-assigned job id, when the provider returns one.
    pub provider_job_id: Option<String>,
}

/// Provider answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderJobStatus {
    Found {
        status: String,
        lora_url: Option<String>,
        error: Option<String>,
    },
    /// The provider has no record of the job (not yet, or no longer).
    NotFound,
}

/// One object in the artifact bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub last_modified: String,
}

/// The external training provider.
#[async_trait]
pub trait TrainingClient: Send + Sync {
    async fn submit(&self, request: &TrainingJobRequest) -> Result<SubmittedJob>;

    async fn status(&self, job_id: &str) -> Result<ProviderJobStatus>;
}

/// The artifact bucket.
#[async_trait]
pub trait StorageLister: Send + Sync {
    /// List artifacts stored under the prefix for `kind`.
    async fn list(&self, kind: EntityKind) -> Result<Vec<StorageObject>>;
}

/// Stand-in used when no provider endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredTrainingClient;

#[async_trait]
impl TrainingClient for UnconfiguredTrainingClient {
    async fn submit(&self, _request: &TrainingJobRequest) -> Result<SubmittedJob> {
        Err(TrainsyncError::Config {
            message: "No training provider configured (set providerUrl)".to_string(),
        })
    }

    async fn status(&self, _job_id: &str) -> Result<ProviderJobStatus> {
        Err(TrainsyncError::Config {
            message: "No training provider configured (set providerUrl)".to_string(),
        })
    }
}

/// Stand-in used when no storage listing endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredStorageLister;

#[async_trait]
impl StorageLister for UnconfiguredStorageLister {
    async fn list(&self, _kind: EntityKind) -> Result<Vec<StorageObject>> {
        Err(TrainsyncError::Config {
            message: "No storage listing configured (set storageListUrl)".to_string(),
        })
    }
}
