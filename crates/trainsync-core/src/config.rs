//! Centralized configuration for Trainsync.
//!
//! Compile-time defaults live in the constant groups below. Deployment
//! settings (provider endpoints, credentials) come from [`ServiceConfig`],
//! loaded from `config.json` in the data root and overridable through
//! environment variables.

use crate::store::atomic_read_json;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const USER_AGENT: &'static str = "Trainsync/0.3";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
}

/// Status polling windows.
pub struct PollConfig;

impl PollConfig {
    /// A provider "not found" for a version younger than this means the job
    /// is still registering.
    pub const REGISTRATION_GRACE: Duration = Duration::from_secs(120);
    /// Providers forget job status after this long; older "not found" answers
    /// say nothing about the outcome.
    pub const PROVIDER_RETENTION: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
    pub const MAX_CONCURRENT_POLLS: usize = 4;
}

/// Storage sync settings.
pub struct SyncConfig;

impl SyncConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);
    pub const SYNCED_DESCRIPTION: &'static str = "Synced from S3";
    /// Host label marking a transfer-accelerated bucket endpoint.
    pub const ACCELERATED_HOST_MARKER: &'static str = "s3-accelerate";
}

/// On-disk layout of the registry tree.
pub struct PathsConfig;

impl PathsConfig {
    pub const REGISTRY_FILE_NAME: &'static str = "training_versions.json";
    pub const LOCK_FILE_NAME: &'static str = "training_versions.lock";
    pub const GENERIC_DIR_NAME: &'static str = "_generic";
    pub const CONFIG_FILE_NAME: &'static str = "config.json";
    pub const DATA_DIR_NAME: &'static str = "trainsync";
}

/// Runtime settings for the provider and storage collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Base URL of the training provider endpoint.
    #[serde(default)]
    pub provider_url: Option<String>,
    #[serde(default)]
    pub provider_api_key: Option<String>,
    /// URL returning the bucket listing as JSON.
    #[serde(default)]
    pub storage_list_url: Option<String>,
    /// Public URL of our webhook endpoint, handed to the provider on submit.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl ServiceConfig {
    pub const ENV_PROVIDER_URL: &'static str = "TRAINSYNC_PROVIDER_URL";
    pub const ENV_PROVIDER_API_KEY: &'static str = "TRAINSYNC_PROVIDER_API_KEY";
    pub const ENV_STORAGE_LIST_URL: &'static str = "TRAINSYNC_STORAGE_LIST_URL";
    pub const ENV_WEBHOOK_URL: &'static str = "TRAINSYNC_WEBHOOK_URL";

    /// Load `config.json` from the data root (if present), then apply
    /// environment overrides.
    pub fn load(data_root: &Path) -> Result<Self> {
        let path = data_root.join(PathsConfig::CONFIG_FILE_NAME);
        let mut config: ServiceConfig = atomic_read_json(&path)?.unwrap_or_default();
        debug!("Loaded service config from {}", path.display());
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(Self::ENV_PROVIDER_URL) {
            self.provider_url = Some(v);
        }
        if let Some(v) = get(Self::ENV_PROVIDER_API_KEY) {
            self.provider_api_key = Some(v);
        }
        if let Some(v) = get(Self::ENV_STORAGE_LIST_URL) {
            self.storage_list_url = Some(v);
        }
        if let Some(v) = get(Self::ENV_WEBHOOK_URL) {
            self.webhook_url = Some(v);
        }
    }
}

/// Default data root: the platform data directory, or the working directory.
pub fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(PathsConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(PathsConfig::DATA_DIR_NAME))
}
