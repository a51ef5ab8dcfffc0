//! Builder for configuring TrainsyncApi initialization.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::api::state::ApiState;
use crate::config::{PollConfig, ServiceConfig};
use crate::error::{Result, TrainsyncError};
use crate::models::EntityKind;
use crate::network::{
    HttpStorageLister, HttpTrainingClient, StorageLister, TrainingClient,
    UnconfiguredStorageLister, UnconfiguredTrainingClient,
};
use crate::reconcile::{StatusPoller, StorageSyncReconciler, WebhookReconciler};
use crate::store::RegistryStore;
use crate::submission::{DefaultHyperparameterPolicy, HyperparameterPolicy, JobSubmitter};
use crate::TrainsyncApi;

/// Builder for configuring TrainsyncApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use trainsync_core::{ServiceConfig, TrainsyncApi};
///
/// let config = ServiceConfig::load(&data_root)?;
/// let api = TrainsyncApi::builder(&data_root)
///     .auto_create_dirs(true)
///     .with_service_config(&config)?
///     .build()
///     .await?;
/// ```
pub struct TrainsyncApiBuilder {
    data_root: PathBuf,
    auto_create_dirs: bool,
    keep_backups: bool,
    training_client: Option<Arc<dyn TrainingClient>>,
    storage_lister: Option<Arc<dyn StorageLister>>,
    policy: Option<Arc<dyn HyperparameterPolicy>>,
    webhook_url: Option<String>,
    registration_grace: Duration,
    provider_retention: Duration,
    poll_concurrency: usize,
}

impl TrainsyncApiBuilder {
    /// Create a new builder with the data root directory.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            auto_create_dirs: false,
            keep_backups: true,
            training_client: None,
            storage_lister: None,
            policy: None,
            webhook_url: None,
            registration_grace: PollConfig::REGISTRATION_GRACE,
            provider_retention: PollConfig::PROVIDER_RETENTION,
            poll_concurrency: PollConfig::MAX_CONCURRENT_POLLS,
        }
    }

    /// Auto-create the data root and the `styles/` and `actors/` directories.
    ///
    /// Default: `false` (the data root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Keep a `.bak` copy of each registry document on write.
    ///
    /// Default: `true`
    pub fn keep_backups(mut self, enable: bool) -> Self {
        self.keep_backups = enable;
        self
    }

    pub fn with_training_client(mut self, client: Arc<dyn TrainingClient>) -> Self {
        self.training_client = Some(client);
        self
    }

    pub fn with_storage_lister(mut self, lister: Arc<dyn StorageLister>) -> Self {
        self.storage_lister = Some(lister);
        self
    }

    pub fn with_hyperparameter_policy(mut self, policy: Arc<dyn HyperparameterPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Public URL of the webhook endpoint, passed to the provider on submit.
    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }

    /// Override the not-found windows used by status polling.
    pub fn with_poll_windows(mut self, registration_grace: Duration, retention: Duration) -> Self {
        self.registration_grace = registration_grace;
        self.provider_retention = retention;
        self
    }

    /// Maximum number of provider status queries in flight during a poll pass.
    pub fn with_poll_concurrency(mut self, concurrency: usize) -> Self {
        self.poll_concurrency = concurrency;
        self
    }

    /// Create HTTP collaborators from runtime configuration.
    ///
    /// Collaborators set explicitly before this call are kept.
    pub fn with_service_config(mut self, config: &ServiceConfig) -> Result<Self> {
        if self.training_client.is_none() {
            if let Some(url) = config.provider_url.as_deref().filter(|u| !u.is_empty()) {
                let client = HttpTrainingClient::new(url, config.provider_api_key.clone())?;
                self.training_client = Some(Arc::new(client));
            }
        }
        if self.storage_lister.is_none() {
            if let Some(url) = config.storage_list_url.as_deref().filter(|u| !u.is_empty()) {
                self.storage_lister = Some(Arc::new(HttpStorageLister::new(url)?));
            }
        }
        if self.webhook_url.is_none() {
            self.webhook_url = config.webhook_url.clone();
        }
        Ok(self)
    }

    fn create_directory_structure(data_root: &Path) -> Result<()> {
        use std::fs;

        let dirs = std::iter::once(data_root.to_path_buf())
            .chain(EntityKind::ALL.iter().map(|kind| data_root.join(kind.dir_name())));

        for dir in dirs {
            if !dir.exists() {
                fs::create_dir_all(&dir).map_err(|e| TrainsyncError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
            }
        }

        Ok(())
    }

    /// Build the TrainsyncApi instance.
    pub async fn build(self) -> Result<TrainsyncApi> {
        if self.auto_create_dirs {
            Self::create_directory_structure(&self.data_root)?;
        } else if !self.data_root.exists() {
            return Err(TrainsyncError::Config {
                message: format!("Data root does not exist: {}", self.data_root.display()),
            });
        }

        let training_client = self.training_client.unwrap_or_else(|| {
            tracing::warn!("No training provider configured; submit and poll are unavailable");
            Arc::new(UnconfiguredTrainingClient) as Arc<dyn TrainingClient>
        });
        let storage_lister = self.storage_lister.unwrap_or_else(|| {
            tracing::warn!("No storage listing configured; storage sync is unavailable");
            Arc::new(UnconfiguredStorageLister) as Arc<dyn StorageLister>
        });
        let policy = self.policy.unwrap_or_else(|| {
            Arc::new(DefaultHyperparameterPolicy::default()) as Arc<dyn HyperparameterPolicy>
        });

        let store = Arc::new(RegistryStore::new(&self.data_root).with_backups(self.keep_backups));

        let submitter = JobSubmitter::new(store.clone(), training_client.clone(), policy)
            .with_webhook_url(self.webhook_url);
        let webhooks = WebhookReconciler::new(store.clone());
        let poller = StatusPoller::new(store.clone(), training_client)
            .with_windows(self.registration_grace, self.provider_retention)
            .with_concurrency(self.poll_concurrency);
        let storage_sync = StorageSyncReconciler::new(store.clone(), storage_lister);

        tracing::info!("Trainsync API ready at {}", self.data_root.display());

        Ok(TrainsyncApi {
            data_root: self.data_root,
            state: Arc::new(ApiState {
                store,
                submitter,
                webhooks,
                poller,
                storage_sync,
            }),
        })
    }
}
