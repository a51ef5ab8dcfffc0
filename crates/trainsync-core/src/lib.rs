//! Trainsync Core - training version registry and completion reconciliation.
//!
//! This crate tracks externally executed fine-tuning runs. Each owning entity
//! (a style or an actor) has a small JSON registry of training versions, and
//! three unreliable sources report on those runs: provider webhooks, provider
//! status queries and the artifact bucket listing. The reconcilers fold every
//! observation into the registry so that duplicate, late or missing updates
//! converge on one consistent state.
//!
//! It can be used programmatically without any HTTP/RPC layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use trainsync_core::{EntityKey, SubmitRequest, TrainsyncApi};
//!
//! #[tokio::main]
//! async fn main() -> trainsync_core::Result<()> {
//!     let api = TrainsyncApi::new("/path/to/data").await?;
//!
//!     let submitted = api.submit(SubmitRequest::new(EntityKey::actor("42"), 20)).await?;
//!     println!("Submitted {} ({})", submitted.version.name, submitted.version.id);
//!
//!     for version in api.list_versions(&EntityKey::actor("42"))? {
//!         println!("{} {}", version.name, version.status);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod network;
pub mod reconcile;
pub mod store;
pub mod submission;

mod api;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::ServiceConfig;
pub use error::{Result, TrainsyncError};
pub use identity::JobReference;
pub use models::{EntityKey, EntityKind, TrainingParameters, TrainingVersion, VersionStatus};
pub use network::{
    ProviderJobStatus, StorageLister, StorageObject, SubmittedJob, TrainingClient,
    TrainingJobRequest,
};
pub use reconcile::{
    PollOutcome, PollReport, SyncReport, WebhookOutcome, WebhookOutput, WebhookPayload,
};
pub use store::RegistryStore;
pub use submission::{
    DefaultHyperparameterPolicy, HyperparameterPolicy, SubmitRequest, SubmittedVersion,
};

// Re-export builder from api module
pub use api::TrainsyncApiBuilder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use api::ApiState;

/// Main API struct for Trainsync operations.
///
/// Cheap to clone; clones share the same registry store, reservation table
/// and collaborators.
#[derive(Clone)]
pub struct TrainsyncApi {
    data_root: PathBuf,
    state: Arc<ApiState>,
}

impl TrainsyncApi {
    /// Create a builder for TrainsyncApi.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let api = TrainsyncApi::builder("./data")
    ///     .auto_create_dirs(true)
    ///     .with_training_client(client)
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder(data_root: impl Into<PathBuf>) -> TrainsyncApiBuilder {
        TrainsyncApiBuilder::new(data_root)
    }

    /// Create a new TrainsyncApi configured from `config.json` and the
    /// environment.
    ///
    /// # Arguments
    ///
    /// * `data_root` - Directory holding the `styles/` and `actors/` registries
    pub async fn new(data_root: impl Into<PathBuf>) -> Result<Self> {
        let data_root = data_root.into();
        let config = ServiceConfig::load(&data_root)?;
        TrainsyncApiBuilder::new(data_root)
            .with_service_config(&config)?
            .build()
            .await
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}
