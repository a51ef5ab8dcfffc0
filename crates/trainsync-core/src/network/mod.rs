//! Provider and storage collaborators.
//!
//! This module provides:
//! - The `TrainingClient` and `StorageLister` traits the reconcilers depend on
//! - HTTP implementations of both
//! - Retry with exponential backoff for provider calls

pub mod client;
pub mod provider;
pub mod retry;
pub mod storage;
pub mod traits;

pub use provider::HttpTrainingClient;
pub use retry::{with_retry, RetryPolicy};
pub use storage::HttpStorageLister;
pub use traits::{
    ProviderJobStatus, StorageLister, StorageObject, SubmittedJob, TrainingClient,
    TrainingJobRequest, UnconfiguredStorageLister, UnconfiguredTrainingClient,
};
