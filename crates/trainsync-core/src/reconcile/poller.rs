//! Pull-based status checks against the training provider.
//!
//! The provider forgets jobs: shortly after submission it may not know a job
//! yet, and some time after completion it drops the record. A "not found"
//! answer is therefore never treated as a failure.

use crate::cancel::CancellationToken;
use crate::config::PollConfig;
use crate::identity::strip_retry_suffix;
use crate::models::{Applied, EntityKey, VersionStatus};
use crate::network::{ProviderJobStatus, TrainingClient};
use crate::reconcile::{classify_poll_status, default_failure_message, ProviderState};
use crate::store::RegistryStore;
use crate::{Result, TrainsyncError};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of polling one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed {
        lora_url: Option<String>,
        changed: bool,
    },
    Failed {
        error: String,
        changed: bool,
    },
    InProgress {
        provider_status: String,
    },
    /// The provider does not know the job yet.
    StillRegistering {
        age_secs: u64,
    },
    /// The provider does not know the job and it is too old to still be
    /// registering. The version is left untouched.
    Indeterminate {
        warning: String,
        beyond_retention: bool,
    },
    /// The version was already completed or failed.
    AlreadyTerminal {
        status: VersionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollFailure {
    pub entity: String,
    pub version_id: String,
    pub error: String,
}

/// Aggregate of a [`StatusPoller::poll_active`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub still_registering: usize,
    pub indeterminate: usize,
    pub errors: Vec<PollFailure>,
    pub cancelled: bool,
}

impl PollReport {
    fn record(&mut self, outcome: &PollOutcome) {
        self.polled += 1;
        match outcome {
            PollOutcome::Completed { .. } => self.completed += 1,
            PollOutcome::Failed { .. } => self.failed += 1,
            PollOutcome::InProgress { .. } => self.in_progress += 1,
            PollOutcome::StillRegistering { .. } => self.still_registering += 1,
            PollOutcome::Indeterminate { .. } => self.indeterminate += 1,
            PollOutcome::AlreadyTerminal { .. } => {}
        }
    }
}

/// Queries the provider for non-terminal versions and applies the answers.
pub struct StatusPoller {
    store: Arc<RegistryStore>,
    client: Arc<dyn TrainingClient>,
    registration_grace: Duration,
    retention: Duration,
    concurrency: usize,
}

impl StatusPoller {
    pub fn new(store: Arc<RegistryStore>, client: Arc<dyn TrainingClient>) -> Self {
        Self {
            store,
            client,
            registration_grace: PollConfig::REGISTRATION_GRACE,
            retention: PollConfig::PROVIDER_RETENTION,
            concurrency: PollConfig::MAX_CONCURRENT_POLLS,
        }
    }

    pub fn with_windows(mut self, registration_grace: Duration, retention: Duration) -> Self {
        self.registration_grace = registration_grace;
        self.retention = retention;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Poll one version and apply the provider's answer.
    pub async fn poll(&self, key: &EntityKey, version_id: &str) -> Result<PollOutcome> {
        let registry = self.store.load(key)?;
        let version = registry
            .find(version_id)
            .ok_or_else(|| TrainsyncError::VersionNotFound {
                entity: key.to_string(),
                version_id: version_id.to_string(),
                available: registry.ids(),
            })?;

        if version.status.is_terminal() {
            return Ok(PollOutcome::AlreadyTerminal {
                status: version.status,
            });
        }
        let age = (Utc::now() - version.timestamp).to_std().unwrap_or_default();

        // Retry suffixes are local; the provider only knows the bare id.
        let provider_id = strip_retry_suffix(version_id);
        let (provider_status, lora_url, error) = match self.client.status(provider_id).await? {
            ProviderJobStatus::NotFound => return Ok(self.not_found(key, version_id, age)),
            ProviderJobStatus::Found {
                status,
                lora_url,
                error,
            } => (status, lora_url, error),
        };

        let state = classify_poll_status(&provider_status);
        debug!(
            "Provider reports {} for {} of {} ({:?})",
            provider_status, version_id, key, state
        );
        if state == ProviderState::InProgress {
            return Ok(PollOutcome::InProgress { provider_status });
        }

        let observed_at = Utc::now();
        self.store
            .update(key, |registry| {
                let available = registry.ids();
                let version =
                    registry
                        .find_mut(version_id)
                        .ok_or_else(|| TrainsyncError::VersionNotFound {
                            entity: key.to_string(),
                            version_id: version_id.to_string(),
                            available,
                        })?;

                // A webhook may have landed while the provider was being asked.
                if version.status.is_terminal()
                    && !(state == ProviderState::Succeeded
                        && version.status == VersionStatus::Completed)
                {
                    return Ok(PollOutcome::AlreadyTerminal {
                        status: version.status,
                    });
                }

                let outcome = match state {
                    ProviderState::Succeeded => {
                        let applied =
                            version.apply_completion(lora_url.as_deref(), observed_at, false);
                        PollOutcome::Completed {
                            lora_url: version.lora_url.clone(),
                            changed: applied == Applied::Changed,
                        }
                    }
                    _ => {
                        let message = error
                            .clone()
                            .unwrap_or_else(|| default_failure_message(&provider_status));
                        let applied = version.apply_failure(message, observed_at);
                        PollOutcome::Failed {
                            error: version.error.clone().unwrap_or_default(),
                            changed: applied == Applied::Changed,
                        }
                    }
                };
                info!("Polled {} {} of {}: {}", version.name, version.id, key, version.status);
                Ok(outcome)
            })
            .await
    }

    fn not_found(&self, key: &EntityKey, version_id: &str, age: Duration) -> PollOutcome {
        if age < self.registration_grace {
            debug!("{} of {} not registered with the provider yet", version_id, key);
            return PollOutcome::StillRegistering {
                age_secs: age.as_secs(),
            };
        }

        let beyond_retention = age > self.retention;
        let warning = if beyond_retention {
            format!(
                "Provider has no record of {} ({} min old); it may have expired. Check storage for the artifact.",
                version_id,
                age.as_secs() / 60
            )
        } else {
            format!(
                "Provider has no record of {} ({} s old); the submission may have been lost.",
                version_id,
                age.as_secs()
            )
        };
        warn!("{} ({})", warning, key);
        PollOutcome::Indeterminate {
            warning,
            beyond_retention,
        }
    }

    /// Poll every non-terminal version of every known entity.
    ///
    /// Stops issuing new polls once `cancel` fires; polls already in flight
    /// finish and are counted.
    pub async fn poll_active(&self, cancel: &CancellationToken) -> Result<PollReport> {
        let mut report = PollReport::default();
        let mut targets = Vec::new();

        for key in self.store.list_entities()? {
            match self.store.load(&key) {
                Ok(registry) => {
                    targets.extend(registry.active().map(|v| (key.clone(), v.id.clone())));
                }
                Err(e) => {
                    warn!("Skipping {} in poll pass: {}", key, e);
                    report.errors.push(PollFailure {
                        entity: key.to_string(),
                        version_id: String::new(),
                        error: e.to_string(),
                    });
                }
            }
        }
        debug!("Polling {} active versions", targets.len());

        let results: Vec<_> = stream::iter(targets)
            .map(|(key, version_id)| async move {
                if cancel.is_cancelled() {
                    return (key, version_id, None);
                }
                let result = self.poll(&key, &version_id).await;
                (key, version_id, Some(result))
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (key, version_id, result) in results {
            match result {
                None => report.cancelled = true,
                Some(Ok(outcome)) => report.record(&outcome),
                Some(Err(e)) => {
                    warn!("Poll of {} for {} failed: {}", version_id, key, e);
                    report.errors.push(PollFailure {
                        entity: key.to_string(),
                        version_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.polled > 0 || !report.errors.is_empty() {
            info!(
                "Poll pass: {} polled, {} completed, {} failed, {} errors",
                report.polled,
                report.completed,
                report.failed,
                report.errors.len()
            );
        }
        Ok(report)
    }
}
