//! Submitting new training runs.
//!
//! A submission touches the registry twice. The first critical section only
//! reserves the next `V<n>` name (in memory, nothing is written). The
//! provider is called with no lock held. The second critical section records
//! the pending version. If the provider call fails the reservation is dropped
//! and the registry is left exactly as it was.

use crate::identity::generate_local_job_id;
use crate::models::{EntityKey, Registry, TrainingVersion};
use crate::network::{TrainingClient, TrainingJobRequest};
use crate::store::RegistryStore;
use crate::submission::policy::HyperparameterPolicy;
use crate::{Result, TrainsyncError};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// A request to train a new version for an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub entity: EntityKey,
    pub image_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_overrides: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_url: Option<String>,
}

impl SubmitRequest {
    pub fn new(entity: EntityKey, image_count: u32) -> Self {
        Self {
            entity,
            image_count,
            parameter_overrides: None,
            description: None,
            dataset_url: None,
        }
    }

    fn validate(&self) -> Result<()> {
        self.entity.validate()?;
        if self.image_count == 0 {
            return Err(TrainsyncError::Validation {
                field: "image_count".to_string(),
                message: "a training run needs at least one image".to_string(),
            });
        }
        Ok(())
    }
}

/// The version recorded for an accepted submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedVersion {
    pub entity: EntityKey,
    pub version: TrainingVersion,
    /// Reference sent to the provider; webhooks echo it as `output.job_id`.
    pub local_reference: String,
}

#[derive(Debug, Clone)]
struct Reservation {
    number: u32,
    reference: String,
}

/// In-flight reservations per entity.
type Reservations = HashMap<EntityKey, Vec<Reservation>>;

/// Releases a reservation when the submission finishes, however it finishes.
struct ReservationGuard<'a> {
    reservations: &'a Mutex<Reservations>,
    key: EntityKey,
    number: u32,
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        let mut reservations = match self.reservations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entries) = reservations.get_mut(&self.key) {
            entries.retain(|r| r.number != self.number);
            if entries.is_empty() {
                reservations.remove(&self.key);
            }
        }
    }
}

/// Creates pending versions and submits them to the provider.
pub struct JobSubmitter {
    store: Arc<RegistryStore>,
    client: Arc<dyn TrainingClient>,
    policy: Arc<dyn HyperparameterPolicy>,
    webhook_url: Option<String>,
    reservations: Mutex<Reservations>,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<RegistryStore>,
        client: Arc<dyn TrainingClient>,
        policy: Arc<dyn HyperparameterPolicy>,
    ) -> Self {
        Self {
            store,
            client,
            policy,
            webhook_url: None,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    /// Completion webhook URL passed to the provider with every run.
    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    /// Submit a new training run.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmittedVersion> {
        request.validate()?;

        let mut parameters = self.policy.compute(request.image_count);
        if let Some(overrides) = &request.parameter_overrides {
            parameters.apply_overrides(overrides);
        }

        let key = request.entity.clone();
        let reservation = self
            .store
            .update(&key, |registry| self.reserve(&key, registry))
            .await?;
        let guard = ReservationGuard {
            reservations: &self.reservations,
            key: key.clone(),
            number: reservation.number,
        };
        let version_name = format!("V{}", reservation.number);

        let job = TrainingJobRequest {
            job_reference: reservation.reference.clone(),
            version_name: version_name.clone(),
            entity: key.clone(),
            image_count: request.image_count,
            dataset_url: request.dataset_url.clone(),
            parameters: parameters.clone(),
            webhook_url: self.webhook_url.clone(),
        };

        let submitted = match self.client.submit(&job).await {
            Ok(submitted) => submitted,
            Err(e) => {
                error!("Submission of {} {} failed: {}", key, version_name, e);
                return Err(e);
            }
        };

        let local_reference = reservation.reference;
        let version = self
            .store
            .update(&key, |registry| {
                let id = match submitted.provider_job_id {
                    Some(id) if registry.find(&id).is_none() => id,
                    Some(id) => {
                        warn!(
                            "Provider job id {} already recorded for {}; using {}",
                            id, key, local_reference
                        );
                        local_reference.clone()
                    }
                    None => local_reference.clone(),
                };

                let name = if registry.contains_name(&version_name) {
                    let renamed = format!("V{}", self.next_number(&key, registry)?);
                    warn!(
                        "{} appeared for {} while submitting; recording as {}",
                        version_name, key, renamed
                    );
                    renamed
                } else {
                    version_name.clone()
                };

                let version = TrainingVersion::pending(
                    id,
                    name,
                    request.description.clone(),
                    parameters.clone(),
                    request.image_count,
                    Utc::now(),
                );
                registry.insert_ordered(version.clone());
                Ok(version)
            })
            .await?;
        drop(guard);

        info!(
            "Recorded pending {} ({}) for {}",
            version.name, version.id, key
        );
        Ok(SubmittedVersion {
            entity: key,
            version,
            local_reference,
        })
    }

    fn lock_reservations(&self, key: &EntityKey) -> Result<std::sync::MutexGuard<'_, Reservations>> {
        self.reservations
            .lock()
            .map_err(|_| TrainsyncError::LockPoisoned {
                entity: key.to_string(),
            })
    }

    fn next_number(&self, key: &EntityKey, registry: &Registry) -> Result<u32> {
        let reservations = self.lock_reservations(key)?;
        let reserved = reservations
            .get(key)
            .and_then(|entries| entries.iter().map(|r| r.number).max())
            .unwrap_or(0);
        Ok(registry.max_version_number().max(reserved) + 1)
    }

    /// Pick the next free name and a job reference no other version uses.
    fn reserve(&self, key: &EntityKey, registry: &Registry) -> Result<Reservation> {
        let number = self.next_number(key, registry)?;
        let mut reservations = self.lock_reservations(key)?;
        let entries = reservations.entry(key.clone()).or_default();

        let mut now = Utc::now();
        let mut reference = generate_local_job_id(key, now);
        while registry.find(&reference).is_some()
            || entries.iter().any(|r| r.reference == reference)
        {
            now += ChronoDuration::milliseconds(1);
            reference = generate_local_job_id(key, now);
        }

        let reservation = Reservation { number, reference };
        entries.push(reservation.clone());
        Ok(reservation)
    }

    #[cfg(test)]
    fn reserved_count(&self) -> usize {
        self.reservations
            .lock()
            .map(|r| r.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VersionStatus;
    use crate::submission::DefaultHyperparameterPolicy;
    use crate::test_support::FakeTrainingClient;
    use serde_json::json;
    use tempfile::TempDir;

    fn submitter(temp_dir: &TempDir, client: Arc<FakeTrainingClient>) -> JobSubmitter {
        JobSubmitter::new(
            Arc::new(RegistryStore::new(temp_dir.path())),
            client,
            Arc::new(DefaultHyperparameterPolicy::default()),
        )
    }

    #[tokio::test]
    async fn test_sequential_submissions_are_numbered() {
        let temp_dir = TempDir::new().unwrap();
        let submitter = submitter(&temp_dir, Arc::new(FakeTrainingClient::new()));
        let key = EntityKey::actor("42");

        let mut names = Vec::new();
        for _ in 0..3 {
            let submitted = submitter
                .submit(SubmitRequest::new(key.clone(), 20))
                .await
                .unwrap();
            names.push(submitted.version.name);
        }
        assert_eq!(names, vec!["V1", "V2", "V3"]);

        let registry = RegistryStore::new(temp_dir.path()).load(&key).unwrap();
        assert_eq!(registry.versions.len(), 3);
        assert!(registry
            .versions
            .iter()
            .all(|v| v.status == VersionStatus::Pending && v.image_count == 20));
        assert_eq!(submitter.reserved_count(), 0);
    }

    #[tokio::test]
    async fn test_numbering_continues_after_gaps() {
        let temp_dir = TempDir::new().unwrap();
        let store = RegistryStore::new(temp_dir.path());
        let key = EntityKey::style("15");
        store
            .update(&key, |registry| {
                registry.versions.push(TrainingVersion::synced_from_storage(
                    "15_ink_V7",
                    "V7",
                    "https://b.s3.amazonaws.com/15_ink_V7.safetensors",
                    Utc::now(),
                ));
                Ok(())
            })
            .await
            .unwrap();

        let submitter = submitter(&temp_dir, Arc::new(FakeTrainingClient::new()));
        let submitted = submitter.submit(SubmitRequest::new(key, 5)).await.unwrap();
        assert_eq!(submitted.version.name, "V8");
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(FakeTrainingClient::new());
        client.fail_submissions(true);
        let submitter = submitter(&temp_dir, client.clone());
        let key = EntityKey::actor("42");

        let result = submitter.submit(SubmitRequest::new(key.clone(), 20)).await;
        assert!(result.is_err());
        assert!(RegistryStore::new(temp_dir.path())
            .load(&key)
            .unwrap()
            .versions
            .is_empty());
        assert_eq!(submitter.reserved_count(), 0);

        // The released name is reused by the next attempt.
        client.fail_submissions(false);
        let submitted = submitter.submit(SubmitRequest::new(key, 20)).await.unwrap();
        assert_eq!(submitted.version.name, "V1");
    }

    #[tokio::test]
    async fn test_zero_images_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(FakeTrainingClient::new());
        let submitter = submitter(&temp_dir, client.clone());

        let err = submitter
            .submit(SubmitRequest::new(EntityKey::actor("42"), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainsyncError::Validation { .. }));
        assert!(client.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entity_ids_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let data_root = temp_dir.path().join("data");
        let client = Arc::new(FakeTrainingClient::new());
        let submitter = JobSubmitter::new(
            Arc::new(RegistryStore::new(&data_root)),
            client.clone(),
            Arc::new(DefaultHyperparameterPolicy::default()),
        );

        for id in ["../../../escaped", "abc", ""] {
            let err = submitter
                .submit(SubmitRequest::new(EntityKey::actor(id), 20))
                .await
                .unwrap_err();
            assert!(matches!(err, TrainsyncError::Validation { .. }), "{:?}", id);
        }
        assert!(client.submissions().is_empty());
        assert!(!temp_dir.path().join("escaped").exists());
        assert!(!data_root.join("actors").exists());
    }

    #[tokio::test]
    async fn test_version_id_prefers_provider_id() {
        let temp_dir = TempDir::new().unwrap();
        let key = EntityKey::actor("42");

        let with_ids = Arc::new(FakeTrainingClient::new().with_provider_ids("job"));
        let submitted = submitter(&temp_dir, with_ids)
            .submit(SubmitRequest::new(key.clone(), 20))
            .await
            .unwrap();
        assert_eq!(submitted.version.id, "job-1");
        assert!(submitted.local_reference.starts_with("actor_42_"));

        let without_ids = Arc::new(FakeTrainingClient::new());
        let submitted = submitter(&temp_dir, without_ids)
            .submit(SubmitRequest::new(key, 20))
            .await
            .unwrap();
        assert_eq!(submitted.version.id, submitted.local_reference);
    }

    #[tokio::test]
    async fn test_overrides_and_request_fields_reach_provider() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(FakeTrainingClient::new());
        let submitter = submitter(&temp_dir, client.clone())
            .with_webhook_url(Some("https://hooks.example.com/webhook/training".into()));

        let mut request = SubmitRequest::new(EntityKey::actor("42"), 20);
        request.description = Some("lower lr".into());
        request.dataset_url = Some("https://b.s3.amazonaws.com/datasets/42.zip".into());
        request.parameter_overrides = json!({"learning_rate": 5e-5, "network_dim": 32})
            .as_object()
            .cloned();

        let submitted = submitter.submit(request).await.unwrap();
        assert_eq!(submitted.version.parameters.learning_rate, Some(5e-5));
        assert_eq!(submitted.version.parameters.max_train_steps, Some(2000));
        assert_eq!(submitted.version.parameters.extra["network_dim"], 32);
        assert_eq!(submitted.version.description.as_deref(), Some("lower lr"));

        let sent = client.submissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].version_name, "V1");
        assert_eq!(sent[0].job_reference, submitted.local_reference);
        assert_eq!(
            sent[0].webhook_url.as_deref(),
            Some("https://hooks.example.com/webhook/training")
        );
        assert_eq!(
            sent[0].dataset_url.as_deref(),
            Some("https://b.s3.amazonaws.com/datasets/42.zip")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_get_unique_names() {
        let temp_dir = TempDir::new().unwrap();
        let client = Arc::new(FakeTrainingClient::new().with_submit_delay_ms(20));
        let submitter = Arc::new(submitter(&temp_dir, client));
        let key = EntityKey::actor("42");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let submitter = submitter.clone();
                let key = key.clone();
                tokio::spawn(async move { submitter.submit(SubmitRequest::new(key, 10)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let registry = RegistryStore::new(temp_dir.path()).load(&key).unwrap();
        let names: Vec<_> = registry.versions.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8"]);

        let mut ids = registry.ids();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
