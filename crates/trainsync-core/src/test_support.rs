//! In-memory collaborators for unit tests.

use crate::models::EntityKind;
use crate::network::{
    ProviderJobStatus, StorageLister, StorageObject, SubmittedJob, TrainingClient,
    TrainingJobRequest,
};
use crate::{Result, TrainsyncError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeTrainingClient {
    submissions: Mutex<Vec<TrainingJobRequest>>,
    statuses: Mutex<HashMap<String, ProviderJobStatus>>,
    fail_submit: AtomicBool,
    provider_id_prefix: Option<String>,
    next_id: AtomicU64,
    submit_delay: Option<Duration>,
    status_calls: AtomicUsize,
}

impl FakeTrainingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `<prefix>-<n>` as the provider job id.
    pub fn with_provider_ids(mut self, prefix: &str) -> Self {
        self.provider_id_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_submit_delay_ms(mut self, millis: u64) -> Self {
        self.submit_delay = Some(Duration::from_millis(millis));
        self
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_status(&self, job_id: &str, status: ProviderJobStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), status);
    }

    pub fn found(status: &str, lora_url: Option<&str>, error: Option<&str>) -> ProviderJobStatus {
        ProviderJobStatus::Found {
            status: status.to_string(),
            lora_url: lora_url.map(String::from),
            error: error.map(String::from),
        }
    }

    pub fn submissions(&self) -> Vec<TrainingJobRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrainingClient for FakeTrainingClient {
    async fn submit(&self, request: &TrainingJobRequest) -> Result<SubmittedJob> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(TrainsyncError::Provider {
                status_code: Some(500),
                message: "provider unavailable".to_string(),
            });
        }
        self.submissions.lock().unwrap().push(request.clone());
        let provider_job_id = self.provider_id_prefix.as_ref().map(|prefix| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{}", prefix, n)
        });
        Ok(SubmittedJob { provider_job_id })
    }

    async fn status(&self, job_id: &str) -> Result<ProviderJobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or(ProviderJobStatus::NotFound))
    }
}

#[derive(Default)]
pub(crate) struct FakeStorageLister {
    objects: Mutex<HashMap<EntityKind, Vec<StorageObject>>>,
    failing: Mutex<Vec<EntityKind>>,
}

impl FakeStorageLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: EntityKind, objects: Vec<StorageObject>) {
        self.objects.lock().unwrap().insert(kind, objects);
    }

    pub fn fail(&self, kind: EntityKind) {
        self.failing.lock().unwrap().push(kind);
    }

    pub fn object(filename: &str, url: &str) -> StorageObject {
        StorageObject {
            filename: filename.to_string(),
            url: url.to_string(),
            last_modified: String::new(),
        }
    }
}

#[async_trait]
impl StorageLister for FakeStorageLister {
    async fn list(&self, kind: EntityKind) -> Result<Vec<StorageObject>> {
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(TrainsyncError::Network {
                message: format!("listing {} failed", kind.dir_name()),
                source: None,
            });
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}
