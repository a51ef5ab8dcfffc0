//! Integration tests for the TrainsyncApi public interface.
//!
//! These drive the full flow (submit, webhook, poll, storage sync) through
//! the public API with in-memory provider and storage collaborators.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trainsync_core::{
    CancellationToken, EntityKey, EntityKind, PollOutcome, ProviderJobStatus, StorageLister,
    StorageObject, SubmitRequest, SubmittedJob, TrainingClient, TrainingJobRequest, TrainsyncApi,
    TrainsyncError, VersionStatus, WebhookPayload,
};

const PLAIN: &str = "https://bucket.s3.amazonaws.com/actors/actor_42_V1.safetensors";
const FAST: &str = "https://bucket.s3-accelerate.amazonaws.com/actors/actor_42_V1.safetensors";

#[derive(Default)]
struct ScriptedProvider {
    statuses: Mutex<HashMap<String, ProviderJobStatus>>,
    submitted: Mutex<Vec<TrainingJobRequest>>,
}

#[async_trait]
impl TrainingClient for ScriptedProvider {
    async fn submit(&self, request: &TrainingJobRequest) -> trainsync_core::Result<SubmittedJob> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(SubmittedJob::default())
    }

    async fn status(&self, job_id: &str) -> trainsync_core::Result<ProviderJobStatus> {
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
struct ScriptedBucket {
    objects: Mutex<HashMap<EntityKind, Vec<StorageObject>>>,
}

#[async_trait]
impl StorageLister for ScriptedBucket {
    async fn list(&self, kind: EntityKind) -> trainsync_core::Result<Vec<StorageObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}

struct TestEnv {
    _temp_dir: TempDir,
    api: TrainsyncApi,
    provider: Arc<ScriptedProvider>,
    bucket: Arc<ScriptedBucket>,
}

async fn create_test_env() -> TestEnv {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let provider = Arc::new(ScriptedProvider::default());
    let bucket = Arc::new(ScriptedBucket::default());
    let api = TrainsyncApi::builder(temp_dir.path())
        .auto_create_dirs(true)
        .with_training_client(provider.clone())
        .with_storage_lister(bucket.clone())
        .build()
        .await
        .expect("Failed to build API");
    TestEnv {
        _temp_dir: temp_dir,
        api,
        provider,
        bucket,
    }
}

#[tokio::test]
async fn test_api_creation_fails_for_nonexistent_path() {
    let result = TrainsyncApi::builder("/nonexistent/path/that/does/not/exist")
        .build()
        .await;
    assert!(matches!(result, Err(TrainsyncError::Config { .. })));
}

#[tokio::test]
async fn test_auto_create_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("data");
    let api = TrainsyncApi::builder(&root)
        .auto_create_dirs(true)
        .build()
        .await
        .unwrap();
    assert_eq!(api.data_root(), root.as_path());
    assert!(root.join("styles").is_dir());
    assert!(root.join("actors").is_dir());
}

#[tokio::test]
async fn test_unconfigured_provider_rejects_submission() {
    let temp_dir = TempDir::new().unwrap();
    let api = TrainsyncApi::builder(temp_dir.path()).build().await.unwrap();

    let err = api
        .submit(SubmitRequest::new(EntityKey::actor("42"), 20))
        .await
        .unwrap_err();
    assert!(matches!(err, TrainsyncError::Config { .. }));
    assert!(api.list_versions(&EntityKey::actor("42")).unwrap().is_empty());
}

#[tokio::test]
async fn test_end_to_end_submit_webhook_sync() {
    let env = create_test_env().await;
    let key = EntityKey::actor("42");

    // Submit: pending V1 with the local reference as id.
    let submitted = env.api.submit(SubmitRequest::new(key.clone(), 20)).await.unwrap();
    assert_eq!(submitted.version.name, "V1");
    assert_eq!(submitted.version.status, VersionStatus::Pending);
    assert_eq!(submitted.version.image_count, 20);
    assert_eq!(env.provider.submitted.lock().unwrap().len(), 1);

    // Webhook from the provider under its own id, echoing our reference.
    let payload: WebhookPayload = serde_json::from_value(json!({
        "id": "provider-abc",
        "status": "COMPLETED",
        "output": {"job_id": submitted.local_reference, "loraUrl": PLAIN}
    }))
    .unwrap();
    let outcome = env.api.handle_webhook(&payload).await.unwrap();
    assert_eq!(outcome.status, VersionStatus::Completed);
    assert_eq!(outcome.version_name, "V1");

    // Bucket listing with the accelerated URL upgrades the artifact.
    env.bucket.objects.lock().unwrap().insert(
        EntityKind::Actor,
        vec![StorageObject {
            filename: "actor_42_V1.safetensors".into(),
            url: FAST.into(),
            last_modified: "2024-05-01T10:00:00Z".into(),
        }],
    );
    let report = env.api.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 0);

    let versions = env.api.list_versions(&key).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].status, VersionStatus::Completed);
    assert_eq!(versions[0].lora_url.as_deref(), Some(FAST));
    assert!(versions[0].last_synced.is_some());
    assert_eq!(env.api.list_entities().unwrap(), vec![key]);
}

#[tokio::test]
async fn test_poll_then_webhook_converge() {
    let env = create_test_env().await;
    let key = EntityKey::actor("42");
    let submitted = env.api.submit(SubmitRequest::new(key.clone(), 20)).await.unwrap();
    let id = submitted.version.id.clone();

    env.provider.statuses.lock().unwrap().insert(
        id.clone(),
        ProviderJobStatus::Found {
            status: "COMPLETED".into(),
            lora_url: Some(PLAIN.into()),
            error: None,
        },
    );
    let outcome = env.api.poll(&key, &id).await.unwrap();
    assert!(matches!(outcome, PollOutcome::Completed { changed: true, .. }));
    let after_poll = env.api.get_version(&key, &id).unwrap();

    // A late webhook for the same completion changes nothing.
    let payload: WebhookPayload = serde_json::from_value(json!({
        "id": id, "status": "COMPLETED", "output": {"loraUrl": PLAIN}
    }))
    .unwrap();
    let outcome = env.api.handle_webhook(&payload).await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(env.api.get_version(&key, &id).unwrap(), after_poll);

    // And a poll on the now-terminal version leaves it alone.
    let outcome = env.api.poll(&key, &id).await.unwrap();
    assert_eq!(
        outcome,
        PollOutcome::AlreadyTerminal {
            status: VersionStatus::Completed
        }
    );
}

#[tokio::test]
async fn test_sync_records_unregistered_artifacts() {
    let env = create_test_env().await;
    env.bucket.objects.lock().unwrap().insert(
        EntityKind::Style,
        vec![
            StorageObject {
                filename: "15_watercolor_V2.safetensors".into(),
                url: "https://bucket.s3.amazonaws.com/styles/15_watercolor_V2.safetensors".into(),
                last_modified: String::new(),
            },
            StorageObject {
                filename: "15_watercolor_V1.safetensors".into(),
                url: "https://bucket.s3.amazonaws.com/styles/15_watercolor_V1.safetensors".into(),
                last_modified: String::new(),
            },
        ],
    );

    let report = env
        .api
        .sync_storage(EntityKind::Style, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.created, 2);

    let versions = env.api.list_versions(&EntityKey::style("15")).unwrap();
    let names: Vec<_> = versions.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["V1", "V2"]);

    // The next submission continues the numbering.
    let submitted = env
        .api
        .submit(SubmitRequest::new(EntityKey::style("15"), 8))
        .await
        .unwrap();
    assert_eq!(submitted.version.name, "V3");
}

#[tokio::test]
async fn test_set_version_quality() {
    let env = create_test_env().await;
    let key = EntityKey::actor("42");
    let submitted = env.api.submit(SubmitRequest::new(key.clone(), 20)).await.unwrap();

    let version = env
        .api
        .set_version_quality(&key, &submitted.version.id, Some(true))
        .await
        .unwrap();
    assert_eq!(version.is_good, Some(true));
    assert_eq!(
        env.api.get_version(&key, &submitted.version.id).unwrap().is_good,
        Some(true)
    );

    let err = env
        .api
        .set_version_quality(&key, "missing", Some(false))
        .await
        .unwrap_err();
    assert!(matches!(err, TrainsyncError::VersionNotFound { .. }));
}

#[tokio::test]
async fn test_registry_document_layout() {
    let env = create_test_env().await;
    std::fs::create_dir_all(env.api.data_root().join("styles").join("15_watercolor")).unwrap();

    env.api
        .submit(SubmitRequest::new(EntityKey::style("15"), 10))
        .await
        .unwrap();
    env.api
        .submit(SubmitRequest::new(EntityKey::actor("42"), 10))
        .await
        .unwrap();

    let root = env.api.data_root();
    let style_doc = root.join("styles/15_watercolor/training_versions.json");
    let actor_doc = root.join("actors/_generic/42/training_versions.json");
    assert!(style_doc.is_file());
    assert!(actor_doc.is_file());

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(style_doc).unwrap()).unwrap();
    let version = &doc["versions"][0];
    assert_eq!(version["name"], "V1");
    assert_eq!(version["status"], "pending");
    assert_eq!(version["imageCount"], 10);
    assert!(version["parameters"]["max_train_steps"].is_number());
}
