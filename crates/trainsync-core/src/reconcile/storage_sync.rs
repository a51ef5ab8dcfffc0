//! Reconciling registries against the artifact bucket.
//!
//! The bucket is the most reliable record of what actually finished: a file
//! there is a trained artifact, whatever the provider or webhooks said. A
//! listing can complete pending versions, promote failed ones, upgrade
//! artifact URLs, and record artifacts nobody registered. It never creates a
//! second version with an existing name.

use crate::cancel::CancellationToken;
use crate::identity::{extract_entity, extract_version_token, file_stem, last_segment};
use crate::models::{Applied, EntityKey, EntityKind, Registry, TrainingVersion, VersionStatus};
use crate::network::{StorageLister, StorageObject};
use crate::store::RegistryStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A listed file, parsed once.
#[derive(Debug, Clone)]
pub struct ListedArtifact {
    pub filename: String,
    pub stem: String,
    pub url: String,
    pub token: Option<String>,
}

impl ListedArtifact {
    pub fn new(object: &StorageObject) -> Self {
        let filename = last_segment(&object.filename).to_string();
        Self {
            stem: file_stem(&filename).to_string(),
            token: extract_version_token(&filename),
            url: object.url.clone(),
            filename,
        }
    }
}

/// Ways a listed file is matched to an existing version. Tried in
/// [`MatchStrategy::ORDERED`] order; the first strategy that matches any
/// version wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStrategy {
    /// Same `V<n>` name, on a version still waiting for its artifact.
    PendingOrFailedByName,
    /// The stored artifact URL already points at this file.
    CompletedByUrlSubstring,
    /// The version is named after the file.
    CompletedByExactName,
    /// The version id is the file stem.
    CompletedById,
}

impl MatchStrategy {
    pub const ORDERED: [MatchStrategy; 4] = [
        MatchStrategy::PendingOrFailedByName,
        MatchStrategy::CompletedByUrlSubstring,
        MatchStrategy::CompletedByExactName,
        MatchStrategy::CompletedById,
    ];

    pub fn matches(&self, version: &TrainingVersion, artifact: &ListedArtifact) -> bool {
        match self {
            MatchStrategy::PendingOrFailedByName => {
                let awaiting = matches!(version.status, VersionStatus::Pending | VersionStatus::Failed)
                    || version.lora_url.is_none();
                awaiting
                    && artifact
                        .token
                        .as_deref()
                        .is_some_and(|token| version.name.eq_ignore_ascii_case(token))
            }
            MatchStrategy::CompletedByUrlSubstring => version
                .lora_url
                .as_deref()
                .is_some_and(|url| url.contains(&artifact.filename)),
            MatchStrategy::CompletedByExactName => {
                version.name == artifact.filename || version.name == artifact.stem
            }
            MatchStrategy::CompletedById => version.id == artifact.stem,
        }
    }

    /// Index of the matched version and the strategy that matched it.
    pub fn locate(registry: &Registry, artifact: &ListedArtifact) -> Option<(usize, MatchStrategy)> {
        Self::ORDERED.into_iter().find_map(|strategy| {
            registry
                .versions
                .iter()
                .position(|v| strategy.matches(v, artifact))
                .map(|index| (index, strategy))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntity {
    pub entity: String,
    pub error: String,
}

/// Aggregate of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Entities whose registry was reconciled.
    pub entities: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedFile>,
    pub failed_entities: Vec<FailedEntity>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.entities += other.entities;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped.extend(other.skipped);
        self.failed_entities.extend(other.failed_entities);
        self.cancelled |= other.cancelled;
    }

    fn skip(&mut self, filename: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipping {}: {}", filename, reason);
        self.skipped.push(SkippedFile {
            filename: filename.to_string(),
            reason,
        });
    }
}

/// Applies bucket listings to the registries.
pub struct StorageSyncReconciler {
    store: Arc<RegistryStore>,
    lister: Arc<dyn StorageLister>,
}

impl StorageSyncReconciler {
    pub fn new(store: Arc<RegistryStore>, lister: Arc<dyn StorageLister>) -> Self {
        Self { store, lister }
    }

    /// Reconcile one listing for an entity kind.
    ///
    /// Files are grouped by entity and each entity is reconciled in a single
    /// critical section. Cancellation is honored between entities.
    pub async fn sync(
        &self,
        kind: EntityKind,
        objects: &[StorageObject],
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut by_entity: BTreeMap<EntityKey, Vec<ListedArtifact>> = BTreeMap::new();

        for object in objects {
            let artifact = ListedArtifact::new(object);
            if artifact.filename.is_empty() {
                continue;
            }
            match extract_entity(&artifact.filename) {
                Some(reference) => {
                    // Without an explicit marker the listing prefix decides.
                    let key = if reference.explicit_kind {
                        reference.key()
                    } else {
                        EntityKey::new(kind, reference.entity_id)
                    };
                    by_entity.entry(key).or_default().push(artifact);
                }
                None => report.skip(&artifact.filename, "entity not resolvable from filename"),
            }
        }

        for (key, mut artifacts) in by_entity {
            if cancel.is_cancelled() {
                info!("Storage sync cancelled before {}", key);
                report.cancelled = true;
                break;
            }
            artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));

            let now = Utc::now();
            let result = self
                .store
                .update(&key, |registry| Ok(reconcile_entity(registry, &artifacts, now)))
                .await;
            match result {
                Ok(entity_report) => {
                    report.entities += 1;
                    report.merge(entity_report);
                }
                Err(e) => {
                    warn!("Storage sync failed for {}: {}", key, e);
                    report.failed_entities.push(FailedEntity {
                        entity: key.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// List one entity kind and reconcile the listing.
    ///
    /// A listing failure is recorded in the report rather than returned.
    pub async fn sync_kind(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<SyncReport> {
        match self.lister.list(kind).await {
            Ok(objects) => {
                debug!("Reconciling {} {} artifacts", objects.len(), kind);
                self.sync(kind, &objects, cancel).await
            }
            Err(e) => {
                warn!("Could not list {} artifacts: {}", kind, e);
                Ok(SyncReport {
                    failed_entities: vec![FailedEntity {
                        entity: kind.dir_name().to_string(),
                        error: e.to_string(),
                    }],
                    ..Default::default()
                })
            }
        }
    }

    /// List every entity kind and reconcile each listing.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for kind in EntityKind::ALL {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.merge(self.sync_kind(kind, cancel).await?);
        }

        info!(
            "Storage sync: {} entities, {} created, {} updated, {} unchanged, {} skipped",
            report.entities,
            report.created,
            report.updated,
            report.unchanged,
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Fold one entity's artifacts into its registry.
fn reconcile_entity(
    registry: &mut Registry,
    artifacts: &[ListedArtifact],
    now: DateTime<Utc>,
) -> SyncReport {
    let mut report = SyncReport::default();

    for artifact in artifacts {
        if let Some((index, strategy)) = MatchStrategy::locate(registry, artifact) {
            let version = &mut registry.versions[index];
            let applied = version.apply_completion(Some(&artifact.url), now, true);
            version.last_synced = Some(now);
            if applied == Applied::Changed {
                debug!(
                    "{} updated {} via {:?}",
                    artifact.filename, version.name, strategy
                );
                report.updated += 1;
            } else {
                report.unchanged += 1;
            }
            continue;
        }

        let Some(token) = artifact.token.as_deref() else {
            report.skip(&artifact.filename, "no version token in filename");
            continue;
        };
        if registry.contains_name(token) {
            report.skip(
                &artifact.filename,
                format!("version {} exists but does not match this file", token),
            );
            continue;
        }

        info!("Recording {} from storage as {}", artifact.filename, token);
        registry.insert_ordered(TrainingVersion::synced_from_storage(
            artifact.stem.clone(),
            token,
            artifact.url.clone(),
            now,
        ));
        report.created += 1;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UrlQuality;
    use crate::test_support::FakeStorageLister;
    use tempfile::TempDir;

    const PLAIN: &str = "https://b.s3.amazonaws.com/actors/actor_42_V1.safetensors";
    const FAST: &str = "https://b.s3-accelerate.amazonaws.com/actors/actor_42_V1.safetensors";

    fn artifact(filename: &str, url: &str) -> ListedArtifact {
        ListedArtifact::new(&FakeStorageLister::object(filename, url))
    }

    fn version(id: &str, name: &str, status: VersionStatus, url: Option<&str>) -> TrainingVersion {
        let mut v = TrainingVersion::pending(id, name, None, Default::default(), 20, Utc::now());
        v.status = status;
        v.lora_url = url.map(String::from);
        v
    }

    #[test]
    fn test_listed_artifact_parsing() {
        let a = artifact("actors/actor_42_v3.safetensors", PLAIN);
        assert_eq!(a.filename, "actor_42_v3.safetensors");
        assert_eq!(a.stem, "actor_42_v3");
        assert_eq!(a.token.as_deref(), Some("V3"));
    }

    #[test]
    fn test_pending_or_failed_by_name() {
        let a = artifact("actor_42_V3.safetensors", PLAIN);
        let s = MatchStrategy::PendingOrFailedByName;
        assert!(s.matches(&version("j", "V3", VersionStatus::Pending, None), &a));
        assert!(s.matches(&version("j", "v3", VersionStatus::Failed, None), &a));
        assert!(s.matches(&version("j", "V3", VersionStatus::Completed, None), &a));
        assert!(!s.matches(&version("j", "V3", VersionStatus::Completed, Some(FAST)), &a));
        assert!(!s.matches(&version("j", "V2", VersionStatus::Pending, None), &a));
        assert!(!s.matches(
            &version("j", "V3", VersionStatus::Pending, None),
            &artifact("actor_42.safetensors", PLAIN)
        ));
    }

    #[test]
    fn test_completed_by_url_substring() {
        let a = artifact("actor_42_V1.safetensors", PLAIN);
        let s = MatchStrategy::CompletedByUrlSubstring;
        assert!(s.matches(&version("j", "V9", VersionStatus::Completed, Some(FAST)), &a));
        assert!(!s.matches(&version("j", "V9", VersionStatus::Completed, None), &a));
    }

    #[test]
    fn test_completed_by_exact_name() {
        let a = artifact("legacy_lora.safetensors", PLAIN);
        let s = MatchStrategy::CompletedByExactName;
        assert!(s.matches(&version("j", "legacy_lora", VersionStatus::Completed, None), &a));
        assert!(s.matches(
            &version("j", "legacy_lora.safetensors", VersionStatus::Completed, None),
            &a
        ));
        assert!(!s.matches(&version("j", "V1", VersionStatus::Completed, None), &a));
    }

    #[test]
    fn test_completed_by_id() {
        let a = artifact("actor_42_V5.ckpt", PLAIN);
        let s = MatchStrategy::CompletedById;
        assert!(s.matches(&version("actor_42_V5", "V5", VersionStatus::Completed, None), &a));
        assert!(!s.matches(&version("actor_42_V6", "V5", VersionStatus::Completed, None), &a));
    }

    #[test]
    fn test_strategy_order() {
        let mut registry = Registry::default();
        registry
            .versions
            .push(version("actor_42_V1", "V7", VersionStatus::Completed, Some(FAST)));
        registry
            .versions
            .push(version("j", "V1", VersionStatus::Pending, None));

        let a = artifact("actor_42_V1.safetensors", PLAIN);
        assert_eq!(
            MatchStrategy::locate(&registry, &a),
            Some((1, MatchStrategy::PendingOrFailedByName))
        );
    }

    #[test]
    fn test_pending_version_completed_not_duplicated() {
        let mut registry = Registry::default();
        registry
            .versions
            .push(version("job-3", "V3", VersionStatus::Pending, None));

        let report = reconcile_entity(
            &mut registry,
            &[artifact("actor_42_V3.safetensors", PLAIN)],
            Utc::now(),
        );
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(registry.versions.len(), 1);
        assert_eq!(registry.versions[0].status, VersionStatus::Completed);
        assert!(registry.versions[0].last_synced.is_some());
    }

    #[test]
    fn test_failed_version_promoted() {
        let mut registry = Registry::default();
        let mut failed = version("job-2", "V2", VersionStatus::Failed, None);
        failed.error = Some("Training FAILED".into());
        registry.versions.push(failed);

        reconcile_entity(
            &mut registry,
            &[artifact("actor_42_V2.safetensors", PLAIN)],
            Utc::now(),
        );
        let v = &registry.versions[0];
        assert_eq!(v.status, VersionStatus::Completed);
        assert!(v.error.is_none());
        assert_eq!(v.lora_url.as_deref(), Some(PLAIN));
    }

    #[test]
    fn test_url_quality_monotonic_under_any_order() {
        for order in [[PLAIN, FAST], [FAST, PLAIN]] {
            let mut registry = Registry::default();
            registry
                .versions
                .push(version("job-1", "V1", VersionStatus::Pending, None));
            for url in order {
                reconcile_entity(
                    &mut registry,
                    &[artifact("actor_42_V1.safetensors", url)],
                    Utc::now(),
                );
                reconcile_entity(
                    &mut registry,
                    &[artifact("actor_42_V1.safetensors", url)],
                    Utc::now(),
                );
            }
            let url = registry.versions[0].lora_url.clone().unwrap();
            assert_eq!(UrlQuality::of(&url), UrlQuality::Accelerated);
            assert_eq!(registry.versions.len(), 1);
        }
    }

    #[test]
    fn test_unmatched_file_creates_version_in_order() {
        let mut registry = Registry::default();
        registry
            .versions
            .push(version("job-1", "V1", VersionStatus::Completed, Some(FAST)));
        registry
            .versions
            .push(version("job-4", "V4", VersionStatus::Pending, None));

        let report = reconcile_entity(
            &mut registry,
            &[artifact("actor_42_V2.safetensors", "https://b.s3.amazonaws.com/actor_42_V2.safetensors")],
            Utc::now(),
        );
        assert_eq!(report.created, 1);
        let names: Vec<_> = registry.versions.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["V1", "V2", "V4"]);

        let created = &registry.versions[1];
        assert_eq!(created.id, "actor_42_V2");
        assert_eq!(created.status, VersionStatus::Completed);
        assert_eq!(created.description.as_deref(), Some("Synced from S3"));
        assert_eq!(created.image_count, 0);
        assert_eq!(created.parameters, Default::default());
    }

    #[test]
    fn test_existing_name_without_match_is_skipped() {
        let mut registry = Registry::default();
        registry.versions.push(version(
            "job-2",
            "V2",
            VersionStatus::Completed,
            Some("https://b.s3.amazonaws.com/actors/other_name.safetensors"),
        ));

        let report = reconcile_entity(
            &mut registry,
            &[artifact("actor_42_V2.safetensors", PLAIN)],
            Utc::now(),
        );
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(registry.versions.len(), 1);
    }

    #[test]
    fn test_file_without_token_is_skipped() {
        let mut registry = Registry::default();
        let report = reconcile_entity(
            &mut registry,
            &[artifact("actor_42_final.safetensors", PLAIN)],
            Utc::now(),
        );
        assert_eq!(report.skipped.len(), 1);
        assert!(registry.versions.is_empty());
    }

    #[test]
    fn test_matched_update_keeps_parameters_and_description() {
        let mut registry = Registry::default();
        let mut v = version("job-1", "V1", VersionStatus::Pending, None);
        v.description = Some("first try".into());
        v.parameters.max_train_steps = Some(1200);
        registry.versions.push(v.clone());

        reconcile_entity(
            &mut registry,
            &[artifact("actor_42_V1.safetensors", PLAIN)],
            Utc::now(),
        );
        assert_eq!(registry.versions[0].description, v.description);
        assert_eq!(registry.versions[0].parameters, v.parameters);
    }

    #[tokio::test]
    async fn test_sync_groups_by_entity_and_reports() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RegistryStore::new(temp_dir.path()));
        let reconciler = StorageSyncReconciler::new(store.clone(), Arc::new(FakeStorageLister::new()));

        let objects = vec![
            FakeStorageLister::object("actor_42_V1.safetensors", PLAIN),
            FakeStorageLister::object("actor_7_V1.safetensors", "https://b/actor_7_V1.safetensors"),
            FakeStorageLister::object("7_V2.safetensors", "https://b/7_V2.safetensors"),
            FakeStorageLister::object("readme.txt", "https://b/readme.txt"),
        ];
        let report = reconciler
            .sync(EntityKind::Actor, &objects, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.entities, 2);
        assert_eq!(report.created, 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].filename, "readme.txt");

        // No marker: the listing prefix decides the kind.
        let actor_7 = store.load(&EntityKey::actor("7")).unwrap();
        assert_eq!(actor_7.versions.len(), 2);
        assert_eq!(store.load(&EntityKey::actor("42")).unwrap().versions.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_all_lists_every_kind() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RegistryStore::new(temp_dir.path()));
        let lister = Arc::new(FakeStorageLister::new());
        lister.set(
            EntityKind::Style,
            vec![FakeStorageLister::object("15_ink_V1.safetensors", "https://b/15_ink_V1.safetensors")],
        );
        lister.fail(EntityKind::Actor);

        let reconciler = StorageSyncReconciler::new(store.clone(), lister);
        let report = reconciler.sync_all(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.failed_entities.len(), 1);
        assert_eq!(report.failed_entities[0].entity, "actors");
        assert_eq!(store.load(&EntityKey::style("15")).unwrap().versions.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_cancelled_between_entities() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RegistryStore::new(temp_dir.path()));
        let reconciler = StorageSyncReconciler::new(store.clone(), Arc::new(FakeStorageLister::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = reconciler
            .sync(
                EntityKind::Actor,
                &[FakeStorageLister::object("actor_42_V1.safetensors", PLAIN)],
                &cancel,
            )
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.entities, 0);
        assert!(store.list_entities().unwrap().is_empty());
    }
}
