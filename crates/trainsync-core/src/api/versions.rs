//! Registry queries and curation.

use crate::error::{Result, TrainsyncError};
use crate::models::{EntityKey, TrainingVersion};
use crate::TrainsyncApi;
use tracing::info;

impl TrainsyncApi {
    /// Every version recorded for an entity, in version order.
    pub fn list_versions(&self, key: &EntityKey) -> Result<Vec<TrainingVersion>> {
        Ok(self.state.store.load(key)?.versions)
    }

    pub fn get_version(&self, key: &EntityKey, version_id: &str) -> Result<TrainingVersion> {
        let registry = self.state.store.load(key)?;
        registry
            .find(version_id)
            .cloned()
            .ok_or_else(|| TrainsyncError::VersionNotFound {
                entity: key.to_string(),
                version_id: version_id.to_string(),
                available: registry.ids(),
            })
    }

    /// Set or clear the curation flag on a version.
    pub async fn set_version_quality(
        &self,
        key: &EntityKey,
        version_id: &str,
        is_good: Option<bool>,
    ) -> Result<TrainingVersion> {
        let version = self
            .state
            .store
            .update(key, |registry| {
                let available = registry.ids();
                let version = registry.find_mut(version_id).ok_or_else(|| {
                    TrainsyncError::VersionNotFound {
                        entity: key.to_string(),
                        version_id: version_id.to_string(),
                        available,
                    }
                })?;
                version.is_good = is_good;
                Ok(version.clone())
            })
            .await?;
        info!("Marked {} of {} as {:?}", version.name, key, is_good);
        Ok(version)
    }

    /// Entities that have a registry on disk.
    pub fn list_entities(&self) -> Result<Vec<EntityKey>> {
        self.state.store.list_entities()
    }
}
