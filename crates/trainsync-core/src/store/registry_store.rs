//! Per-entity registry documents and their critical section.
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/styles/15_watercolor/training_versions.json   folder found by "<id>_" prefix
//! <root>/actors/_generic/42/training_versions.json     fallback when no folder exists
//! ```
//!
//! Every read-modify-write goes through [`RegistryStore::update`], which holds
//! an async mutex keyed by entity plus an advisory lock file, so concurrent
//! writers on the same entity never lose each other's updates.

use crate::config::PathsConfig;
use crate::models::{EntityKey, EntityKind, Registry};
use crate::store::atomic::{atomic_read_json, atomic_write_json};
use crate::{Result, TrainsyncError};
use fs2::FileExt;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Exclusive advisory lock on an entity's lock file. Released on drop.
struct RegistryFileLock {
    file: File,
}

impl RegistryFileLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TrainsyncError::io_with_path(e, parent))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| TrainsyncError::io_with_path(e, path))?;
        file.lock_exclusive()
            .map_err(|e| TrainsyncError::io_with_path(e, path))?;
        Ok(Self { file })
    }
}

impl Drop for RegistryFileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release registry lock file: {}", e);
        }
    }
}

/// Load/save access to every entity registry under a data root.
pub struct RegistryStore {
    data_root: PathBuf,
    keep_backup: bool,
    locks: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl RegistryStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            keep_backup: true,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Keep a `.bak` copy of the previous document on every write.
    pub fn with_backups(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    // ========================================
    // Path resolution
    // ========================================

    fn kind_dir(&self, kind: EntityKind) -> PathBuf {
        self.data_root.join(kind.dir_name())
    }

    fn generic_dir(&self, key: &EntityKey) -> PathBuf {
        self.kind_dir(key.kind)
            .join(PathsConfig::GENERIC_DIR_NAME)
            .join(&key.entity_id)
    }

    /// Directory holding an entity's registry.
    ///
    /// Picks the first (sorted) folder named `<id>` or starting with `<id>_`;
    /// falls back to `_generic/<id>`, which is the same for a given id.
    pub fn entity_dir(&self, key: &EntityKey) -> PathBuf {
        let kind_dir = self.kind_dir(key.kind);
        let prefix = format!("{}_", key.entity_id);

        let mut candidates: Vec<String> = match fs::read_dir(&kind_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name == &key.entity_id || name.starts_with(&prefix))
                .collect(),
            Err(_) => Vec::new(),
        };
        candidates.sort();

        match candidates.into_iter().next() {
            Some(folder) => kind_dir.join(folder),
            None => self.generic_dir(key),
        }
    }

    pub fn registry_path(&self, key: &EntityKey) -> PathBuf {
        self.entity_dir(key).join(PathsConfig::REGISTRY_FILE_NAME)
    }

    // ========================================
    // Reads
    // ========================================

    /// Load an entity's registry. Missing documents are empty registries.
    pub fn load(&self, key: &EntityKey) -> Result<Registry> {
        key.validate()?;
        let path = self.registry_path(key);
        debug!("Loading registry for {} from {}", key, path.display());
        Ok(atomic_read_json(&path)?.unwrap_or_default())
    }

    /// Every entity that has a registry document on disk.
    pub fn list_entities(&self) -> Result<Vec<EntityKey>> {
        let mut keys = BTreeSet::new();

        for kind in EntityKind::ALL {
            let kind_dir = self.kind_dir(kind);
            if !kind_dir.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&kind_dir)
                .min_depth(2)
                .max_depth(3)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_name() != PathsConfig::REGISTRY_FILE_NAME {
                    continue;
                }
                if let Some(entity_id) = entity_id_for_registry(&kind_dir, entry.path()) {
                    keys.insert(EntityKey::new(kind, entity_id));
                }
            }
        }

        Ok(keys.into_iter().collect())
    }

    // ========================================
    // Writes
    // ========================================

    fn entity_lock(&self, key: &EntityKey) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| TrainsyncError::LockPoisoned {
            entity: key.to_string(),
        })?;
        Ok(locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Drop the entity's mutex from the map once nobody else holds it.
    fn release_entity_lock(&self, key: &EntityKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // One reference in the map, one here: no task is waiting on it.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Run one load -> mutate -> save cycle for an entity.
    ///
    /// The document is written only if `mutate` changed it. If `mutate`
    /// returns an error nothing is written.
    pub async fn update<T, F>(&self, key: &EntityKey, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Registry) -> Result<T>,
    {
        key.validate()?;
        let lock = self.entity_lock(key)?;
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(key, mutate)
        };
        self.release_entity_lock(key, lock);
        result
    }

    fn update_locked<T, F>(&self, key: &EntityKey, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Registry) -> Result<T>,
    {
        let dir = self.entity_dir(key);
        let _file_lock = RegistryFileLock::acquire(&dir.join(PathsConfig::LOCK_FILE_NAME))?;

        let path = dir.join(PathsConfig::REGISTRY_FILE_NAME);
        let mut registry: Registry = atomic_read_json(&path)?.unwrap_or_default();
        let before = registry.clone();

        let value = mutate(&mut registry)?;

        if registry != before {
            atomic_write_json(&path, &registry, self.keep_backup)?;
            debug!(
                "Saved registry for {} ({} versions)",
                key,
                registry.versions.len()
            );
        }

        Ok(value)
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Replace an entity's whole registry document.
    pub async fn save(&self, key: &EntityKey, registry: &Registry) -> Result<()> {
        self.update(key, |current| {
            *current = registry.clone();
            Ok(())
        })
        .await
    }
}

/// Entity id for a registry file found under a kind directory.
fn entity_id_for_registry(kind_dir: &Path, registry_path: &Path) -> Option<String> {
    let folder = registry_path.parent()?;
    let folder_name = folder.file_name()?.to_str()?;
    let parent = folder.parent()?;

    if parent != kind_dir {
        let generic = parent.file_name()?.to_str()? == PathsConfig::GENERIC_DIR_NAME;
        return (generic
            && parent.parent()? == kind_dir
            && EntityKey::is_valid_id(folder_name))
        .then(|| folder_name.to_string());
    }

    let id = folder_name.split('_').next()?;
    EntityKey::is_valid_id(id).then(|| id.to_string())
}
