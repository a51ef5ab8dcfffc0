//! Atomic file operations for registry documents.
//!
//! A write never leaves a half-written document behind:
//! 1. Serialize and validate the JSON in memory
//! 2. Write it to a temp file next to the target (PID + sequence suffix)
//! 3. fsync the temp file
//! 4. Optionally copy the previous document to `.bak`
//! 5. Rename the temp file over the target

use crate::{Result, TrainsyncError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TrainsyncError::Io {
                message: format!("Failed to read {}", path.display()),
                path: Some(path.to_path_buf()),
                source: Some(e),
            })
        }
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| TrainsyncError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("json.{}.{}.tmp", process::id(), seq))
}

/// Write data to a JSON file atomically (pretty-printed).
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TrainsyncError::Io {
            message: format!("Failed to create directory {}", parent.display()),
            path: Some(parent.to_path_buf()),
            source: Some(e),
        })?;
    }

    let serialized = serde_json::to_string_pretty(data).map_err(|e| TrainsyncError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    serde_json::from_str::<serde_json::Value>(&serialized).map_err(|e| TrainsyncError::Json {
        message: format!("JSON validation failed: {}", e),
        source: Some(e),
    })?;

    let temp_path = temp_path_for(path);
    let write_result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.flush()?;
        file.sync_all()
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(TrainsyncError::Io {
            message: format!("Failed to write temp file {}", temp_path.display()),
            path: Some(temp_path),
            source: Some(e),
        });
    }

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        match fs::copy(path, &backup_path) {
            Ok(_) => debug!("Created backup: {}", backup_path.display()),
            Err(e) => warn!("Failed to create backup {}: {}", backup_path.display(), e),
        }
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        TrainsyncError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}
