//! Training version records and their status state machine.

use crate::config::SyncConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Lifecycle status of a training version.
///
/// Status only moves forward: `pending -> training -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Pending,
    Training,
    Completed,
    Failed,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Pending => "pending",
            VersionStatus::Training => "training",
            VersionStatus::Completed => "completed",
            VersionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VersionStatus::Completed | VersionStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            VersionStatus::Pending => 0,
            VersionStatus::Training => 1,
            VersionStatus::Completed | VersionStatus::Failed => 2,
        }
    }

    /// Whether a reconciler may move a version from `from` to `to`.
    ///
    /// Staying in the same status is allowed so that re-applied updates are
    /// no-ops rather than errors. Terminal states are sticky.
    pub fn can_transition(from: VersionStatus, to: VersionStatus) -> bool {
        if from == to {
            return true;
        }
        !from.is_terminal() && to.rank() > from.rank()
    }

    /// Storage sync may promote a failed version once a live artifact exists.
    pub fn can_promote_from_storage(from: VersionStatus) -> bool {
        from == VersionStatus::Failed
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hyperparameters used for a run.
///
/// Only the two fields the registry reasons about are typed; everything else
/// the policy or caller supplies is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_train_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrainingParameters {
    /// Apply caller overrides key by key. Typed keys that fail to parse are
    /// kept in `extra` verbatim.
    pub fn apply_overrides(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            match key.as_str() {
                "max_train_steps" => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
                    Some(steps) => self.max_train_steps = Some(steps),
                    None => {
                        self.extra.insert(key.clone(), value.clone());
                    }
                },
                "learning_rate" => match value.as_f64() {
                    Some(lr) => self.learning_rate = Some(lr),
                    None => {
                        self.extra.insert(key.clone(), value.clone());
                    }
                },
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Quality of an artifact URL. Ordered: accelerated beats plain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UrlQuality {
    Plain,
    Accelerated,
}

impl UrlQuality {
    pub fn of(url: &str) -> Self {
        let accelerated = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .map(|host| {
                host.split('.')
                    .any(|label| label == SyncConfig::ACCELERATED_HOST_MARKER)
            })
            .unwrap_or(false);
        if accelerated {
            UrlQuality::Accelerated
        } else {
            UrlQuality::Plain
        }
    }
}

/// Merge an observed artifact URL into the current one.
///
/// Never downgrades an accelerated URL to a plain one; otherwise the
/// observation wins.
pub fn merge_lora_url(existing: Option<&str>, incoming: Option<&str>) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|u| !u.is_empty());
    let existing = existing.filter(|u| !u.is_empty());
    match (existing, incoming) {
        (existing, None) => existing.map(String::from),
        (None, Some(new)) => Some(new.to_string()),
        (Some(old), Some(new)) => {
            if UrlQuality::of(old) > UrlQuality::of(new) {
                Some(old.to_string())
            } else {
                Some(new.to_string())
            }
        }
    }
}

/// Numeric part of a `V<n>` name.
pub fn version_number(name: &str) -> Option<u32> {
    let rest = name.strip_prefix('V').or_else(|| name.strip_prefix('v'))?;
    rest.parse().ok()
}

/// Result of applying a status observation to a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    /// The state machine forbids the move; the version was left alone.
    Rejected,
}

/// One training attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingVersion {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub parameters: TrainingParameters,
    pub status: VersionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub image_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_good: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl TrainingVersion {
    /// A freshly submitted version.
    pub fn pending(
        id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        parameters: TrainingParameters,
        image_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description,
            timestamp: now,
            parameters,
            status: VersionStatus::Pending,
            lora_url: None,
            error: None,
            image_count,
            is_good: None,
            completed_at: None,
            failed_at: None,
            last_synced: None,
        }
    }

    /// A version discovered only through the artifact bucket.
    pub fn synced_from_storage(
        id: impl Into<String>,
        name: impl Into<String>,
        lora_url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            description: Some(SyncConfig::SYNCED_DESCRIPTION.to_string()),
            status: VersionStatus::Completed,
            lora_url: Some(lora_url.into()),
            completed_at: Some(now),
            last_synced: Some(now),
            ..Self::pending(id, name, None, TrainingParameters::default(), 0, now)
        }
    }

    /// Completed with a known artifact location.
    pub fn is_deliverable(&self) -> bool {
        self.status == VersionStatus::Completed
            && self.lora_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn version_number(&self) -> Option<u32> {
        version_number(&self.name)
    }

    /// Apply a completion observation.
    ///
    /// `completed_at` keeps its first value so re-applied observations do
    /// not change the record.
    pub fn apply_completion(
        &mut self,
        lora_url: Option<&str>,
        at: DateTime<Utc>,
        allow_failed_promotion: bool,
    ) -> Applied {
        let allowed = VersionStatus::can_transition(self.status, VersionStatus::Completed)
            || (allow_failed_promotion && VersionStatus::can_promote_from_storage(self.status));
        if !allowed {
            return Applied::Rejected;
        }

        let before = self.clone();
        self.lora_url = merge_lora_url(self.lora_url.as_deref(), lora_url);
        if self.status != VersionStatus::Completed {
            self.status = VersionStatus::Completed;
            self.error = None;
        }
        if self.completed_at.is_none() {
            self.completed_at = Some(at);
        }

        if *self == before {
            Applied::Unchanged
        } else {
            Applied::Changed
        }
    }

    /// Apply a failure observation.
    pub fn apply_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> Applied {
        if !VersionStatus::can_transition(self.status, VersionStatus::Failed) {
            return Applied::Rejected;
        }

        let before = self.clone();
        self.status = VersionStatus::Failed;
        self.error = Some(error.into());
        if self.failed_at.is_none() {
            self.failed_at = Some(at);
        }

        if *self == before {
            Applied::Unchanged
        } else {
            Applied::Changed
        }
    }
}

/// All versions of one entity, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub versions: Vec<TrainingVersion>,
}

impl Registry {
    pub fn find(&self, id: &str) -> Option<&TrainingVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TrainingVersion> {
        self.versions.iter_mut().find(|v| v.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.versions.iter().map(|v| v.id.clone()).collect()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.versions
            .iter()
            .any(|v| v.name.eq_ignore_ascii_case(name))
    }

    pub fn max_version_number(&self) -> u32 {
        self.versions
            .iter()
            .filter_map(TrainingVersion::version_number)
            .max()
            .unwrap_or(0)
    }

    /// Insert keeping versions ordered by their `V<n>` number.
    pub fn insert_ordered(&mut self, version: TrainingVersion) {
        let position = match version.version_number() {
            Some(number) => self
                .versions
                .iter()
                .position(|v| v.version_number().is_some_and(|n| n > number))
                .unwrap_or(self.versions.len()),
            None => self.versions.len(),
        };
        self.versions.insert(position, version);
    }

    pub fn active(&self) -> impl Iterator<Item = &TrainingVersion> {
        self.versions.iter().filter(|v| !v.status.is_terminal())
    }
}
