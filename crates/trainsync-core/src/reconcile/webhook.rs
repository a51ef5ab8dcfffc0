//! Applying provider completion webhooks.

use crate::identity::{extract_entity, strip_retry_suffix, JobReference};
use crate::models::{Applied, EntityKey, Registry, VersionStatus};
use crate::reconcile::{classify_webhook_status, default_failure_message, ProviderState};
use crate::store::RegistryStore;
use crate::{Result, TrainsyncError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Body of a completion webhook.
///
/// Every field is optional on the wire; required ones are checked by
/// [`WebhookReconciler::apply`] so the caller gets a `MissingField` error
/// rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<WebhookOutput>,
    /// Usually a string, occasionally a structured object.
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookOutput {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default, rename = "loraUrl", alias = "lora_url")]
    pub lora_url: Option<String>,
    #[serde(default)]
    pub s3_url: Option<String>,
    #[serde(default, rename = "loraName", alias = "lora_name")]
    pub lora_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl WebhookPayload {
    fn output_field(&self, field: fn(&WebhookOutput) -> Option<&str>) -> Option<&str> {
        non_empty(self.output.as_ref().and_then(field))
    }

    fn job_id(&self) -> Option<&str> {
        self.output_field(|o| o.job_id.as_deref())
    }

    /// First non-empty artifact URL in the output.
    pub fn artifact_url(&self) -> Option<&str> {
        self.output_field(|o| o.lora_url.as_deref())
            .or_else(|| self.output_field(|o| o.s3_url.as_deref()))
    }

    fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => non_empty(Some(s)).map(String::from),
            other => Some(other.to_string()),
        }
    }

    /// Resolve the owning entity from the most specific field available.
    fn resolve_entity(&self, id: &str) -> Option<JobReference> {
        [
            self.job_id(),
            self.output_field(|o| o.lora_name.as_deref()),
            self.output_field(|o| o.lora_url.as_deref()),
            self.output_field(|o| o.s3_url.as_deref()),
            Some(id),
        ]
        .into_iter()
        .flatten()
        .find_map(extract_entity)
    }
}

/// How a webhook id is matched against stored version ids, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMatchStrategy {
    Exact,
    /// Ignore a `-e<digits>` retry suffix on either side.
    RetrySuffixStripped,
}

impl IdMatchStrategy {
    pub const ORDERED: [IdMatchStrategy; 2] =
        [IdMatchStrategy::Exact, IdMatchStrategy::RetrySuffixStripped];

    pub fn matches(&self, stored_id: &str, candidate: &str) -> bool {
        match self {
            IdMatchStrategy::Exact => stored_id == candidate,
            IdMatchStrategy::RetrySuffixStripped => {
                strip_retry_suffix(stored_id) == strip_retry_suffix(candidate)
            }
        }
    }

    /// Index of the version matched by the first strategy that matches any
    /// candidate. Candidates are tried in order within each strategy.
    pub fn locate(registry: &Registry, candidates: &[&str]) -> Option<(usize, IdMatchStrategy)> {
        Self::ORDERED.into_iter().find_map(|strategy| {
            candidates.iter().find_map(|candidate| {
                registry
                    .versions
                    .iter()
                    .position(|v| strategy.matches(&v.id, candidate))
                    .map(|index| (index, strategy))
            })
        })
    }
}

/// Result of applying one webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub entity: EntityKey,
    pub version_id: String,
    pub version_name: String,
    pub status: VersionStatus,
    /// Whether the registry document was modified.
    pub changed: bool,
}

/// Applies webhooks to the registry.
pub struct WebhookReconciler {
    store: Arc<RegistryStore>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }

    pub async fn apply(&self, payload: &WebhookPayload) -> Result<WebhookOutcome> {
        let status = non_empty(payload.status.as_deref())
            .ok_or_else(|| TrainsyncError::missing_field("status"))?;
        let id = non_empty(payload.id.as_deref())
            .ok_or_else(|| TrainsyncError::missing_field("id"))?;

        let reference = payload.resolve_entity(id).ok_or_else(|| {
            warn!("Webhook {} does not identify an entity", id);
            TrainsyncError::EntityNotResolvable {
                input: payload.job_id().unwrap_or(id).to_string(),
            }
        })?;
        let key = reference.key();

        let mut candidates = vec![id];
        if let Some(job_id) = payload.job_id().filter(|j| *j != id) {
            candidates.push(job_id);
        }

        let state = classify_webhook_status(status);
        let observed_at = Utc::now();
        debug!("Webhook {} ({}) for {}", id, status, key);

        self.store
            .update(&key, |registry| {
                let Some((index, strategy)) = IdMatchStrategy::locate(registry, &candidates)
                else {
                    let available = registry.ids();
                    warn!(
                        "Webhook {} matched no version of {}; available: {:?}",
                        id, key, available
                    );
                    return Err(TrainsyncError::VersionNotFound {
                        entity: key.to_string(),
                        version_id: id.to_string(),
                        available,
                    });
                };
                if strategy != IdMatchStrategy::Exact {
                    debug!("Webhook {} matched {} via {:?}", id, registry.versions[index].id, strategy);
                }

                let version = &mut registry.versions[index];
                let applied = match state {
                    ProviderState::Succeeded => {
                        version.apply_completion(payload.artifact_url(), observed_at, false)
                    }
                    _ => {
                        let message = payload
                            .error_message()
                            .unwrap_or_else(|| default_failure_message(status));
                        version.apply_failure(message, observed_at)
                    }
                };

                match applied {
                    Applied::Changed => info!(
                        "{} {} of {} is now {}",
                        version.name, version.id, key, version.status
                    ),
                    Applied::Unchanged => {
                        debug!("Webhook {} already applied to {}", id, version.name)
                    }
                    Applied::Rejected => warn!(
                        "Ignoring {} webhook for {} {} of {}: version is {}",
                        status, version.name, version.id, key, version.status
                    ),
                }

                Ok(WebhookOutcome {
                    entity: key.clone(),
                    version_id: version.id.clone(),
                    version_name: version.name.clone(),
                    status: version.status,
                    changed: applied == Applied::Changed,
                })
            })
            .await
    }
}
