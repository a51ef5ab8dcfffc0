//! Folding external observations into the version registries.
//!
//! Three independent sources report on the same runs:
//! - `webhook`: push notifications from the provider
//! - `poller`: status queries against the provider
//! - `storage_sync`: listings of the artifact bucket
//!
//! Each is idempotent on its own, and applying any mix of them in any order
//! converges on the same registry state.

pub mod poller;
pub mod storage_sync;
pub mod webhook;

pub use poller::{PollFailure, PollOutcome, PollReport, StatusPoller};
pub use storage_sync::{
    FailedEntity, MatchStrategy, SkippedFile, StorageSyncReconciler, SyncReport,
};
pub use webhook::{IdMatchStrategy, WebhookOutcome, WebhookOutput, WebhookPayload, WebhookReconciler};

/// What a provider status token means for a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Succeeded,
    Failed,
    InProgress,
}

const SUCCESS_TOKENS: &[&str] = &["COMPLETED", "COMPLETE", "SUCCEEDED", "SUCCESS", "DONE"];

const FAILURE_TOKENS: &[&str] = &[
    "FAILED",
    "FAILURE",
    "ERROR",
    "ERRORED",
    "CANCELLED",
    "CANCELED",
    "TIMED_OUT",
    "TIMEOUT",
];

/// Upper-case, with `-` and spaces folded to `_`.
fn normalize_token(token: &str) -> String {
    token
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

pub fn is_success_token(token: &str) -> bool {
    SUCCESS_TOKENS.contains(&normalize_token(token).as_str())
}

pub fn is_failure_token(token: &str) -> bool {
    FAILURE_TOKENS.contains(&normalize_token(token).as_str())
}

/// Classify a status token from a provider status query.
///
/// Tokens that are neither success nor failure (`IN_QUEUE`, `RUNNING`, and
/// anything unrecognized) count as still in progress.
pub fn classify_poll_status(token: &str) -> ProviderState {
    if is_success_token(token) {
        ProviderState::Succeeded
    } else if is_failure_token(token) {
        ProviderState::Failed
    } else {
        ProviderState::InProgress
    }
}

/// Classify a status token from a webhook. Webhooks only fire on terminal
/// events, so anything not success-like is a failure.
pub fn classify_webhook_status(token: &str) -> ProviderState {
    if is_success_token(token) {
        ProviderState::Succeeded
    } else {
        ProviderState::Failed
    }
}

/// Error text recorded for a failed run without a provider message.
pub(crate) fn default_failure_message(status: &str) -> String {
    format!("Training {}", status.trim())
}
