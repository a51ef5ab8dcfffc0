//! Submission and reconciliation methods.

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::models::{EntityKey, EntityKind};
use crate::reconcile::{PollOutcome, PollReport, SyncReport, WebhookOutcome, WebhookPayload};
use crate::submission::{SubmitRequest, SubmittedVersion};
use crate::TrainsyncApi;

impl TrainsyncApi {
    /// Submit a new training run and record it as a pending version.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmittedVersion> {
        self.state.submitter.submit(request).await
    }

    /// Apply a completion webhook.
    pub async fn handle_webhook(&self, payload: &WebhookPayload) -> Result<WebhookOutcome> {
        self.state.webhooks.apply(payload).await
    }

    /// Query the provider for one version and apply the answer.
    pub async fn poll(&self, key: &EntityKey, version_id: &str) -> Result<PollOutcome> {
        self.state.poller.poll(key, version_id).await
    }

    /// Poll every non-terminal version.
    pub async fn poll_active(&self, cancel: &CancellationToken) -> Result<PollReport> {
        self.state.poller.poll_active(cancel).await
    }

    /// Reconcile the bucket listing for one entity kind.
    pub async fn sync_storage(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        self.state.storage_sync.sync_kind(kind, cancel).await
    }

    /// Reconcile the bucket listings for every entity kind.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.state.storage_sync.sync_all(cancel).await
    }
}
