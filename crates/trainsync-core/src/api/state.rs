//! Components owned by a `TrainsyncApi` instance.

use crate::reconcile::{StatusPoller, StorageSyncReconciler, WebhookReconciler};
use crate::store::RegistryStore;
use crate::submission::JobSubmitter;
use std::sync::Arc;

pub(crate) struct ApiState {
    pub(crate) store: Arc<RegistryStore>,
    pub(crate) submitter: JobSubmitter,
    pub(crate) webhooks: WebhookReconciler,
    pub(crate) poller: StatusPoller,
    pub(crate) storage_sync: StorageSyncReconciler,
}
