//! Periodic reconciliation workers.
//!
//! The poll loop asks the provider about every non-terminal version; the
//! sync loop folds the bucket listing into the registries. Both stop when
//! the shutdown token is cancelled, finishing the pass in flight first.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use trainsync_core::{CancellationToken, TrainsyncApi};

/// Run `task` every `every` until `cancel` fires. The first pass runs
/// immediately.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    cancel: CancellationToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{} worker running every {:?}", name, every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            task(cancel.clone()).await;
        }

        debug!("{} worker stopped", name);
    })
}

/// Spawn the status poll loop. Returns `None` when `every` is zero.
pub fn spawn_poll_loop(
    api: TrainsyncApi,
    every: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("Status polling disabled");
        return None;
    }
    Some(spawn_periodic("poll", every, cancel, move |cancel| {
        let api = api.clone();
        async move {
            match api.poll_active(&cancel).await {
                Ok(report) if report.polled > 0 => info!(
                    "Poll pass: {} polled, {} completed, {} failed, {} in progress, {} errors",
                    report.polled,
                    report.completed,
                    report.failed,
                    report.in_progress,
                    report.errors.len()
                ),
                Ok(_) => debug!("Poll pass: nothing active"),
                Err(e) => warn!("Poll pass failed: {}", e),
            }
        }
    }))
}

/// Spawn the storage sync loop. Returns `None` when `every` is zero.
pub fn spawn_sync_loop(
    api: TrainsyncApi,
    every: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("Storage sync disabled");
        return None;
    }
    Some(spawn_periodic("sync", every, cancel, move |cancel| {
        let api = api.clone();
        async move {
            match api.sync_all(&cancel).await {
                Ok(report) => {
                    info!(
                        "Sync pass: {} entities, {} created, {} updated, {} skipped",
                        report.entities,
                        report.created,
                        report.updated,
                        report.skipped.len()
                    );
                    for failed in &report.failed_entities {
                        warn!("Sync of {} failed: {}", failed.entity, failed.error);
                    }
                }
                Err(e) => warn!("Sync pass failed: {}", e),
            }
        }
    }))
}
