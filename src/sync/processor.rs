use crate::metrics;
use crate::store::queue;
use crate::sync::service::RefreshOutcome;
use crate::sync::SyncService;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(3);

const BATCH_SIZE: i64 = 10;

/// What to do with the queue entry after a refresh attempt.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum QueueAction {
    Delete,
    Retry
}

/// Drains the sync queue: peeks a batch every tick, refreshes the keys
/// concurrently and joins them all before the tick ends.
pub(crate) async fn run(service: Arc<SyncService>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = tick(&service, &shutdown).await {
                    warn!("Queue processor failed: {:#}", err);
                }
            }
            _ = shutdown.cancelled() => break
        }
    }
}

async fn tick(service: &Arc<SyncService>, shutdown: &CancellationToken) -> Result<()> {
    let keys = queue::peek(&service.db_pool, BATCH_SIZE).await?;

    // Shutdown cancels every in-flight refresh of this tick; a failing
    // key never cancels its siblings
    let tick_token = shutdown.child_token();

    join_all(keys.iter().map(|key| process_key(service, key.as_str(), &tick_token))).await;

    metrics::QUEUE_SIZE.set(queue::size(&service.db_pool).await?);

    Ok(())
}

async fn process_key(service: &SyncService, key: &str, cancellation: &CancellationToken) {
    let outcome = service.refresh_issue(key, cancellation).await;

    match &outcome {
        RefreshOutcome::Refreshed => info!("Refreshed issue {}", key),
        RefreshOutcome::Removed => info!("Detected removed issue {}", key),
        RefreshOutcome::Partial => warn!("Refresh of {} came back partial, retrying later", key),
        RefreshOutcome::Failed(error) => warn!("Refresh of {} failed: {:#}", key, error),
        RefreshOutcome::UpToDate => {}
    }

    let result = match queue_action(&outcome) {
        QueueAction::Delete => queue::delete(&service.db_pool, key).await,
        QueueAction::Retry => queue::retry(&service.db_pool, key).await
    };

    if let Err(error) = result {
        error!("Queue bookkeeping for {} failed: {:#}", key, error);
    }
}

fn queue_action(outcome: &RefreshOutcome) -> QueueAction {
    match outcome {
        RefreshOutcome::UpToDate | RefreshOutcome::Refreshed | RefreshOutcome::Removed => QueueAction::Delete,
        RefreshOutcome::Partial | RefreshOutcome::Failed(_) => QueueAction::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn successful_outcomes_release_the_entry() {
        assert_eq!(queue_action(&RefreshOutcome::UpToDate), QueueAction::Delete);
        assert_eq!(queue_action(&RefreshOutcome::Refreshed), QueueAction::Delete);
    }

    #[test]
    fn removal_releases_the_entry() {
        assert_eq!(queue_action(&RefreshOutcome::Removed), QueueAction::Delete);
    }

    #[test]
    fn partial_and_failed_reschedule() {
        assert_eq!(queue_action(&RefreshOutcome::Partial), QueueAction::Retry);
        assert_eq!(queue_action(&RefreshOutcome::Failed(anyhow!("boom"))), QueueAction::Retry);
    }
}
