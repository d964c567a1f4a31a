use crate::store;
use crate::store::queue;
use crate::sync::SyncService;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(15 * 60);

const BATCH_SIZE: i64 = 100;
const PRIORITY: i32 = 8;
const REASON: &str = "future-version-check";

/// Rechecks issues whose fix-version list still holds an upstream
/// placeholder, until the upstream replaces it with a concrete version.
pub(crate) async fn run(service: Arc<SyncService>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = tick(&service).await {
                    warn!("Future version recheck failed: {:#}", err);
                }
            }
            _ = shutdown.cancelled() => break
        }
    }
}

async fn tick(service: &SyncService) -> Result<()> {
    let candidates = store::issue::future_version_keys(&service.db_pool, BATCH_SIZE).await?;
    let queued = queue::enqueue(&service.db_pool, &candidates, PRIORITY, REASON).await?;

    if !queued.is_empty() {
        info!("Queued {} issues with placeholder fix versions: {}", queued.len(), queued.join(", "));
    }

    // Piggyback the count view refresh on this slow ticker; the counts
    // only feed the filter page
    if let Err(err) = store::refresh_counts(&service.db_pool).await {
        warn!("Failed to refresh issue counts: {:#}", err);
    }

    Ok(())
}
