use crate::model::issue::parse_key;
use crate::store::queue;
use crate::sync::SyncService;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(10);

const PRIORITY: i32 = 10;
const REASON: &str = "update-feed";

/// Listens to the service desk's recently-updated feed and queues every
/// key belonging to a mirrored project.
pub(crate) async fn run(service: Arc<SyncService>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = tick(&service).await {
                    warn!("Update feed listener failed: {:#}", err);
                }
            }
            _ = shutdown.cancelled() => break
        }
    }
}

async fn tick(service: &SyncService) -> Result<()> {
    let started = Instant::now();

    let updated_keys = service.service_desk.get_updated_issues().await?;

    let candidates = updated_keys.into_iter()
        .filter(|key| parse_key(key.as_str()).is_some())
        .collect::<Vec<_>>();

    let queued = queue::enqueue(&service.db_pool, &candidates, PRIORITY, REASON).await?;

    if !queued.is_empty() {
        info!("Queued {} updated issues ({:?}): {}", queued.len(), started.elapsed(), queued.join(", "));
    }

    Ok(())
}
