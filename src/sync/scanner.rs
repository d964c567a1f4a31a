use crate::model::issue::PROJECTS;
use crate::store::{issue, queue};
use crate::sync::SyncService;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(6);

const BATCH_SIZE: i32 = 10;
const PRIORITY: i32 = 0;
const REASON: &str = "backfill";

/// Bootstrap backfill: walks every `(prefix, n)` pair up to the highest
/// key number observed per project, feeding the queue in small batches.
/// The per-project cursor is persisted, so the walk resumes where it
/// stopped and goes quiet once it catches up; steady state is covered by
/// the update feed and the future-version recheck.
pub(crate) async fn run(service: Arc<SyncService>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = tick(&service).await {
                    warn!("Backfill scanner failed: {:#}", err);
                }
            }
            _ = shutdown.cancelled() => break
        }
    }
}

async fn tick(service: &SyncService) -> Result<()> {
    let started = Instant::now();
    let mut queued_total = 0;

    for prefix in PROJECTS {
        let max = issue::max_key_num(&service.db_pool, prefix).await?;
        let cursor = issue::get_scan_cursor(&service.db_pool, prefix).await?;

        if cursor >= max {
            continue;
        }

        let end = (cursor + BATCH_SIZE).min(max);

        let keys = (cursor + 1..=end)
            .map(|number| format!("{}-{}", prefix, number))
            .collect::<Vec<_>>();

        let queued = queue::enqueue(&service.db_pool, &keys, PRIORITY, REASON).await?;
        queued_total += queued.len();

        issue::set_scan_cursor(&service.db_pool, prefix, end).await?;
    }

    if queued_total > 0 {
        info!("Backfill queued {} issues ({:?})", queued_total, started.elapsed());
    }

    Ok(())
}
