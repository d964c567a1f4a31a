use chrono::{DateTime, Utc};
use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// A successfully synced key may not be re-enqueued for this long.
/// Deliberately wider than the read path's freshness window.
pub(crate) const ENQUEUE_EXCLUSION_MINUTES: i32 = 15;

/// Retries beyond this many failures discard the entry, unless the entry
/// is high-priority.
const FAILURE_BUDGET: i32 = 4;

/// Entries at or above this priority survive the failure budget. Used for
/// user-triggered refreshes.
pub(crate) const PROTECTED_PRIORITY: i32 = 10;

#[derive(FromRow, Debug, Serialize)]
pub(crate) struct QueueEntry {
    pub(crate) issue_key: String,
    pub(crate) queued_date: DateTime<Utc>,
    pub(crate) priority: i32,
    pub(crate) reason: String,
    pub(crate) failed_count: i32,
    pub(crate) retry_after: DateTime<Utc>
}

/// Inserts the candidate keys that are neither already queued nor freshly
/// synced, and returns the subset actually inserted so callers can log
/// their contribution. One row per key; concurrent enqueues of the same
/// key resolve to a single row.
pub(crate) async fn enqueue(db_pool: &PgPool, keys: &[String], priority: i32, reason: &str) -> Result<Vec<String>> {
    let mut inserted = Vec::new();

    for key in keys {
        let row: Option<(String,)> = sqlx::query_as(
            "insert into sync_queue (issue_key, priority, reason)
             select $1, $2, $3
             where not exists (select 1 from sync_queue where issue_key = $1)
             and not exists (select 1 from issue where key = $1 and synced_date >= now() - make_interval(mins => $4))
             on conflict (issue_key) do nothing
             returning issue_key"
        )
            .bind(key)
            .bind(priority)
            .bind(reason)
            .bind(ENQUEUE_EXCLUSION_MINUTES)
            .fetch_optional(db_pool)
            .await
            .with_context(|| format!("Failed to enqueue issue key {}", key))?;

        if let Some((key,)) = row {
            inserted.push(key);
        }
    }

    Ok(inserted)
}

/// Returns up to `limit` due keys in processing order without removing
/// them. The processor serializes per-key work; across keys no ordering
/// is guaranteed beyond the returned sequence.
pub(crate) async fn peek(db_pool: &PgPool, limit: i64) -> Result<Vec<String>> {
    let keys = sqlx::query_scalar(
        "select issue_key from sync_queue
         where retry_after <= now()
         order by priority desc, failed_count asc, queued_date asc
         limit $1"
    )
        .bind(limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to peek sync queue")?;

    Ok(keys)
}

/// Removes an entry after a successful refresh or a confirmed removal.
pub(crate) async fn delete(db_pool: &PgPool, key: &str) -> Result<()> {
    sqlx::query("delete from sync_queue where issue_key = $1")
        .bind(key)
        .execute(db_pool)
        .await
        .with_context(|| format!("Failed to delete queue entry for {}", key))?;

    Ok(())
}

/// Records a failed refresh: bumps the failure count and reschedules with
/// exponential backoff, or discards the entry once the failure budget is
/// exhausted. The row lock keeps concurrent processors from double
/// counting a failure.
pub(crate) async fn retry(db_pool: &PgPool, key: &str) -> Result<()> {
    let mut transaction = db_pool.begin().await?;

    let row: Option<(i32, i32)> = sqlx::query_as(
        "select failed_count, priority from sync_queue where issue_key = $1 for update"
    )
        .bind(key)
        .fetch_optional(&mut *transaction)
        .await
        .with_context(|| format!("Failed to lock queue entry for {}", key))?;

    let Some((failed_count, priority)) = row else {
        return Ok(());
    };

    let failed_count = failed_count + 1;

    if exhausts_budget(failed_count, priority) {
        debug!("Dropping {} from the sync queue after {} failures", key, failed_count);

        sqlx::query("delete from sync_queue where issue_key = $1")
            .bind(key)
            .execute(&mut *transaction)
            .await?;
    } else {
        sqlx::query(
            "update sync_queue
             set failed_count = $2, queued_date = now(), retry_after = now() + make_interval(mins => $3)
             where issue_key = $1"
        )
            .bind(key)
            .bind(failed_count)
            .bind(backoff_minutes(failed_count))
            .execute(&mut *transaction)
            .await?;
    }

    transaction.commit().await?;

    Ok(())
}

/// Current number of queued keys, published as a gauge by the processor.
pub(crate) async fn size(db_pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar("select count(*) from sync_queue")
        .fetch_one(db_pool)
        .await
        .context("Failed to count sync queue")?;

    Ok(count)
}

/// Full queue listing for the status page, in processing order.
pub(crate) async fn overview(db_pool: &PgPool) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(
        "select issue_key, queued_date, priority, reason, failed_count, retry_after
         from sync_queue
         order by priority desc, failed_count asc, queued_date asc"
    )
        .fetch_all(db_pool)
        .await
        .context("Failed to list sync queue")?;

    Ok(entries)
}

/// Minutes until the next attempt after the given number of failures:
/// 5, 25, 125 (2 h 5 min), 625 (10 h 25 min).
fn backoff_minutes(failed_count: i32) -> i32 {
    5_i32.pow(failed_count.clamp(0, FAILURE_BUDGET) as u32)
}

fn exhausts_budget(failed_count: i32, priority: i32) -> bool {
    failed_count > FAILURE_BUDGET && priority < PROTECTED_PRIORITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder() {
        assert_eq!(backoff_minutes(1), 5);
        assert_eq!(backoff_minutes(2), 25);
        assert_eq!(backoff_minutes(3), 125);
        assert_eq!(backoff_minutes(4), 625);
    }

    #[test]
    fn fifth_failure_exhausts_the_budget() {
        assert!(!exhausts_budget(1, 0));
        assert!(!exhausts_budget(4, 0));
        assert!(exhausts_budget(5, 0));
        assert!(exhausts_budget(5, 9));
    }

    #[test]
    fn high_priority_entries_are_never_discarded() {
        assert!(!exhausts_budget(5, PROTECTED_PRIORITY));
        assert!(!exhausts_budget(100, PROTECTED_PRIORITY));
        assert!(!exhausts_budget(100, PROTECTED_PRIORITY + 5));
    }
}
