use crate::config::Config;
use crate::merge::{merge, MergeFailure};
use crate::model::issue::{is_up_to_date, Issue};
use crate::store;
use crate::store::issue::IssueLookup;
use crate::upstream::legacy::LegacyClient;
use crate::upstream::public_jql::PublicJqlClient;
use crate::upstream::service_desk::ServiceDeskClient;

use anyhow::{anyhow, Result};
use log::warn;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Owns the three upstream clients and the database handle; every piece of
/// the pipeline goes through here.
pub(crate) struct SyncService {
    pub(crate) db_pool: PgPool,
    pub(crate) service_desk: ServiceDeskClient,
    pub(crate) public_jql: PublicJqlClient,
    pub(crate) legacy: LegacyClient,
    pub(crate) config: Config,
    pub(crate) shutdown: CancellationToken
}

/// What a queued refresh did; the processor maps this onto the queue.
#[derive(Debug)]
pub(crate) enum RefreshOutcome {
    /// The stored record was fresh enough; nothing fetched.
    UpToDate,
    /// A non-partial merge was persisted.
    Refreshed,
    /// The authoritative upstream no longer knows the key; the stored row
    /// was tombstoned.
    Removed,
    /// Merged without the enrichment view; nothing persisted.
    Partial,
    /// The refresh failed and should be retried with backoff.
    Failed(anyhow::Error)
}

/// What the read-through path produced for an interactive caller.
pub(crate) enum ReadOutcome {
    Found(Box<Issue>),
    Removed,
    NotFound
}

impl SyncService {
    pub(crate) fn new(db_pool: PgPool, config: Config, shutdown: CancellationToken) -> Self {
        let service_desk = ServiceDeskClient::new(config.jira_email.clone(), config.jira_password.clone());

        SyncService {
            db_pool,
            service_desk,
            public_jql: PublicJqlClient::new(),
            legacy: LegacyClient::new(),
            config,
            shutdown
        }
    }

    /// Fetches all three upstream views in parallel, joined at a single
    /// barrier, and merges them. Cancelling the token aborts the in-flight
    /// requests.
    async fn fetch_issue(&self, key: &str, cancellation: &CancellationToken) -> Result<Issue, MergeFailure> {
        let fan_out = async {
            tokio::join!(
                self.service_desk.get_issue(key),
                self.public_jql.get_issue(key),
                self.legacy.get_issue(key)
            )
        };

        let (service_desk, public, legacy) = tokio::select! {
            views = fan_out => views,
            _ = cancellation.cancelled() => return Err(MergeFailure::Transient(anyhow!("Refresh cancelled by shutdown")))
        };

        merge(
            key,
            service_desk,
            public,
            legacy,
            self.config.is_redacted(key),
            self.config.legacy_cutover
        )
    }

    /// Refreshes one key from the queue. Decides between persisting,
    /// tombstoning and reporting a retriable failure; the caller owns the
    /// matching queue bookkeeping.
    pub(crate) async fn refresh_issue(&self, key: &str, cancellation: &CancellationToken) -> RefreshOutcome {
        let stored = match store::issue::get_for_sync(&self.db_pool, key).await {
            Ok(stored) => stored,
            Err(error) => return RefreshOutcome::Failed(error)
        };

        if let Some(synced_date) = stored {
            if is_up_to_date(synced_date) {
                return RefreshOutcome::UpToDate;
            }
        }

        match self.fetch_issue(key, cancellation).await {
            Ok(issue) if issue.partial => RefreshOutcome::Partial,
            Ok(issue) => match store::issue::upsert(&self.db_pool, &issue).await {
                Ok(()) => RefreshOutcome::Refreshed,
                Err(error) => RefreshOutcome::Failed(error)
            },
            Err(MergeFailure::NotFound) if stored.is_some() => {
                match store::issue::mark_removed(&self.db_pool, key).await {
                    Ok(()) => RefreshOutcome::Removed,
                    Err(error) => RefreshOutcome::Failed(error)
                }
            }
            Err(MergeFailure::NotFound) => RefreshOutcome::Failed(anyhow!("Issue {} not found upstream and never stored", key)),
            Err(MergeFailure::Transient(error)) => RefreshOutcome::Failed(error)
        }
    }

    /// Read-through get for the web layer: serves from the store and only
    /// falls through to the pipeline for keys that were never stored.
    /// A partial result is returned for display but not persisted.
    pub(crate) async fn get_issue(&self, key: &str) -> Result<ReadOutcome, MergeFailure> {
        match store::issue::get(&self.db_pool, key).await? {
            IssueLookup::Found(issue) => return Ok(ReadOutcome::Found(issue)),
            IssueLookup::Removed => return Ok(ReadOutcome::Removed),
            IssueLookup::NotStored => {}
        }

        match self.fetch_issue(key, &self.shutdown).await {
            Ok(issue) => {
                if !issue.partial {
                    if let Err(error) = store::issue::upsert(&self.db_pool, &issue).await {
                        warn!("Failed to persist freshly fetched issue {}: {:#}", key, error);
                    }
                }

                Ok(ReadOutcome::Found(Box::new(issue)))
            }
            Err(MergeFailure::NotFound) => Ok(ReadOutcome::NotFound),
            Err(error) => Err(error)
        }
    }
}
