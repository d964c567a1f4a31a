use anyhow::{Context, Result};
use sqlx::PgPool;

pub(crate) mod issue;
pub(crate) mod queue;

/// Creates the schema on first start. Every statement is idempotent, so
/// running against an already initialized database is a no-op.
pub(crate) async fn init(db_pool: &PgPool) -> Result<()> {
    const SCHEMA: &str = include_str!("../../schema.sql");

    sqlx::raw_sql(SCHEMA)
        .execute(db_pool)
        .await
        .context("Failed to create initial database schema")?;

    Ok(())
}

/// Refreshes the materialized per-facet count view. Counts are
/// presentation data; they may lag behind the issue table by one refresh
/// interval.
pub(crate) async fn refresh_counts(db_pool: &PgPool) -> Result<()> {
    sqlx::raw_sql("refresh materialized view concurrently issue_counts")
        .execute(db_pool)
        .await
        .context("Failed to refresh issue counts")?;

    Ok(())
}
