use crate::model::issue::{duplicate_count, priority_rank, Attachment, Comment, Issue, IssueLink, IssueState};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// Result of a read by key. Removed rows are kept as tombstones and only
/// ever surfaced through this distinct variant.
#[derive(Debug)]
pub(crate) enum IssueLookup {
    Found(Box<Issue>),
    Removed,
    NotStored
}

/// Replaces the issue row and all child rows in one transaction, so a
/// concurrent read sees either the whole old record or the whole new one.
/// Partial merge results are rejected; they must never reach the store.
pub(crate) async fn upsert(db_pool: &PgPool, issue: &Issue) -> Result<()> {
    if issue.partial {
        bail!("Refusing to persist partial record for {}", issue.key);
    }

    let mut transaction = db_pool.begin().await?;

    sqlx::query("delete from issue where key = $1")
        .bind(issue.key.as_str())
        .execute(&mut *transaction)
        .await?;

    sqlx::query(
        "insert into issue (
             key, summary, text, reporter_name, reporter_avatar, assignee_name, assignee_avatar,
             creator_name, creator_avatar, description, environment, labels,
             created_date, updated_date, resolved_date, synced_date,
             status, confirmation_status, resolution,
             affected_versions, fix_versions, category, components,
             mojang_priority, mojang_priority_rank, area, platform, os_version, realms_platform,
             ado, votes, legacy_votes, comment_count, duplicate_count, state
         ) values (
             $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
             $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35
         )"
    )
        .bind(issue.key.as_str())
        .bind(issue.summary.as_str())
        .bind(issue.search_text())
        .bind(issue.reporter_name.as_str())
        .bind(issue.reporter_avatar.as_str())
        .bind(issue.assignee_name.as_str())
        .bind(issue.assignee_avatar.as_str())
        .bind(issue.creator_name.as_str())
        .bind(issue.creator_avatar.as_str())
        .bind(issue.description.as_str())
        .bind(issue.environment.as_str())
        .bind(&issue.labels)
        .bind(issue.created_date)
        .bind(issue.updated_date)
        .bind(issue.resolved_date)
        .bind(issue.synced_date)
        .bind(issue.status.as_str())
        .bind(issue.confirmation_status.as_str())
        .bind(issue.resolution.as_str())
        .bind(&issue.affected_versions)
        .bind(&issue.fix_versions)
        .bind(&issue.category)
        .bind(&issue.components)
        .bind(issue.mojang_priority.as_str())
        .bind(priority_rank(issue.mojang_priority.as_str()))
        .bind(issue.area.as_str())
        .bind(issue.platform.as_str())
        .bind(issue.os_version.as_str())
        .bind(issue.realms_platform.as_str())
        .bind(issue.ado.as_str())
        .bind(issue.votes)
        .bind(issue.legacy_votes)
        .bind(issue.comments.len() as i32)
        .bind(duplicate_count(&issue.links))
        .bind(IssueState::Present)
        .execute(&mut *transaction)
        .await
        .with_context(|| format!("Failed to insert issue {}", issue.key))?;

    for comment in &issue.comments {
        sqlx::query(
            "insert into comment (issue_key, comment_id, legacy_id, date, author_name, author_avatar, adf_comment)
             values ($1, $2, $3, $4, $5, $6, $7)"
        )
            .bind(issue.key.as_str())
            .bind(comment.comment_id)
            .bind(comment.legacy_id.as_deref())
            .bind(comment.date)
            .bind(comment.author_name.as_str())
            .bind(comment.author_avatar.as_str())
            .bind(comment.adf_comment.as_str())
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Failed to insert comment for {}", issue.key))?;
    }

    for link in &issue.links {
        sqlx::query(
            "insert into issue_link (issue_key, type, other_key, other_summary, other_status)
             values ($1, $2, $3, $4, $5)"
        )
            .bind(issue.key.as_str())
            .bind(link.link_type.as_str())
            .bind(link.other_key.as_str())
            .bind(link.other_summary.as_str())
            .bind(link.other_status.as_str())
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Failed to insert issue link for {}", issue.key))?;
    }

    for attachment in &issue.attachments {
        sqlx::query(
            "insert into attachment (id, issue_key, filename, author_name, author_avatar, created_date, size, mime_type)
             values ($1, $2, $3, $4, $5, $6, $7, $8)"
        )
            .bind(attachment.id.as_str())
            .bind(issue.key.as_str())
            .bind(attachment.filename.as_str())
            .bind(attachment.author_name.as_str())
            .bind(attachment.author_avatar.as_str())
            .bind(attachment.created_date)
            .bind(attachment.size)
            .bind(attachment.mime_type.as_str())
            .execute(&mut *transaction)
            .await
            .with_context(|| format!("Failed to insert attachment for {}", issue.key))?;
    }

    transaction.commit().await?;

    Ok(())
}

/// Marks a key as removed upstream. The row survives as a tombstone so the
/// web layer can keep serving a stable URL for the deleted issue.
pub(crate) async fn mark_removed(db_pool: &PgPool, key: &str) -> Result<()> {
    sqlx::query(
        "insert into issue (key, synced_date, state) values ($1, now(), 'removed')
         on conflict (key) do update set state = 'removed', synced_date = now()"
    )
        .bind(key)
        .execute(db_pool)
        .await
        .with_context(|| format!("Failed to mark issue {} as removed", key))?;

    Ok(())
}

/// Reads the full record including children. Comments come back ordered by
/// date ascending.
pub(crate) async fn get(db_pool: &PgPool, key: &str) -> Result<IssueLookup> {
    let issue = sqlx::query_as::<_, Issue>("select * from issue where key = $1")
        .bind(key)
        .fetch_optional(db_pool)
        .await
        .with_context(|| format!("Failed to read issue {}", key))?;

    let mut issue = match issue {
        Some(issue) if issue.state == IssueState::Removed => return Ok(IssueLookup::Removed),
        Some(issue) => issue,
        None => return Ok(IssueLookup::NotStored)
    };

    issue.comments = sqlx::query_as::<_, Comment>(
        "select comment_id, legacy_id, date, author_name, author_avatar, adf_comment
         from comment where issue_key = $1 order by date asc"
    )
        .bind(key)
        .fetch_all(db_pool)
        .await?;

    issue.links = sqlx::query_as::<_, IssueLink>(
        "select type, other_key, other_summary, other_status from issue_link where issue_key = $1"
    )
        .bind(key)
        .fetch_all(db_pool)
        .await?;

    issue.attachments = sqlx::query_as::<_, Attachment>(
        "select id, filename, author_name, author_avatar, created_date, size, mime_type
         from attachment where issue_key = $1 order by created_date asc"
    )
        .bind(key)
        .fetch_all(db_pool)
        .await?;

    Ok(IssueLookup::Found(Box::new(issue)))
}

/// Minimal projection for the freshness check: `None` when no row exists,
/// otherwise the stored synced date.
pub(crate) async fn get_for_sync(db_pool: &PgPool, key: &str) -> Result<Option<Option<DateTime<Utc>>>> {
    let row = sqlx::query_scalar::<_, Option<DateTime<Utc>>>("select synced_date from issue where key = $1")
        .bind(key)
        .fetch_optional(db_pool)
        .await
        .with_context(|| format!("Failed to read sync state of issue {}", key))?;

    Ok(row)
}

/// Multi-predicate listing query. Empty strings are wildcards; values for
/// array columns filter by membership.
#[derive(Debug, Default)]
pub(crate) struct IssueFilter {
    pub(crate) project: String,
    pub(crate) status: String,
    pub(crate) confirmation: String,
    pub(crate) resolution: String,
    pub(crate) priority: String,
    pub(crate) reporter: String,
    pub(crate) assignee: String,
    pub(crate) affected_version: String,
    pub(crate) fix_version: String,
    pub(crate) category: String,
    pub(crate) label: String,
    pub(crate) component: String,
    pub(crate) platform: String,
    pub(crate) area: String,
    pub(crate) sort: String,
    pub(crate) offset: i64,
    pub(crate) limit: i64
}

impl IssueFilter {
    fn scalar_predicates(&self) -> [(&'static str, &str); 9] {
        [
            ("project", self.project.as_str()),
            ("status", self.status.as_str()),
            ("confirmation_status", self.confirmation.as_str()),
            ("resolution", self.resolution.as_str()),
            ("mojang_priority", self.priority.as_str()),
            ("reporter_name", self.reporter.as_str()),
            ("assignee_name", self.assignee.as_str()),
            ("platform", self.platform.as_str()),
            ("area", self.area.as_str())
        ]
    }

    fn array_predicates(&self) -> [(&'static str, &str); 5] {
        [
            ("affected_versions", self.affected_version.as_str()),
            ("fix_versions", self.fix_version.as_str()),
            ("category", self.category.as_str()),
            ("labels", self.label.as_str()),
            ("components", self.component.as_str())
        ]
    }

    /// Builds the where clause and the bind values in `$n` order.
    fn where_clause(&self) -> (String, Vec<&str>) {
        let mut clause = String::from("state = 'present'");
        let mut binds = Vec::new();

        for (column, value) in self.scalar_predicates() {
            if !value.is_empty() {
                binds.push(value);
                clause.push_str(format!(" and {} = ${}", column, binds.len()).as_str());
            }
        }

        for (column, value) in self.array_predicates() {
            if !value.is_empty() {
                binds.push(value);
                clause.push_str(format!(" and ${} = any({})", binds.len(), column).as_str());
            }
        }

        if let Some(guard) = self.sort_guard() {
            clause.push_str(" and ");
            clause.push_str(guard);
        }

        (clause, binds)
    }

    fn order_clause(&self) -> &'static str {
        match self.sort.as_str() {
            "updated" => "updated_date desc",
            "resolved" => "resolved_date desc",
            "priority" => "mojang_priority_rank asc, created_date desc",
            "votes" => "total_votes desc",
            "comments" => "comment_count desc",
            "duplicates" => "duplicate_count desc",
            _ => "created_date desc"
        }
    }

    /// The updated and resolved sorts only rank rows that have the date.
    fn sort_guard(&self) -> Option<&'static str> {
        match self.sort.as_str() {
            "updated" => Some("updated_date is not null"),
            "resolved" => Some("resolved_date is not null"),
            _ => None
        }
    }

    /// The materialized count view covers exactly these four facets; any
    /// other constraint forces a live count.
    fn counts_from_view(&self) -> bool {
        let other_constraints = [
            self.priority.as_str(), self.reporter.as_str(), self.assignee.as_str(),
            self.affected_version.as_str(), self.fix_version.as_str(), self.category.as_str(),
            self.label.as_str(), self.component.as_str(), self.platform.as_str(), self.area.as_str()
        ];

        self.sort_guard().is_none() && other_constraints.iter().all(|value| value.is_empty())
    }
}

/// Runs the filter and returns the page plus the total count of matching
/// rows.
pub(crate) async fn filter(db_pool: &PgPool, filter: &IssueFilter) -> Result<(Vec<Issue>, i64)> {
    let (clause, binds) = filter.where_clause();

    let sql = format!(
        "select * from issue where {} order by {} offset ${} limit ${}",
        clause,
        filter.order_clause(),
        binds.len() + 1,
        binds.len() + 2
    );

    let mut query = sqlx::query_as::<_, Issue>(sql.as_str());

    for value in &binds {
        query = query.bind(*value);
    }

    let issues = query
        .bind(filter.offset)
        .bind(filter.limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to filter issues")?;

    let count = count(db_pool, filter).await?;

    Ok((issues, count))
}

async fn count(db_pool: &PgPool, filter: &IssueFilter) -> Result<i64> {
    if filter.counts_from_view() {
        let count = sqlx::query_scalar::<_, i64>(
            "select coalesce(sum(count), 0)::bigint from issue_counts
             where ($1 = '' or project = $1)
             and ($2 = '' or status = $2)
             and ($3 = '' or confirmation_status = $3)
             and ($4 = '' or resolution = $4)"
        )
            .bind(filter.project.as_str())
            .bind(filter.status.as_str())
            .bind(filter.confirmation.as_str())
            .bind(filter.resolution.as_str())
            .fetch_one(db_pool)
            .await
            .context("Failed to count issues from the count view")?;

        return Ok(count);
    }

    let (clause, binds) = filter.where_clause();
    let sql = format!("select count(*) from issue where {}", clause);

    let mut query = sqlx::query_scalar::<_, i64>(sql.as_str());

    for value in &binds {
        query = query.bind(*value);
    }

    Ok(query.fetch_one(db_pool).await.context("Failed to count issues")?)
}

/// Full-text lookup: summary matches unioned with matches against the
/// denormalized search column, newest first.
pub(crate) async fn search(db_pool: &PgPool, text: &str, limit: i64) -> Result<Vec<Issue>> {
    let pattern = format!("%{}%", text);

    let issues = sqlx::query_as::<_, Issue>(
        "select * from (
             select * from issue where state = 'present' and summary ilike $1
             union
             select * from issue where state = 'present' and text ilike $1
         ) as matches
         order by created_date desc
         limit $2"
    )
        .bind(pattern.as_str())
        .bind(limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to search issues")?;

    Ok(issues)
}

pub(crate) async fn by_reporter(db_pool: &PgPool, name: &str, limit: i64) -> Result<Vec<Issue>> {
    let issues = sqlx::query_as::<_, Issue>(
        "select * from issue where state = 'present' and reporter_name = $1 order by created_date desc limit $2"
    )
        .bind(name)
        .bind(limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to list issues by reporter")?;

    Ok(issues)
}

pub(crate) async fn by_assignee(db_pool: &PgPool, name: &str, limit: i64) -> Result<Vec<Issue>> {
    let issues = sqlx::query_as::<_, Issue>(
        "select * from issue where state = 'present' and assignee_name = $1 order by created_date desc limit $2"
    )
        .bind(name)
        .bind(limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to list issues by assignee")?;

    Ok(issues)
}

#[derive(FromRow, Debug, Serialize)]
pub(crate) struct UserComment {
    pub(crate) issue_key: String,
    pub(crate) date: Option<DateTime<Utc>>,
    pub(crate) author_name: String,
    pub(crate) author_avatar: String,
    pub(crate) adf_comment: String
}

pub(crate) async fn comments_by_user(db_pool: &PgPool, name: &str, limit: i64) -> Result<Vec<UserComment>> {
    let comments = sqlx::query_as::<_, UserComment>(
        "select issue_key, date, author_name, author_avatar, adf_comment
         from comment where author_name = $1 order by date desc limit $2"
    )
        .bind(name)
        .bind(limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to list comments by user")?;

    Ok(comments)
}

/// Keys whose fix-version list still contains an upstream placeholder.
/// These get rechecked until the upstream replaces the placeholder with a
/// concrete version.
pub(crate) async fn future_version_keys(db_pool: &PgPool, limit: i64) -> Result<Vec<String>> {
    let keys = sqlx::query_scalar(
        "select key from issue
         where state = 'present'
         and exists (select 1 from unnest(fix_versions) as version where version like 'Future%')
         order by key_num asc
         limit $1"
    )
        .bind(limit)
        .fetch_all(db_pool)
        .await
        .context("Failed to list future version issues")?;

    Ok(keys)
}

pub(crate) async fn max_key_num(db_pool: &PgPool, prefix: &str) -> Result<i32> {
    let max = sqlx::query_scalar("select coalesce(max(key_num), 0) from issue where project = $1")
        .bind(prefix)
        .fetch_one(db_pool)
        .await
        .with_context(|| format!("Failed to read max key number for {}", prefix))?;

    Ok(max)
}

/// Per-project scan cursor, persisted so the bootstrap scan survives
/// restarts.
pub(crate) async fn get_scan_cursor(db_pool: &PgPool, prefix: &str) -> Result<i32> {
    let cursor = sqlx::query_scalar("select last_processed from sync_state where prefix = $1")
        .bind(prefix)
        .fetch_optional(db_pool)
        .await
        .with_context(|| format!("Failed to read scan cursor for {}", prefix))?;

    Ok(cursor.unwrap_or(0))
}

pub(crate) async fn set_scan_cursor(db_pool: &PgPool, prefix: &str, last_processed: i32) -> Result<()> {
    sqlx::query(
        "insert into sync_state (prefix, last_processed) values ($1, $2)
         on conflict (prefix) do update set last_processed = excluded.last_processed"
    )
        .bind(prefix)
        .bind(last_processed)
        .execute(db_pool)
        .await
        .with_context(|| format!("Failed to persist scan cursor for {}", prefix))?;

    Ok(())
}

#[derive(Debug, Serialize)]
pub(crate) struct ProjectStats {
    pub(crate) project: String,
    pub(crate) max_key_num: i32,
    pub(crate) count: i64,
    pub(crate) percent: f64
}

/// Per-project mirror coverage for the status page.
pub(crate) async fn sync_stats(db_pool: &PgPool) -> Result<Vec<ProjectStats>> {
    let rows: Vec<(String, i32, i64)> = sqlx::query_as(
        "select project, coalesce(max(key_num), 0), count(*)
         from issue where state = 'present'
         group by project order by project"
    )
        .fetch_all(db_pool)
        .await
        .context("Failed to read sync stats")?;

    Ok(rows.into_iter()
        .map(|(project, max_key_num, count)| {
            let percent = if max_key_num > 0 {
                count as f64 / max_key_num as f64 * 100.0
            } else {
                0.0
            };

            ProjectStats { project, max_key_num, count, percent }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_is_wildcard() {
        let filter = IssueFilter::default();
        let (clause, binds) = filter.where_clause();

        assert_eq!(clause, "state = 'present'");
        assert!(binds.is_empty());
    }

    #[test]
    fn predicates_bind_in_clause_order() {
        let filter = IssueFilter {
            project: "MC".to_owned(),
            resolution: "Fixed".to_owned(),
            label: "crash".to_owned(),
            ..Default::default()
        };

        let (clause, binds) = filter.where_clause();

        assert_eq!(clause, "state = 'present' and project = $1 and resolution = $2 and $3 = any(labels)");
        assert_eq!(binds, vec!["MC", "Fixed", "crash"]);
    }

    #[test]
    fn updated_sort_excludes_null_dates() {
        let filter = IssueFilter {
            sort: "updated".to_owned(),
            ..Default::default()
        };

        let (clause, _) = filter.where_clause();

        assert!(clause.ends_with("updated_date is not null"));
        assert_eq!(filter.order_clause(), "updated_date desc");
    }

    #[test]
    fn unknown_sort_falls_back_to_created() {
        let filter = IssueFilter {
            sort: "bogus".to_owned(),
            ..Default::default()
        };

        assert_eq!(filter.order_clause(), "created_date desc");
        assert!(filter.sort_guard().is_none());
    }

    #[test]
    fn count_view_covers_only_the_four_facets() {
        let fast = IssueFilter {
            project: "MC".to_owned(),
            status: "Open".to_owned(),
            confirmation: "Confirmed".to_owned(),
            resolution: "Unresolved".to_owned(),
            ..Default::default()
        };
        assert!(fast.counts_from_view());

        let slow = IssueFilter {
            project: "MC".to_owned(),
            label: "crash".to_owned(),
            ..Default::default()
        };
        assert!(!slow.counts_from_view());

        let sorted = IssueFilter {
            sort: "updated".to_owned(),
            ..Default::default()
        };
        assert!(!sorted.counts_from_view());
    }
}
