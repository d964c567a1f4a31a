use crate::model::issue::{duplicate_count, Issue};
use crate::upstream::legacy::LegacyIssue;
use crate::upstream::public_jql::PublicIssue;
use crate::upstream::service_desk::ServiceDeskIssue;
use crate::upstream::UpstreamError;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a merge produced no record at all. Partial records are not a
/// failure; they come back as an [Issue] with the partial flag set.
#[derive(Error, Debug)]
pub(crate) enum MergeFailure {
    #[error("issue does not exist on the authoritative upstream")]
    NotFound,

    #[error(transparent)]
    Transient(#[from] anyhow::Error)
}

/// Combines the three upstream views into the canonical record.
///
/// The service desk view is authoritative and required: any failure other
/// than not-found aborts the merge as transient. The public view only
/// enriches; its absence flags the result as partial (displayable, never
/// persisted). The legacy view must be intact for issues created before
/// the cutover and is otherwise optional.
pub(crate) fn merge(
    key: &str,
    service_desk: Result<ServiceDeskIssue, UpstreamError>,
    public: Result<PublicIssue, UpstreamError>,
    legacy: Result<LegacyIssue, UpstreamError>,
    redacted: bool,
    legacy_cutover: DateTime<Utc>
) -> Result<Issue, MergeFailure> {
    let primary = match service_desk {
        Ok(view) => view,
        Err(UpstreamError::NotFound) => return Err(MergeFailure::NotFound),
        Err(error) => return Err(MergeFailure::Transient(anyhow::Error::new(error).context("Authoritative view unavailable")))
    };

    let mut issue = Issue {
        key: key.to_owned(),
        summary: primary.summary,
        reporter_name: primary.reporter_name,
        reporter_avatar: primary.reporter_avatar,
        assignee_name: primary.assignee_name,
        assignee_avatar: primary.assignee_avatar,
        description: primary.description,
        environment: primary.environment,
        created_date: primary.created_date,
        status: primary.status,
        affected_versions: primary.affected_versions,
        components: primary.components,
        realms_platform: primary.realms_platform,
        comments: primary.comments,
        ..Default::default()
    };

    match public {
        Ok(enrichment) => {
            issue.labels = enrichment.labels;
            issue.updated_date = enrichment.updated_date;
            issue.resolved_date = enrichment.resolved_date;
            issue.confirmation_status = enrichment.confirmation_status;
            issue.resolution = enrichment.resolution;
            issue.fix_versions = enrichment.fix_versions;
            issue.category = enrichment.category;
            issue.mojang_priority = enrichment.mojang_priority;
            issue.area = enrichment.area;
            issue.platform = enrichment.platform;
            issue.os_version = enrichment.os_version;
            issue.ado = enrichment.ado;
            issue.votes = enrichment.votes;
            issue.links = enrichment.links;
            issue.attachments = enrichment.attachments;
            issue.synced_date = Some(Utc::now());
        }
        Err(_) => issue.partial = true
    }

    let legacy = match legacy {
        Ok(view) => Some(view),
        Err(UpstreamError::NotFound) => None,
        Err(error) => {
            // Issues predating the cutover must have an intact historical
            // view; for anything newer the legacy tracker is optional
            let predates_cutover = issue.created_date.map_or(false, |created| created < legacy_cutover);

            if predates_cutover {
                return Err(MergeFailure::Transient(anyhow::Error::new(error).context("Historical view unavailable for a pre-cutover issue")));
            }

            None
        }
    };

    if let Some(historical) = legacy {
        if historical.creator_key != historical.reporter_key && !redacted {
            issue.creator_name = historical.creator_name.clone();
            issue.creator_avatar = historical.creator_avatar.clone();
        }

        if issue.reporter_name == "migrated" && !redacted {
            issue.reporter_name = historical.reporter_name.clone();
            issue.reporter_avatar = historical.reporter_avatar.clone();
        }

        if issue.resolved_date.is_some() && historical.resolved_date.is_some() {
            issue.resolved_date = historical.resolved_date;
        }

        issue.legacy_votes = historical.votes;

        claim_legacy_comments(&mut issue, &historical);
    }

    issue.comment_count = issue.comments.len() as i32;
    issue.duplicate_count = duplicate_count(&issue.links);

    Ok(issue)
}

/// Assigns legacy ids (and pre-migration author identities) to the merged
/// comments by matching on the second-resolution timestamp. Each legacy
/// comment is claimed at most once.
fn claim_legacy_comments(issue: &mut Issue, historical: &LegacyIssue) {
    let mut by_second: HashMap<i64, Vec<usize>> = HashMap::new();

    for (index, comment) in historical.comments.iter().enumerate() {
        if let Some(date) = comment.date {
            by_second.entry(date.timestamp()).or_default().push(index);
        }
    }

    let mut claimed = HashSet::new();

    for comment in &mut issue.comments {
        let second = match comment.date {
            Some(date) => date.timestamp(),
            None => continue
        };

        let Some(candidates) = by_second.get(&second) else {
            continue;
        };

        let Some(index) = candidates.iter().copied().find(|index| !claimed.contains(index)) else {
            continue;
        };

        claimed.insert(index);

        let legacy_comment = &historical.comments[index];
        comment.legacy_id = legacy_comment.legacy_id.clone();

        if comment.author_name == "migrated" {
            comment.author_name = legacy_comment.author_name.clone();
            comment.author_avatar = legacy_comment.author_avatar.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::issue::Comment;

    use anyhow::anyhow;
    use chrono::TimeZone;

    fn cutover() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 11, 0, 0, 0).unwrap()
    }

    fn primary(summary: &str) -> ServiceDeskIssue {
        ServiceDeskIssue {
            key: "MC-1".to_owned(),
            summary: summary.to_owned(),
            reporter_name: "Alex".to_owned(),
            created_date: Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
            status: "Open".to_owned(),
            ..Default::default()
        }
    }

    fn comment_at(timestamp: i64, author: &str) -> Comment {
        Comment {
            date: Some(Utc.timestamp_opt(timestamp, 0).unwrap()),
            author_name: author.to_owned(),
            ..Default::default()
        }
    }

    fn legacy_comment_at(timestamp: i64, legacy_id: &str, author: &str) -> Comment {
        Comment {
            legacy_id: Some(legacy_id.to_owned()),
            date: Some(Utc.timestamp_opt(timestamp, 0).unwrap()),
            author_name: author.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn first_sight_merges_enrichment() {
        let enrichment = PublicIssue {
            key: "MC-1".to_owned(),
            resolution: "Fixed".to_owned(),
            fix_versions: vec!["1.0".to_owned()],
            ..Default::default()
        };

        let issue = merge(
            "MC-1",
            Ok(primary("Crash")),
            Ok(enrichment),
            Err(UpstreamError::NotFound),
            false,
            cutover()
        ).unwrap();

        assert_eq!(issue.summary, "Crash");
        assert_eq!(issue.resolution, "Fixed");
        assert_eq!(issue.fix_versions, vec!["1.0"]);
        assert!(issue.synced_date.is_some());
        assert!(!issue.partial);
    }

    #[test]
    fn authoritative_not_found_propagates() {
        let result = merge(
            "MC-1",
            Err(UpstreamError::NotFound),
            Ok(PublicIssue::default()),
            Err(UpstreamError::NotFound),
            false,
            cutover()
        );

        assert!(matches!(result, Err(MergeFailure::NotFound)));
    }

    #[test]
    fn authoritative_transport_failure_aborts() {
        let result = merge(
            "MC-1",
            Err(UpstreamError::Other(anyhow!("boom"))),
            Ok(PublicIssue::default()),
            Err(UpstreamError::NotFound),
            false,
            cutover()
        );

        assert!(matches!(result, Err(MergeFailure::Transient(_))));
    }

    #[test]
    fn enrichment_failure_is_partial_without_synced_date() {
        let issue = merge(
            "MC-1",
            Ok(primary("Crash")),
            Err(UpstreamError::Timeout),
            Err(UpstreamError::NotFound),
            false,
            cutover()
        ).unwrap();

        assert!(issue.partial);
        assert!(issue.synced_date.is_none());
    }

    #[test]
    fn legacy_failure_aborts_only_before_cutover() {
        let mut old = primary("Old crash");
        old.created_date = Some(Utc.with_ymd_and_hms(2014, 5, 1, 0, 0, 0).unwrap());

        let result = merge(
            "MC-1",
            Ok(old),
            Ok(PublicIssue::default()),
            Err(UpstreamError::Timeout),
            false,
            cutover()
        );
        assert!(matches!(result, Err(MergeFailure::Transient(_))));

        // A post-cutover issue tolerates any legacy failure
        let issue = merge(
            "MC-1",
            Ok(primary("New crash")),
            Ok(PublicIssue::default()),
            Err(UpstreamError::Timeout),
            false,
            cutover()
        ).unwrap();
        assert!(!issue.partial);
    }

    #[test]
    fn creator_overlay_requires_distinct_identity_and_no_redaction() {
        let historical = LegacyIssue {
            creator_key: "creator-1".to_owned(),
            creator_name: "Carl".to_owned(),
            reporter_key: "reporter-1".to_owned(),
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(primary("Crash")), Ok(PublicIssue::default()), Ok(historical), false, cutover()).unwrap();
        assert_eq!(issue.creator_name, "Carl");

        let same_identity = LegacyIssue {
            creator_key: "reporter-1".to_owned(),
            creator_name: "Carl".to_owned(),
            reporter_key: "reporter-1".to_owned(),
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(primary("Crash")), Ok(PublicIssue::default()), Ok(same_identity), false, cutover()).unwrap();
        assert_eq!(issue.creator_name, "");

        let redacted_view = LegacyIssue {
            creator_key: "creator-1".to_owned(),
            creator_name: "Carl".to_owned(),
            reporter_key: "reporter-1".to_owned(),
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(primary("Crash")), Ok(PublicIssue::default()), Ok(redacted_view), true, cutover()).unwrap();
        assert_eq!(issue.creator_name, "");
    }

    #[test]
    fn migrated_reporter_is_replaced_from_legacy() {
        let mut view = primary("Crash");
        view.reporter_name = "migrated".to_owned();

        let historical = LegacyIssue {
            reporter_name: "Rita".to_owned(),
            reporter_avatar: "https://example.invalid/r.png".to_owned(),
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(view), Ok(PublicIssue::default()), Ok(historical), false, cutover()).unwrap();

        assert_eq!(issue.reporter_name, "Rita");
        assert_eq!(issue.reporter_avatar, "https://example.invalid/r.png");
    }

    #[test]
    fn legacy_resolved_date_wins_when_both_exist() {
        let enrichment = PublicIssue {
            resolved_date: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };

        let historical = LegacyIssue {
            resolved_date: Some(Utc.with_ymd_and_hms(2014, 5, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(primary("Crash")), Ok(enrichment), Ok(historical), false, cutover()).unwrap();
        assert_eq!(issue.resolved_date, Some(Utc.with_ymd_and_hms(2014, 5, 1, 0, 0, 0).unwrap()));

        // Without an enrichment date the historical one is not copied
        let historical = LegacyIssue {
            resolved_date: Some(Utc.with_ymd_and_hms(2014, 5, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(primary("Crash")), Ok(PublicIssue::default()), Ok(historical), false, cutover()).unwrap();
        assert_eq!(issue.resolved_date, None);
    }

    #[test]
    fn legacy_comments_are_claimed_once_by_timestamp() {
        let mut view = primary("Crash");
        view.comments = vec![comment_at(1_700_000_000, "Ann"), comment_at(1_700_000_060, "migrated")];

        let historical = LegacyIssue {
            comments: vec![
                legacy_comment_at(1_700_000_000, "10", "Old Ann"),
                legacy_comment_at(1_700_000_060, "20", "Bob")
            ],
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(view), Ok(PublicIssue::default()), Ok(historical), false, cutover()).unwrap();

        assert_eq!(issue.comments[0].legacy_id.as_deref(), Some("10"));
        assert_eq!(issue.comments[0].author_name, "Ann");
        assert_eq!(issue.comments[1].legacy_id.as_deref(), Some("20"));
        assert_eq!(issue.comments[1].author_name, "Bob");
    }

    #[test]
    fn two_comments_in_the_same_second_claim_distinct_ids() {
        let mut view = primary("Crash");
        view.comments = vec![comment_at(1_700_000_000, "Ann"), comment_at(1_700_000_000, "Ben")];

        let historical = LegacyIssue {
            comments: vec![
                legacy_comment_at(1_700_000_000, "10", "Old Ann"),
                legacy_comment_at(1_700_000_000, "20", "Old Ben")
            ],
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(view), Ok(PublicIssue::default()), Ok(historical), false, cutover()).unwrap();

        assert_eq!(issue.comments[0].legacy_id.as_deref(), Some("10"));
        assert_eq!(issue.comments[1].legacy_id.as_deref(), Some("20"));
    }

    #[test]
    fn legacy_votes_are_kept_separately() {
        let enrichment = PublicIssue {
            votes: 7,
            ..Default::default()
        };

        let historical = LegacyIssue {
            votes: 35,
            ..Default::default()
        };

        let issue = merge("MC-1", Ok(primary("Crash")), Ok(enrichment), Ok(historical), false, cutover()).unwrap();

        assert_eq!(issue.votes, 7);
        assert_eq!(issue.legacy_votes, 35);
    }
}
