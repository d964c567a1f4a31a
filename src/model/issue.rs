use crate::model::adf;

use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use serde::Serialize;
use sqlx::{FromRow, Type};

/// The six project prefixes mirrored from the upstream tracker.
pub(crate) const PROJECTS: [&str; 6] = ["MC", "MCPE", "MCL", "REALMS", "WEB", "BDS"];

/// How long a synced issue counts as fresh for the read path.
pub(crate) const FRESHNESS_WINDOW_MINUTES: i64 = 5;

/// The canonical record merged from the three upstream views.
#[derive(FromRow, Display, Debug, Default, Serialize)]
#[display(fmt = "{}", key)]
pub(crate) struct Issue {
    pub(crate) key: String,
    pub(crate) summary: String,
    pub(crate) reporter_name: String,
    pub(crate) reporter_avatar: String,
    pub(crate) assignee_name: String,
    pub(crate) assignee_avatar: String,
    pub(crate) creator_name: String,
    pub(crate) creator_avatar: String,
    pub(crate) description: String,
    pub(crate) environment: String,
    pub(crate) labels: Vec<String>,
    pub(crate) created_date: Option<DateTime<Utc>>,
    pub(crate) updated_date: Option<DateTime<Utc>>,
    pub(crate) resolved_date: Option<DateTime<Utc>>,
    pub(crate) synced_date: Option<DateTime<Utc>>,
    pub(crate) status: String,
    pub(crate) confirmation_status: String,
    pub(crate) resolution: String,
    pub(crate) affected_versions: Vec<String>,
    pub(crate) fix_versions: Vec<String>,
    pub(crate) category: Vec<String>,
    pub(crate) components: Vec<String>,
    pub(crate) mojang_priority: String,
    pub(crate) area: String,
    pub(crate) platform: String,
    pub(crate) os_version: String,
    pub(crate) realms_platform: String,
    pub(crate) ado: String,
    pub(crate) votes: i32,
    pub(crate) legacy_votes: i32,
    pub(crate) comment_count: i32,
    pub(crate) duplicate_count: i32,

    #[sqlx(skip)]
    pub(crate) comments: Vec<Comment>,
    #[sqlx(skip)]
    pub(crate) links: Vec<IssueLink>,
    #[sqlx(skip)]
    pub(crate) attachments: Vec<Attachment>,

    pub(crate) state: IssueState,

    /// Set when the enrichment view was unavailable during the merge.
    /// Partial records may be displayed but are never persisted.
    #[sqlx(skip)]
    pub(crate) partial: bool
}

#[derive(FromRow, Debug, Default, Clone, Serialize)]
pub(crate) struct Comment {
    pub(crate) comment_id: i64,
    pub(crate) legacy_id: Option<String>,
    pub(crate) date: Option<DateTime<Utc>>,
    pub(crate) author_name: String,
    pub(crate) author_avatar: String,
    pub(crate) adf_comment: String
}

#[derive(FromRow, Debug, Default, Clone, Serialize)]
pub(crate) struct IssueLink {
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub(crate) link_type: String,
    pub(crate) other_key: String,
    pub(crate) other_summary: String,
    pub(crate) other_status: String
}

#[derive(FromRow, Debug, Default, Clone, Serialize)]
pub(crate) struct Attachment {
    pub(crate) id: String,
    pub(crate) filename: String,
    pub(crate) author_name: String,
    pub(crate) author_avatar: String,
    pub(crate) created_date: Option<DateTime<Utc>>,
    pub(crate) size: i64,
    pub(crate) mime_type: String
}

#[derive(Type, Display, Debug, Default, Copy, Clone, Eq, PartialEq, Serialize)]
#[sqlx(type_name = "issue_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub(crate) enum IssueState {
    #[default]
    #[display(fmt = "present")]
    Present,
    #[display(fmt = "removed")]
    Removed
}

impl Issue {
    /// Builds the denormalized search column: summary plus the plain text
    /// of the description, environment and all comments.
    pub(crate) fn search_text(&self) -> String {
        let mut text = self.summary.clone();

        for document in [self.description.as_str(), self.environment.as_str()] {
            let plain = adf::extract_plain_text(document);

            if !plain.is_empty() {
                text.push('\n');
                text.push_str(plain.as_str());
            }
        }

        for comment in &self.comments {
            let plain = adf::extract_plain_text(comment.adf_comment.as_str());

            if !plain.is_empty() {
                text.push('\n');
                text.push_str(plain.as_str());
            }
        }

        text
    }
}

/// True while the last persisted sync is recent enough that the pipeline
/// does not need to be re-entered for this key.
pub(crate) fn is_up_to_date(synced_date: Option<DateTime<Utc>>) -> bool {
    match synced_date {
        Some(synced) => synced > Utc::now() - Duration::minutes(FRESHNESS_WINDOW_MINUTES),
        None => false
    }
}

/// Returns the alphabetic project prefix of a key such as `MC-4`.
pub(crate) fn project_of(key: &str) -> &str {
    key.split('-').next().unwrap_or_default()
}

/// Splits a well-formed key into its known project prefix and number.
/// Returns `None` for malformed keys and unknown prefixes.
pub(crate) fn parse_key(key: &str) -> Option<(&str, u32)> {
    let (project, number) = key.split_once('-')?;

    if !PROJECTS.contains(&project) {
        return None;
    }

    let key_num = number.parse::<u32>().ok().filter(|n| *n > 0)?;
    Some((project, key_num))
}

/// The portal id the service desk API uses to disambiguate projects.
pub(crate) fn portal_id(project: &str) -> Option<i32> {
    match project {
        "MC" => Some(2),
        "MCPE" => Some(6),
        "MCL" => Some(7),
        "REALMS" => Some(9),
        "WEB" => Some(10),
        "BDS" => Some(4),
        _ => None
    }
}

/// Links of this type feed the denormalized duplicate count.
pub(crate) fn duplicate_count(links: &[IssueLink]) -> i32 {
    links.iter().filter(|link| link.link_type == "is duplicated by").count() as i32
}

/// Rank used for the priority sort key; lower sorts first, unknown last.
pub(crate) fn priority_rank(priority: &str) -> i32 {
    match priority {
        "Very Important" => 1,
        "Important" => 2,
        "Normal" => 3,
        "Low" => 4,
        _ => 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_projection() {
        assert_eq!(parse_key("MC-1"), Some(("MC", 1)));
        assert_eq!(parse_key("REALMS-12345"), Some(("REALMS", 12345)));
        assert_eq!(project_of("MCPE-44"), "MCPE");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert_eq!(parse_key("MC"), None);
        assert_eq!(parse_key("MC-"), None);
        assert_eq!(parse_key("MC-0"), None);
        assert_eq!(parse_key("MC-abc"), None);
        assert_eq!(parse_key("JIRA-1"), None);
    }

    #[test]
    fn portal_table() {
        assert_eq!(portal_id("MC"), Some(2));
        assert_eq!(portal_id("MCPE"), Some(6));
        assert_eq!(portal_id("MCL"), Some(7));
        assert_eq!(portal_id("REALMS"), Some(9));
        assert_eq!(portal_id("WEB"), Some(10));
        assert_eq!(portal_id("BDS"), Some(4));
        assert_eq!(portal_id("UNKNOWN"), None);
    }

    #[test]
    fn freshness_predicate() {
        assert!(!is_up_to_date(None));
        assert!(is_up_to_date(Some(Utc::now())));
        assert!(is_up_to_date(Some(Utc::now() - Duration::minutes(4))));
        assert!(!is_up_to_date(Some(Utc::now() - Duration::minutes(6))));
    }

    #[test]
    fn duplicate_count_only_counts_duplicated_by() {
        let links = vec![
            IssueLink { link_type: "is duplicated by".to_owned(), other_key: "MC-2".to_owned(), ..Default::default() },
            IssueLink { link_type: "is duplicated by".to_owned(), other_key: "MC-3".to_owned(), ..Default::default() },
            IssueLink { link_type: "relates to".to_owned(), other_key: "MC-4".to_owned(), ..Default::default() }
        ];

        assert_eq!(duplicate_count(&links), 2);
    }

    #[test]
    fn search_text_concatenates_all_documents() {
        let issue = Issue {
            key: "MC-1".to_owned(),
            summary: "Creeper explodes twice".to_owned(),
            description: r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"boom"}]}]}"#.to_owned(),
            comments: vec![Comment {
                adf_comment: r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"confirmed"}]}]}"#.to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert_eq!(issue.search_text(), "Creeper explodes twice\nboom\n\nconfirmed\n");
    }

    #[test]
    fn priority_ranks_are_ordered() {
        assert!(priority_rank("Very Important") < priority_rank("Important"));
        assert!(priority_rank("Important") < priority_rank("Normal"));
        assert!(priority_rank("Normal") < priority_rank("Low"));
        assert!(priority_rank("Low") < priority_rank(""));
    }
}
