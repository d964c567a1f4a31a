use crate::metrics;
use crate::model::issue::Comment;
use crate::upstream::time::parse_timestamp;
use crate::upstream::{null_default, sanitize_display_name, UpstreamError};

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

const BASE_URL: &str = "https://bugs-legacy.mojang.com";

/// The historical view: identities and vote counts as they were before the
/// tracker migration, plus the legacy comment ids used for stable anchors.
#[derive(Debug, Default)]
pub(crate) struct LegacyIssue {
    pub(crate) creator_key: String,
    pub(crate) creator_name: String,
    pub(crate) creator_avatar: String,
    pub(crate) reporter_key: String,
    pub(crate) reporter_name: String,
    pub(crate) reporter_avatar: String,
    pub(crate) resolved_date: Option<DateTime<Utc>>,
    pub(crate) votes: i32,
    pub(crate) comments: Vec<Comment>
}

/// Stateless client for the read-only legacy tracker API.
pub(crate) struct LegacyClient {
    client: Client
}

impl LegacyClient {
    pub(crate) fn new() -> Self {
        LegacyClient {
            client: Client::new()
        }
    }

    pub(crate) async fn get_issue(&self, key: &str) -> Result<LegacyIssue, UpstreamError> {
        metrics::UPSTREAM_REQUESTS.with_label_values(&["legacy"]).inc();

        let result = self.request_issue(key).await;

        if result.is_err() {
            metrics::UPSTREAM_ERRORS.with_label_values(&["legacy"]).inc();
        }

        result
    }

    async fn request_issue(&self, key: &str) -> Result<LegacyIssue, UpstreamError> {
        let response = self.client.get(format!("{}/rest/api/2/issue/{}", BASE_URL, key))
            .send()
            .await?;

        let body = response.text().await?;

        let parsed = serde_json::from_str::<LegacyResponse>(body.as_str())
            .map_err(|err| anyhow::Error::new(err).context("Failed to parse legacy response"))?;

        if parsed.key.is_empty() {
            return Err(UpstreamError::NotFound);
        }

        let fields = parsed.fields;
        let mut comments = Vec::with_capacity(fields.comment.comments.len());

        for comment in &fields.comment.comments {
            comments.push(Comment {
                comment_id: 0,
                legacy_id: Some(comment.id.clone()),
                date: parse_timestamp(comment.created.as_str()).context("Invalid legacy comment date")?,
                author_name: sanitize_display_name(comment.author.display_name.as_str()),
                author_avatar: comment.author.avatar_urls.size_48.clone(),
                adf_comment: String::new()
            });
        }

        Ok(LegacyIssue {
            creator_key: fields.creator.key,
            creator_name: fields.creator.display_name,
            creator_avatar: fields.creator.avatar_urls.size_48,
            reporter_key: fields.reporter.key,
            reporter_name: fields.reporter.display_name,
            reporter_avatar: fields.reporter.avatar_urls.size_48,
            resolved_date: parse_timestamp(fields.resolution_date.as_str()).context("Invalid legacy resolution date")?,
            votes: fields.votes.votes,
            comments
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LegacyResponse {
    #[serde(deserialize_with = "null_default")]
    key: String,
    #[serde(deserialize_with = "null_default")]
    fields: RawFields
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawFields {
    #[serde(deserialize_with = "null_default")]
    creator: RawUser,
    #[serde(deserialize_with = "null_default")]
    reporter: RawUser,
    #[serde(alias = "resolutiondate", deserialize_with = "null_default")]
    resolution_date: String,
    #[serde(deserialize_with = "null_default")]
    votes: RawVotes,
    #[serde(deserialize_with = "null_default")]
    comment: RawCommentList
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawUser {
    #[serde(deserialize_with = "null_default")]
    key: String,
    #[serde(deserialize_with = "null_default")]
    display_name: String,
    #[serde(deserialize_with = "null_default")]
    avatar_urls: RawAvatars
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAvatars {
    #[serde(rename = "48x48", deserialize_with = "null_default")]
    size_48: String
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawVotes {
    #[serde(deserialize_with = "null_default")]
    votes: i32
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawCommentList {
    #[serde(deserialize_with = "null_default")]
    comments: Vec<RawComment>
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawComment {
    #[serde(deserialize_with = "null_default")]
    id: String,
    #[serde(deserialize_with = "null_default")]
    author: RawUser,
    #[serde(deserialize_with = "null_default")]
    created: String
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_response_is_parsed() {
        let body = r#"{
            "key": "MC-1",
            "fields": {
                "creator": {"key": "creator-1", "displayName": "Carl", "avatarUrls": {"48x48": "https://example.invalid/c.png"}},
                "reporter": {"key": "reporter-1", "displayName": "Rita", "avatarUrls": {"48x48": "https://example.invalid/r.png"}},
                "resolutiondate": "2014-05-01T10:00:00.000+0000",
                "votes": {"votes": 41},
                "comment": {"comments": [
                    {"id": "10", "author": {"displayName": "Ann", "avatarUrls": {"48x48": ""}}, "created": "2014-05-01T10:00:00.000+0000"}
                ]}
            }
        }"#;

        let parsed = serde_json::from_str::<LegacyResponse>(body).unwrap();

        assert_eq!(parsed.key, "MC-1");
        assert_eq!(parsed.fields.creator.key, "creator-1");
        assert_eq!(parsed.fields.votes.votes, 41);
        assert_eq!(parsed.fields.comment.comments[0].id, "10");
    }

    #[test]
    fn missing_key_means_not_found() {
        let parsed = serde_json::from_str::<LegacyResponse>(r#"{"errorMessages": ["Issue Does Not Exist"]}"#).unwrap();
        assert!(parsed.key.is_empty());
    }
}
