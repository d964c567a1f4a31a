use crate::metrics;
use crate::model::issue::{project_of, Attachment, IssueLink};
use crate::upstream::time::parse_timestamp;
use crate::upstream::{null_default, sanitize_display_name, UpstreamError};

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing_unwrap::ResultExt;

const SEARCH_URL: &str = "https://bugs.mojang.com/api/jql-search-post";

/// The optional view is on a short budget: it only enriches the record and
/// a slow response must not hold up the whole refresh.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// The enrichment view of an issue from the public JQL endpoint.
#[derive(Debug, Default)]
pub(crate) struct PublicIssue {
    pub(crate) key: String,
    pub(crate) labels: Vec<String>,
    pub(crate) updated_date: Option<DateTime<Utc>>,
    pub(crate) resolved_date: Option<DateTime<Utc>>,
    pub(crate) confirmation_status: String,
    pub(crate) resolution: String,
    pub(crate) fix_versions: Vec<String>,
    pub(crate) category: Vec<String>,
    pub(crate) mojang_priority: String,
    pub(crate) area: String,
    pub(crate) platform: String,
    pub(crate) os_version: String,
    pub(crate) ado: String,
    pub(crate) votes: i32,
    pub(crate) links: Vec<IssueLink>,
    pub(crate) attachments: Vec<Attachment>
}

/// Stateless client for the public JQL search endpoint.
pub(crate) struct PublicJqlClient {
    client: Client
}

impl PublicJqlClient {
    pub(crate) fn new() -> Self {
        PublicJqlClient {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_log()
        }
    }

    pub(crate) async fn get_issue(&self, key: &str) -> Result<PublicIssue, UpstreamError> {
        metrics::UPSTREAM_REQUESTS.with_label_values(&["public_jql"]).inc();

        let result = self.request_issue(key).await;

        if result.is_err() {
            metrics::UPSTREAM_ERRORS.with_label_values(&["public_jql"]).inc();
        }

        result
    }

    async fn request_issue(&self, key: &str) -> Result<PublicIssue, UpstreamError> {
        let response = self.client.post(SEARCH_URL)
            .json(&json!({
                "advanced": true,
                "project": project_of(key),
                "search": format!("key = {}", key),
                "maxResults": 1
            }))
            .send()
            .await?;

        let body = response.text().await?;

        let parsed = serde_json::from_str::<SearchResponse>(body.as_str())
            .map_err(|err| anyhow::Error::new(err).context("Failed to parse public JQL response"))?;

        let raw = match parsed.issues.into_iter().next() {
            Some(issue) => issue,
            None => return Err(UpstreamError::NotFound)
        };

        let fields = raw.fields;

        let mut links = Vec::with_capacity(fields.issue_links.len());

        for link in &fields.issue_links {
            if !link.outward_issue.key.is_empty() {
                links.push(IssueLink {
                    link_type: link.link_type.outward.clone(),
                    other_key: link.outward_issue.key.clone(),
                    other_summary: link.outward_issue.fields.summary.clone(),
                    other_status: link.outward_issue.fields.status.name.clone()
                });
            } else if !link.inward_issue.key.is_empty() {
                links.push(IssueLink {
                    link_type: link.link_type.inward.clone(),
                    other_key: link.inward_issue.key.clone(),
                    other_summary: link.inward_issue.fields.summary.clone(),
                    other_status: link.inward_issue.fields.status.name.clone()
                });
            }
        }

        let mut attachments = Vec::with_capacity(fields.attachment.len());

        for attachment in &fields.attachment {
            attachments.push(Attachment {
                id: attachment.id.clone(),
                filename: attachment.filename.clone(),
                author_name: sanitize_display_name(attachment.author.display_name.as_str()),
                author_avatar: attachment.author.avatar_urls.size_48.clone(),
                created_date: parse_timestamp(attachment.created.as_str()).context("Invalid attachment date")?,
                size: attachment.size,
                mime_type: attachment.mime_type.clone()
            });
        }

        Ok(PublicIssue {
            key: raw.key,
            labels: fields.labels,
            updated_date: parse_timestamp(fields.updated.as_str()).context("Invalid updated date")?,
            resolved_date: parse_timestamp(fields.resolution_date.as_str()).context("Invalid resolution date")?,
            confirmation_status: fields.confirmation_status.value,
            resolution: fields.resolution.name,
            fix_versions: fields.fix_versions.into_iter().map(|version| version.name).collect(),
            category: fields.category.into_iter().map(|category| category.value).collect(),
            mojang_priority: fields.mojang_priority.value,
            area: fields.area.value,
            platform: fields.platform.value.trim().to_owned(),
            os_version: fields.os_version,
            ado: fields.ado,
            votes: fields.votes,
            links,
            attachments
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchResponse {
    #[serde(deserialize_with = "null_default")]
    issues: Vec<RawIssue>
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawIssue {
    key: String,
    #[serde(deserialize_with = "null_default")]
    fields: RawFields
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawFields {
    #[serde(deserialize_with = "null_default")]
    labels: Vec<String>,
    #[serde(deserialize_with = "null_default")]
    updated: String,
    #[serde(alias = "resolutiondate", deserialize_with = "null_default")]
    resolution_date: String,
    #[serde(deserialize_with = "null_default")]
    resolution: NamedValue,
    #[serde(rename = "customfield_10054", deserialize_with = "null_default")]
    confirmation_status: CustomValue,
    #[serde(rename = "customfield_10055", deserialize_with = "null_default")]
    category: Vec<CustomValue>,
    #[serde(rename = "customfield_10049", deserialize_with = "null_default")]
    mojang_priority: CustomValue,
    #[serde(rename = "customfield_10051", deserialize_with = "null_default")]
    area: CustomValue,
    #[serde(rename = "customfield_10063", deserialize_with = "null_default")]
    platform: CustomValue,
    #[serde(rename = "customfield_10061", deserialize_with = "null_default")]
    os_version: String,
    #[serde(rename = "customfield_10050", deserialize_with = "null_default")]
    ado: String,
    #[serde(rename = "customfield_10070", deserialize_with = "null_default")]
    votes: i32,
    #[serde(deserialize_with = "null_default")]
    fix_versions: Vec<NamedValue>,
    #[serde(deserialize_with = "null_default")]
    attachment: Vec<RawAttachment>,
    #[serde(alias = "issuelinks", deserialize_with = "null_default")]
    issue_links: Vec<RawLink>
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
struct NamedValue {
    #[serde(deserialize_with = "null_default")]
    name: String
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
struct CustomValue {
    #[serde(deserialize_with = "null_default")]
    value: String
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawAttachment {
    #[serde(deserialize_with = "null_default")]
    id: String,
    #[serde(deserialize_with = "null_default")]
    filename: String,
    #[serde(deserialize_with = "null_default")]
    author: RawAuthor,
    #[serde(deserialize_with = "null_default")]
    created: String,
    #[serde(deserialize_with = "null_default")]
    size: i64,
    #[serde(deserialize_with = "null_default")]
    mime_type: String
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawAuthor {
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
#[serde(default, rename_all = "camelCase")]
struct RawLink {
    #[serde(rename = "type", deserialize_with = "null_default")]
    link_type: RawLinkType,
    #[serde(deserialize_with = "null_default")]
    inward_issue: RawLinkedIssue,
    #[serde(deserialize_with = "null_default")]
    outward_issue: RawLinkedIssue
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLinkType {
    #[serde(deserialize_with = "null_default")]
    inward: String,
    #[serde(deserialize_with = "null_default")]
    outward: String
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLinkedIssue {
    #[serde(deserialize_with = "null_default")]
    key: String,
    #[serde(deserialize_with = "null_default")]
    fields: RawLinkedFields
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLinkedFields {
    #[serde(deserialize_with = "null_default")]
    summary: String,
    #[serde(deserialize_with = "null_default")]
    status: NamedValue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_is_parsed() {
        let body = r#"{
            "issues": [{
                "key": "MC-1",
                "fields": {
                    "labels": ["crash"],
                    "updated": "2023-11-14T22:13:20Z",
                    "resolutiondate": "2023-11-15T00:00:00Z",
                    "resolution": {"name": "Fixed"},
                    "customfield_10054": {"value": "Confirmed"},
                    "customfield_10055": [{"value": "Performance"}],
                    "customfield_10049": {"value": "Important"},
                    "customfield_10070": 12,
                    "fixVersions": [{"name": "1.21"}],
                    "attachment": [],
                    "issuelinks": [
                        {
                            "type": {"inward": "is duplicated by", "outward": "duplicates"},
                            "inwardIssue": {"key": "MC-2", "fields": {"summary": "Same crash", "status": {"name": "Resolved"}}}
                        }
                    ]
                }
            }]
        }"#;

        let parsed = serde_json::from_str::<SearchResponse>(body).unwrap();
        let raw = &parsed.issues[0];

        assert_eq!(raw.key, "MC-1");
        assert_eq!(raw.fields.labels, vec!["crash"]);
        assert_eq!(raw.fields.resolution.name, "Fixed");
        assert_eq!(raw.fields.votes, 12);
        assert_eq!(raw.fields.issue_links[0].inward_issue.key, "MC-2");
        assert!(raw.fields.issue_links[0].outward_issue.key.is_empty());
    }

    #[test]
    fn empty_issue_list_parses() {
        let parsed = serde_json::from_str::<SearchResponse>(r#"{"issues": []}"#).unwrap();
        assert!(parsed.issues.is_empty());
    }

    #[test]
    fn explicit_nulls_parse_as_absent() {
        let body = r#"{
            "issues": [{
                "key": "MC-1",
                "fields": {
                    "labels": null,
                    "updated": null,
                    "resolutiondate": null,
                    "resolution": null,
                    "customfield_10054": null,
                    "customfield_10050": null,
                    "customfield_10070": null,
                    "fixVersions": null,
                    "attachment": null,
                    "issuelinks": null
                }
            }]
        }"#;

        let parsed = serde_json::from_str::<SearchResponse>(body).unwrap();
        let fields = &parsed.issues[0].fields;

        assert!(fields.labels.is_empty());
        assert!(fields.resolution.name.is_empty());
        assert_eq!(fields.votes, 0);
        assert!(fields.issue_links.is_empty());
    }
}
