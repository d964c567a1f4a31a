use crate::metrics;
use crate::model::issue::{portal_id, project_of, Comment};
use crate::upstream::time::parse_timestamp;
use crate::upstream::{null_default, sanitize_display_name, UpstreamError};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures_locks::RwLock;
use log::{debug, warn};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

const BASE_URL: &str = "https://report.bugs.mojang.com";

/// The primary, always-available view of an issue.
#[derive(Debug, Default)]
pub(crate) struct ServiceDeskIssue {
    pub(crate) key: String,
    pub(crate) summary: String,
    pub(crate) reporter_name: String,
    pub(crate) reporter_avatar: String,
    pub(crate) assignee_name: String,
    pub(crate) assignee_avatar: String,
    pub(crate) description: String,
    pub(crate) environment: String,
    pub(crate) created_date: Option<DateTime<Utc>>,
    pub(crate) status: String,
    pub(crate) affected_versions: Vec<String>,
    pub(crate) components: Vec<String>,
    pub(crate) realms_platform: String,
    pub(crate) comments: Vec<Comment>
}

/// Client for the customer service desk API.
///
/// Holds the session cookie obtained by [authenticate](Self::authenticate);
/// the cookie is read-shared across concurrent requests and replaced
/// whenever the upstream reports the session as expired.
pub(crate) struct ServiceDeskClient {
    client: Client,
    session: RwLock<Option<String>>,
    email: String,
    password: String
}

impl ServiceDeskClient {
    pub(crate) fn new(email: String, password: String) -> Self {
        ServiceDeskClient {
            client: Client::new(),
            session: RwLock::new(None),
            email,
            password
        }
    }

    /// Posts the credentials and stores the returned session cookie.
    pub(crate) async fn authenticate(&self) -> Result<(), UpstreamError> {
        let response = self.client.post(format!("{}/jsd-login/v1/authentication/authenticate", BASE_URL))
            .json(&json!({
                "email": self.email,
                "password": self.password
            }))
            .send()
            .await?;

        let cookie = response.headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_owned)
            .ok_or(UpstreamError::Auth)?;

        *self.session.write().await = Some(cookie);

        debug!("Authenticated against the service desk");
        Ok(())
    }

    /// Fetches the service desk view of one issue.
    ///
    /// An expired session is re-authenticated and the request retried once
    /// before the failure is reported to the caller.
    pub(crate) async fn get_issue(&self, key: &str) -> Result<ServiceDeskIssue, UpstreamError> {
        metrics::UPSTREAM_REQUESTS.with_label_values(&["service_desk"]).inc();

        let result = match self.request_issue(key).await {
            Err(UpstreamError::Auth) => {
                warn!("Service desk session expired, re-authenticating");

                match self.authenticate().await {
                    Ok(()) => self.request_issue(key).await,
                    Err(error) => Err(error)
                }
            }
            result => result
        };

        if result.is_err() {
            metrics::UPSTREAM_ERRORS.with_label_values(&["service_desk"]).inc();
        }

        result
    }

    async fn request_issue(&self, key: &str) -> Result<ServiceDeskIssue, UpstreamError> {
        let portal = portal_id(project_of(key))
            .ok_or_else(|| anyhow!("No portal id known for key {}", key))?;

        let body = self.post_models(&json!({
            "models": ["reqDetails"],
            "options": {
                "reqDetails": {
                    "key": key,
                    "portalId": portal
                },
                "portalId": portal
            }
        })).await?;

        let response = serde_json::from_str::<IssueResponse>(body.as_str())
            .map_err(|err| anyhow::Error::new(err).context("Failed to parse service desk issue response"))?;

        let raw = response.req_details.issue;

        if raw.key.is_empty() {
            return Err(UpstreamError::NotFound);
        }

        let mut comments = Vec::with_capacity(raw.activity_stream.len());

        for activity in &raw.activity_stream {
            if activity.kind != "worker-comment" && activity.kind != "requester-comment" {
                continue;
            }

            comments.push(Comment {
                comment_id: activity.comment_id,
                legacy_id: None,
                date: parse_timestamp(activity.date.as_str()).context("Invalid comment date")?,
                author_name: sanitize_display_name(activity.author.as_str()),
                author_avatar: activity.avatar_url.clone(),
                adf_comment: activity.adf_comment.clone()
            });
        }

        let mut issue = ServiceDeskIssue {
            key: raw.key,
            summary: raw.summary,
            reporter_name: sanitize_display_name(raw.reporter.display_name.as_str()),
            reporter_avatar: raw.reporter.avatar_url,
            assignee_name: sanitize_display_name(raw.assignee.display_name.as_str()),
            assignee_avatar: raw.assignee.avatar_url,
            created_date: parse_timestamp(raw.date.as_str()).context("Invalid issue date")?,
            status: raw.status,
            comments,
            ..Default::default()
        };

        for field in &raw.fields {
            match field.id.as_str() {
                "description" => issue.description = document_value(&field.value),
                "environment" => issue.environment = document_value(&field.value),
                "versions" => issue.affected_versions = split_text_value(&field.value),
                "components" => issue.components = split_text_value(&field.value),
                "customfield_10056" => issue.realms_platform = text_value(&field.value),
                _ => {}
            }
        }

        Ok(issue)
    }

    /// Returns the keys of up to ~50 recently updated issues from the
    /// request feed, newest first, unfiltered by project.
    pub(crate) async fn get_updated_issues(&self) -> Result<Vec<String>, UpstreamError> {
        metrics::UPSTREAM_REQUESTS.with_label_values(&["service_desk"]).inc();

        let result = self.request_feed().await;

        if result.is_err() {
            metrics::UPSTREAM_ERRORS.with_label_values(&["service_desk"]).inc();
        }

        result
    }

    async fn request_feed(&self) -> Result<Vec<String>, UpstreamError> {
        let body = self.post_models(&json!({
            "models": ["allReqFilter"],
            "options": {
                "allReqFilter": {
                    "selectedPage": 1,
                    "reporter": "all"
                }
            }
        })).await?;

        let response = serde_json::from_str::<FeedResponse>(body.as_str())
            .map_err(|err| anyhow::Error::new(err).context("Failed to parse service desk feed response"))?;

        Ok(response.all_req_filter.request_list.into_iter().map(|entry| entry.key).collect())
    }

    async fn post_models(&self, body: &Value) -> Result<String, UpstreamError> {
        let cookie = self.session.read().await.clone().ok_or(UpstreamError::Auth)?;

        let response = self.client.post(format!("{}/rest/servicedesk/1/customer/models", BASE_URL))
            .header(COOKIE, cookie)
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpstreamError::Auth);
        }

        let text = response.text().await?;

        // The service desk answers rate limited requests with its login page
        if text.starts_with("<!DOCTYPE html>") {
            return Err(UpstreamError::RateLimited);
        }

        Ok(text)
    }
}

fn document_value(value: &Value) -> String {
    value.get("adf").and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn text_value(value: &Value) -> String {
    value.get("text").and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn split_text_value(value: &Value) -> Vec<String> {
    text_value(value)
        .split(", ")
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct IssueResponse {
    #[serde(deserialize_with = "null_default")]
    req_details: ReqDetails
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ReqDetails {
    #[serde(deserialize_with = "null_default")]
    issue: RawIssue
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawIssue {
    #[serde(deserialize_with = "null_default")]
    key: String,
    #[serde(deserialize_with = "null_default")]
    summary: String,
    #[serde(deserialize_with = "null_default")]
    status: String,
    #[serde(deserialize_with = "null_default")]
    date: String,
    #[serde(deserialize_with = "null_default")]
    reporter: RawUser,
    #[serde(deserialize_with = "null_default")]
    assignee: RawUser,
    #[serde(deserialize_with = "null_default")]
    fields: Vec<RawField>,
    #[serde(deserialize_with = "null_default")]
    activity_stream: Vec<RawActivity>
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawUser {
    #[serde(deserialize_with = "null_default")]
    display_name: String,
    #[serde(deserialize_with = "null_default")]
    avatar_url: String
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawField {
    #[serde(deserialize_with = "null_default")]
    id: String,
    value: Value
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawActivity {
    #[serde(rename = "type", deserialize_with = "null_default")]
    kind: String,
    #[serde(deserialize_with = "null_default")]
    comment_id: i64,
    #[serde(deserialize_with = "null_default")]
    date: String,
    #[serde(deserialize_with = "null_default")]
    author: String,
    #[serde(deserialize_with = "null_default")]
    avatar_url: String,
    #[serde(deserialize_with = "null_default")]
    adf_comment: String
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct FeedResponse {
    #[serde(deserialize_with = "null_default")]
    all_req_filter: AllReqFilter
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct AllReqFilter {
    #[serde(deserialize_with = "null_default")]
    request_list: Vec<FeedEntry>
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FeedEntry {
    #[serde(deserialize_with = "null_default")]
    key: String
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_response_fields_are_extracted() {
        let body = r#"{
            "reqDetails": {
                "issue": {
                    "key": "MC-1",
                    "summary": "Crash",
                    "status": "Open",
                    "date": "2023-11-14T22:13:20Z",
                    "reporter": {"displayName": "Alex", "avatarUrl": "https://example.invalid/a.png"},
                    "assignee": {"displayName": "", "avatarUrl": ""},
                    "fields": [
                        {"id": "description", "value": {"adf": "{\"type\":\"doc\"}"}},
                        {"id": "versions", "value": {"text": "1.20, 1.21"}},
                        {"id": "customfield_10056", "value": {"text": "Java"}}
                    ],
                    "activityStream": [
                        {"type": "worker-comment", "commentId": 7, "date": "2023-11-15T00:00:00Z", "author": "Mod", "avatarUrl": "", "adfComment": "{}"},
                        {"type": "status-change", "commentId": 8, "date": "", "author": "", "avatarUrl": "", "adfComment": ""}
                    ]
                }
            }
        }"#;

        let response = serde_json::from_str::<IssueResponse>(body).unwrap();
        let raw = response.req_details.issue;

        assert_eq!(raw.key, "MC-1");
        assert_eq!(raw.fields.len(), 3);
        assert_eq!(raw.activity_stream.len(), 2);
        assert_eq!(split_text_value(&raw.fields[1].value), vec!["1.20", "1.21"]);
        assert_eq!(document_value(&raw.fields[0].value), "{\"type\":\"doc\"}");
    }

    #[test]
    fn feed_response_lists_keys() {
        let body = r#"{"allReqFilter": {"requestList": [{"key": "MC-5"}, {"key": "WEB-2"}]}}"#;

        let response = serde_json::from_str::<FeedResponse>(body).unwrap();
        let keys = response.all_req_filter.request_list.into_iter().map(|e| e.key).collect::<Vec<_>>();

        assert_eq!(keys, vec!["MC-5", "WEB-2"]);
    }

    #[test]
    fn empty_text_splits_to_no_versions() {
        assert!(split_text_value(&json!({"text": ""})).is_empty());
        assert!(split_text_value(&json!({})).is_empty());
    }
}
