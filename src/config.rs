use std::collections::HashSet;
use std::env;
use std::env::VarError;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;

/// Issues created before this date must have an intact historical view;
/// overridable per deployment since the upstream migration rolled out in
/// waves.
const DEFAULT_LEGACY_CUTOVER: &str = "2025-02-11T00:00:00Z";

const DEFAULT_REDACTED_KEYS_FILE: &str = "redacted.txt";

/// Process configuration read once at startup.
pub(crate) struct Config {
    pub(crate) jira_email: String,
    pub(crate) jira_password: String,
    pub(crate) legacy_cutover: DateTime<Utc>,
    redacted_keys: HashSet<String>
}

impl Config {
    pub(crate) async fn from_env() -> Result<Self> {
        let jira_email = env::var("JIRA_EMAIL").context("Unable to read mandatory JIRA_EMAIL environment variable")?;
        let jira_password = env::var("JIRA_PASSWORD").context("Unable to read mandatory JIRA_PASSWORD environment variable")?;

        let legacy_cutover = match env::var("LEGACY_CUTOVER") {
            Ok(value) => DateTime::parse_from_rfc3339(value.as_str())
                .context("Unable to parse LEGACY_CUTOVER environment variable as RFC3339")?
                .with_timezone(&Utc),
            Err(VarError::NotPresent) => DateTime::parse_from_rfc3339(DEFAULT_LEGACY_CUTOVER)?.with_timezone(&Utc),
            Err(VarError::NotUnicode(_)) => bail!("LEGACY_CUTOVER environment variable is not valid unicode")
        };

        let redacted_keys = read_redacted_keys().await;

        Ok(Config {
            jira_email,
            jira_password,
            legacy_cutover,
            redacted_keys
        })
    }

    /// Keys for which legacy identity overlays are suppressed.
    pub(crate) fn is_redacted(&self, key: &str) -> bool {
        self.redacted_keys.contains(key)
    }
}

async fn read_redacted_keys() -> HashSet<String> {
    let path = env::var("REDACTED_KEYS_FILE").unwrap_or_else(|_| DEFAULT_REDACTED_KEYS_FILE.to_owned());

    let keys: HashSet<String> = match tokio::fs::read_to_string(path.as_str()).await {
        Ok(content) => content.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect(),
        Err(_) => HashSet::new()
    };

    info!("Using {} redacted keys", keys.len());

    keys
}
