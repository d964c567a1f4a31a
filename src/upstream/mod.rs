use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub(crate) mod legacy;
pub(crate) mod public_jql;
pub(crate) mod service_desk;
pub(crate) mod time;

/// Tagged failure kinds shared by the three upstream adapters.
///
/// The merger only distinguishes *not-found* from everything else; the
/// finer tags exist for logging and for the service desk re-auth path.
#[derive(Error, Debug)]
pub(crate) enum UpstreamError {
    #[error("issue does not exist upstream")]
    NotFound,

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream rate limited the request")]
    RateLimited,

    #[error("upstream session is no longer valid")]
    Auth,

    #[error("upstream transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error)
}

impl From<reqwest::Error> for UpstreamError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(error)
        }
    }
}

/// Normalizes an upstream display name: trims and collapses runs of
/// whitespace, so the same person compares equal across the three views.
pub(crate) fn sanitize_display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The upstreams emit explicit `null` for unset fields; treat it the same
/// as an absent field.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where D: Deserializer<'de>,
          T: Default + Deserialize<'de>
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_are_normalized() {
        assert_eq!(sanitize_display_name("  John   Doe "), "John Doe");
        assert_eq!(sanitize_display_name("plain"), "plain");
        assert_eq!(sanitize_display_name(""), "");
    }
}
