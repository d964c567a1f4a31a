use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

/// Parses the timestamp formats the upstreams emit, in order of
/// likelihood: RFC3339, then the two legacy offset spellings with and
/// without fractional seconds. The empty string parses to absent.
pub(crate) fn parse_timestamp(input: &str) -> Result<Option<DateTime<Utc>>> {
    if input.is_empty() {
        return Ok(None);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.3f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(parsed) = DateTime::parse_from_str(input, format) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
    }

    Err(anyhow!("Unparseable upstream timestamp: {}", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_string_is_absent() {
        assert_eq!(parse_timestamp("").unwrap(), None);
    }

    #[test]
    fn rfc3339_is_accepted() {
        let parsed = parse_timestamp("2023-11-14T22:13:20Z").unwrap().unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap());
    }

    #[test]
    fn offset_with_millis_is_accepted() {
        let parsed = parse_timestamp("2023-11-14T22:13:20.123+0000").unwrap().unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap() + chrono::Duration::milliseconds(123));
    }

    #[test]
    fn offset_without_millis_is_accepted() {
        let parsed = parse_timestamp("2023-11-14T23:13:20+0100").unwrap().unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_timestamp("last tuesday").is_err());
    }
}
