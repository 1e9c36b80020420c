use chrono::{DateTime, SecondsFormat, Utc};

/// ISO-8601 timestamp with trailing `Z`, second precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an ISO-8601 date, accepting both `Z` and explicit offsets.
pub fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_trailing_z() {
        assert!(iso_timestamp().ends_with('Z'));
    }

    #[test]
    fn parses_both_offset_styles() {
        assert!(parse_iso8601("2025-01-30T10:00:00Z").is_some());
        assert!(parse_iso8601("2025-01-30T10:00:00+00:00").is_some());
        assert!(parse_iso8601("not-a-date").is_none());
    }
}
