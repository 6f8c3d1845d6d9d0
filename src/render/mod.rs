//! Plain-text rendering for command output.

pub mod thread;

use std::time::{Duration, SystemTime};

/// Collapses whitespace and truncates to `max_chars`, ending with "..." when cut.
pub fn short_preview(text: &str, max_chars: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    if max_chars <= 3 {
        return normalized.chars().take(max_chars).collect();
    }

    let mut out: String = normalized.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

/// Formats a server timestamp as a compact age like "3days ago" or "2h ago".
///
/// Falls back to the raw text when the timestamp cannot be parsed.
pub fn relative_time(timestamp: &str, now: SystemTime) -> String {
    let Some(at) = parse_timestamp(timestamp) else {
        return timestamp.to_owned();
    };

    let age = now.duration_since(at).unwrap_or_default();
    if age < Duration::from_secs(60) {
        return "just now".to_owned();
    }

    let rounded = Duration::from_secs(age.as_secs());
    let formatted = humantime::format_duration(rounded).to_string();
    let unit = formatted.split_whitespace().next().unwrap_or("?");
    format!("{unit} ago")
}

/// Parses `YYYY-MM-DDTHH:MM:SS[.frac][Z|±HH:MM]`. Fractional seconds are
/// dropped.
fn parse_timestamp(timestamp: &str) -> Option<SystemTime> {
    let timestamp = timestamp.trim();
    let (seconds, rest) = (timestamp.get(..19)?, timestamp.get(19..)?);
    let local = humantime::parse_rfc3339_weak(seconds).ok()?;
    let suffix = match rest.strip_prefix('.') {
        Some(fraction) => fraction.trim_start_matches(|c: char| c.is_ascii_digit()),
        None => rest,
    };
    match utc_offset(suffix)? {
        east if east >= 0 => local.checked_sub(Duration::from_secs(east.unsigned_abs())),
        west => local.checked_add(Duration::from_secs(west.unsigned_abs())),
    }
}

/// Seconds east of UTC for `Z`, an empty suffix, or `±HH:MM`.
fn utc_offset(suffix: &str) -> Option<i64> {
    if suffix.is_empty() || suffix == "Z" {
        return Some(0);
    }

    let (sign, digits) = match suffix.split_at_checked(1)? {
        ("+", digits) => (1, digits),
        ("-", digits) => (-1, digits),
        _ => return None,
    };
    let (hours, minutes) = digits.split_once(':').unwrap_or((digits, "0"));
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(timestamp: &str) -> SystemTime {
        humantime::parse_rfc3339(timestamp).expect("valid timestamp")
    }

    #[test]
    fn preview_collapses_and_truncates() {
        assert_eq!(short_preview("a\n  b   c", 10), "a b c");
        assert_eq!(short_preview("abcdefghij", 6), "abc...");
        assert_eq!(short_preview("abcdef", 2), "ab");
    }

    #[test]
    fn relative_time_keeps_most_significant_unit() {
        let now = at("2025-03-04T10:00:00Z");

        assert_eq!(relative_time("2025-03-01T08:00:00Z", now), "3days ago");
        assert_eq!(relative_time("2025-03-04T08:30:00Z", now), "1h ago");
        assert_eq!(relative_time("2025-03-04T09:59:30Z", now), "just now");
    }

    #[test]
    fn relative_time_tolerates_offsets_and_garbage() {
        let now = at("2025-03-04T10:00:00Z");

        assert_eq!(
            relative_time("2025-03-04T15:00:00.123456+08:00", now),
            "3h ago"
        );
        assert_eq!(relative_time("2025-03-04T03:00:00-05:00", now), "2h ago");
        assert_eq!(relative_time("2025-03-04T07:00:00.5Z", now), "3h ago");
        assert_eq!(relative_time("2025-03-04T07:00:00+08:00junk", now), "2025-03-04T07:00:00+08:00junk");
        assert_eq!(relative_time("yesterday", now), "yesterday");
    }
}
