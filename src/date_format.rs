//! Shared date-format convention used when string values are coerced into
//! date attributes (record import, predicate literals) and when dates are
//! rendered back to text.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub const DEFAULT_DATE_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// Formats tried after the configured pattern, in order.
const FALLBACK_DATETIME_PATTERNS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const FALLBACK_DATE_PATTERNS: &[&str] = &["%Y-%m-%d"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
}

impl DateFormat {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check that the pattern is a valid strftime pattern.
    pub fn validate(&self) -> Result<(), String> {
        if self.pattern.trim().is_empty() {
            return Err("date format pattern cannot be empty".to_string());
        }
        if StrftimeItems::new(&self.pattern).any(|item| matches!(item, Item::Error)) {
            return Err(format!("invalid date format pattern: {}", self.pattern));
        }
        Ok(())
    }

    /// Parse a string into a UTC timestamp.
    ///
    /// The configured pattern is tried first (with offset, without offset,
    /// then as a date-only pattern), then RFC 3339, then ISO date-time and
    /// date-only forms. Date-only values resolve to midnight UTC.
    pub fn parse(&self, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(parsed) = DateTime::parse_from_str(raw, &self.pattern) {
            return Some(parsed.with_timezone(&Utc));
        }
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, &self.pattern) {
            return Some(parsed.and_utc());
        }
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, &self.pattern) {
            return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        for pattern in FALLBACK_DATETIME_PATTERNS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, pattern) {
                return Some(parsed.and_utc());
            }
        }
        for pattern in FALLBACK_DATE_PATTERNS {
            if let Ok(parsed) = NaiveDate::parse_from_str(raw, pattern) {
                return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
        }
        None
    }

    pub fn format(&self, date: &DateTime<Utc>) -> String {
        date.format(&self.pattern).to_string()
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_PATTERN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_configured_pattern() {
        let format = DateFormat::default();
        let date = format.parse("2020-01-01 10:30:00").unwrap();
        assert_eq!(date.year(), 2020);
        assert_eq!(date.hour(), 10);
        assert_eq!(date.minute(), 30);
    }

    #[test]
    fn test_date_only_resolves_to_midnight() {
        let format = DateFormat::default();
        let date = format.parse("2020-01-01").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2020, 1, 1));
        assert_eq!(date.hour(), 0);
    }

    #[test]
    fn test_rfc3339_is_accepted() {
        let format = DateFormat::new("%d/%m/%Y");
        let date = format.parse("2020-06-01T12:00:00+02:00").unwrap();
        assert_eq!(date.hour(), 10);
    }

    #[test]
    fn test_custom_date_only_pattern() {
        let format = DateFormat::new("%d/%m/%Y");
        let date = format.parse("24/12/2019").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2019, 12, 24));
        assert_eq!(format.format(&date), "24/12/2019");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(DateFormat::default().parse("not a date").is_none());
        assert!(DateFormat::default().parse("   ").is_none());
    }

    #[test]
    fn test_validate_pattern() {
        assert!(DateFormat::default().validate().is_ok());
        assert!(DateFormat::new("%Y-%Q").validate().is_err());
        assert!(DateFormat::new("").validate().is_err());
    }
}
