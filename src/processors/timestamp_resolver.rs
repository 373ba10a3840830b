use crate::error::{ProcessingError, Result};
use crate::utils::constants::{DEFAULT_TIMESTAMP_FORMATS, FORMAT_FREEFORM, FORMAT_RFC3339};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::str::FromStr;

/// Lenient layouts tried, in order, by [`TimestampPattern::FreeForm`].
const FREEFORM_NAIVE: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    // trailing `Z`: naive values are already UTC
    "%Y-%m-%dT%H:%MZ",
    "%Y-%m-%d %H:%MZ",
];
const FREEFORM_ZONED: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M%z",
];
const FREEFORM_DATE: &str = "%Y-%m-%d";

/// One candidate layout for a datetime cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampPattern {
    /// ISO-8601 / RFC 3339 with a `Z` or numeric offset.
    Rfc3339,
    /// A chrono strftime layout. Layouts without an offset field are read as UTC.
    Strftime { format: String, zoned: bool },
    /// A fixed list of lenient ISO-like layouts, the last resort.
    FreeForm,
}

impl TimestampPattern {
    fn parse(&self, raw: &str) -> Option<DateTime<Utc>> {
        match self {
            TimestampPattern::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimestampPattern::Strftime { format, zoned } => {
                if *zoned {
                    parse_zoned(raw, format)
                } else {
                    parse_naive(raw, format)
                        .or_else(|| parse_date(raw, format))
                }
            }
            TimestampPattern::FreeForm => FREEFORM_NAIVE
                .iter()
                .find_map(|format| parse_naive(raw, format))
                .or_else(|| {
                    FREEFORM_ZONED
                        .iter()
                        .find_map(|format| parse_zoned(raw, format))
                })
                .or_else(|| parse_date(raw, FREEFORM_DATE)),
        }
    }
}

impl FromStr for TimestampPattern {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            FORMAT_RFC3339 | "iso8601" => return Ok(TimestampPattern::Rfc3339),
            FORMAT_FREEFORM => return Ok(TimestampPattern::FreeForm),
            _ => {}
        }

        if trimmed.is_empty() || !trimmed.contains('%') {
            return Err(ProcessingError::Config(format!(
                "Unsupported timestamp format: '{}'",
                s
            )));
        }

        let mut zoned = false;
        for item in StrftimeItems::new(trimmed) {
            match item {
                Item::Error => {
                    return Err(ProcessingError::Config(format!(
                        "Invalid strftime pattern: '{}'",
                        s
                    )))
                }
                Item::Fixed(fixed) => {
                    zoned |= matches!(
                        fixed,
                        chrono::format::Fixed::TimezoneOffset
                            | chrono::format::Fixed::TimezoneOffsetColon
                            | chrono::format::Fixed::TimezoneOffsetDoubleColon
                            | chrono::format::Fixed::TimezoneOffsetTripleColon
                            | chrono::format::Fixed::TimezoneOffsetColonZ
                            | chrono::format::Fixed::TimezoneOffsetZ
                            | chrono::format::Fixed::RFC3339
                    );
                }
                _ => {}
            }
        }

        Ok(TimestampPattern::Strftime {
            format: trimmed.to_string(),
            zoned,
        })
    }
}

fn parse_naive(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_zoned(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, format)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_date(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Resolves datetime cells against an ordered list of layouts.
///
/// The first layout that parses wins, so the order of the list decides how an
/// ambiguous cell is read. Failed attempts are never reported individually.
#[derive(Debug, Clone)]
pub struct TimestampResolver {
    patterns: Vec<TimestampPattern>,
}

impl TimestampResolver {
    pub fn new(patterns: Vec<TimestampPattern>) -> Result<Self> {
        if patterns.is_empty() {
            return Err(ProcessingError::Config(
                "At least one timestamp format is required".to_string(),
            ));
        }
        Ok(Self { patterns })
    }

    pub fn from_formats<S: AsRef<str>>(formats: &[S]) -> Result<Self> {
        let patterns = formats
            .iter()
            .map(|format| format.as_ref().parse::<TimestampPattern>())
            .collect::<Result<Vec<_>>>()?;
        Self::new(patterns)
    }

    pub fn patterns(&self) -> &[TimestampPattern] {
        &self.patterns
    }

    /// Parse `raw`, returning the instant from the first layout that accepts it.
    pub fn resolve(&self, raw: &str) -> Result<DateTime<Utc>> {
        self.resolve_with_index(raw)
            .map(|(_, instant)| instant)
            .ok_or_else(|| ProcessingError::UnparsableTimestamp(raw.to_string()))
    }

    /// Like [`resolve`](Self::resolve) but also reports which layout matched.
    pub fn resolve_with_index(&self, raw: &str) -> Option<(usize, DateTime<Utc>)> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        self.patterns
            .iter()
            .enumerate()
            .find_map(|(index, pattern)| pattern.parse(raw).map(|instant| (index, instant)))
    }
}

impl Default for TimestampResolver {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_TIMESTAMP_FORMATS
                .iter()
                .filter_map(|format| format.parse().ok())
                .collect(),
        }
    }
}
