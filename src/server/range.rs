//! Byte ranges and validators for serving cached files.

use std::time::SystemTime;

use chrono::{DateTime, SubsecRound, Utc};

/// What part of the file a request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No Range header, or one that is ignored: send everything.
    Full,
    /// Inclusive byte offsets.
    Partial { start: u64, end: u64 },
    /// The range is malformed or lies entirely outside the file.
    Unsatisfiable,
}

impl ByteRange {
    /// Interpret a `Range` header value against a file of `size` bytes.
    ///
    /// Only a single `bytes=` range is honoured. Multiple ranges and other
    /// units fall back to the full body; a malformed `bytes=` range is
    /// unsatisfiable.
    pub fn parse(header: Option<&str>, size: u64) -> Self {
        let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
            return ByteRange::Full;
        };
        if ranges.contains(',') {
            return ByteRange::Full;
        }
        let Some((first, last)) = ranges.split_once('-') else {
            return ByteRange::Unsatisfiable;
        };
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            // Suffix range: the last N bytes.
            let Ok(suffix) = last.parse::<u64>() else {
                return ByteRange::Unsatisfiable;
            };
            if suffix == 0 || size == 0 {
                return ByteRange::Unsatisfiable;
            }
            return ByteRange::Partial {
                start: size.saturating_sub(suffix),
                end: size - 1,
            };
        }

        let Ok(start) = first.parse::<u64>() else {
            return ByteRange::Unsatisfiable;
        };
        let end = if last.is_empty() {
            None
        } else {
            match last.parse::<u64>() {
                Ok(end) if end >= start => Some(end),
                _ => return ByteRange::Unsatisfiable,
            }
        };

        if start >= size {
            return ByteRange::Unsatisfiable;
        }

        ByteRange::Partial {
            start,
            end: end.map_or(size - 1, |e| e.min(size - 1)),
        }
    }
}

/// Modification time at the one-second precision HTTP dates carry.
pub fn last_modified(modified: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(modified).trunc_subsecs(0)
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_ranges() {
        assert_eq!(
            ByteRange::parse(Some("bytes=0-99"), 1000),
            ByteRange::Partial { start: 0, end: 99 }
        );
        assert_eq!(
            ByteRange::parse(Some("bytes=900-"), 1000),
            ByteRange::Partial { start: 900, end: 999 }
        );
        assert_eq!(
            ByteRange::parse(Some("bytes=-100"), 1000),
            ByteRange::Partial { start: 900, end: 999 }
        );
        assert_eq!(
            ByteRange::parse(Some("bytes=-5000"), 1000),
            ByteRange::Partial { start: 0, end: 999 }
        );
        assert_eq!(
            ByteRange::parse(Some("bytes=500-5000"), 1000),
            ByteRange::Partial { start: 500, end: 999 }
        );
    }

    #[test]
    fn unsatisfiable_and_ignored_ranges() {
        assert_eq!(
            ByteRange::parse(Some("bytes=1000-"), 1000),
            ByteRange::Unsatisfiable
        );
        assert_eq!(ByteRange::parse(Some("bytes=-0"), 1000), ByteRange::Unsatisfiable);
        assert_eq!(ByteRange::parse(Some("bytes=0-"), 0), ByteRange::Unsatisfiable);

        assert_eq!(ByteRange::parse(Some("bytes=9-3"), 1000), ByteRange::Unsatisfiable);
        assert_eq!(ByteRange::parse(Some("bytes=abc"), 1000), ByteRange::Unsatisfiable);
        assert_eq!(ByteRange::parse(Some("bytes=x-5"), 1000), ByteRange::Unsatisfiable);
        assert_eq!(ByteRange::parse(Some("bytes=-y"), 1000), ByteRange::Unsatisfiable);

        assert_eq!(ByteRange::parse(None, 1000), ByteRange::Full);
        assert_eq!(ByteRange::parse(Some("items=0-1"), 1000), ByteRange::Full);
        assert_eq!(ByteRange::parse(Some("bytes=0-1,5-6"), 1000), ByteRange::Full);
    }

    #[test]
    fn http_date_round_trip() {
        let modified = SystemTime::UNIX_EPOCH + Duration::from_millis(784_111_777_250);
        let date = last_modified(modified);
        assert_eq!(format_http_date(date), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(date));
        assert_eq!(parse_http_date("yesterday"), None);
    }
}
