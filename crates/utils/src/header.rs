use chrono::{DateTime, FixedOffset};

/// Prefix that marks a `Subject` header line.
const SUBJECT_PREFIX: &str = "Subject:";

/// Prefix that marks a `Date` header line.
const DATE_PREFIX: &str = "Date:";

/// A header value scraped from a single raw message line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapedHeader {
    /// Value of a `Subject:` line, surrounding whitespace removed.
    Subject(String),

    /// Value of a `Date:` line, `None` when the timestamp could not be parsed.
    Date(Option<DateTime<FixedOffset>>),
}

/// Inspects a raw line (as received, possibly still carrying its CRLF)
/// and returns the header it carries, if it is one we track.
///
/// Only the literal, case-sensitive `Subject:` and `Date:` prefixes are
/// recognized. A blank subject is still a match and yields an empty value.
///
/// # Examples
///
/// ```rust
/// use pigeon_utils::{scrape_header, ScrapedHeader};
///
/// assert_eq!(
///     scrape_header("Subject: Disk full\r\n"),
///     Some(ScrapedHeader::Subject("Disk full".to_string()))
/// );
/// assert_eq!(scrape_header("subject: lowercase is ignored\r\n"), None);
/// assert_eq!(scrape_header("check it\r\n"), None);
/// ```
///
/// An unparsable date is still a `Date` line, it just carries no value:
///
/// ```rust
/// use pigeon_utils::{scrape_header, ScrapedHeader};
///
/// assert_eq!(
///     scrape_header("Date: yesterday-ish\r\n"),
///     Some(ScrapedHeader::Date(None))
/// );
/// ```
pub fn scrape_header(line: &str) -> Option<ScrapedHeader> {
    if let Some(value) = line.strip_prefix(SUBJECT_PREFIX) {
        return Some(ScrapedHeader::Subject(value.trim().to_string()));
    }
    if let Some(value) = line.strip_prefix(DATE_PREFIX) {
        return Some(ScrapedHeader::Date(parse_rfc1123_date(value)));
    }
    None
}

/// Parses an RFC 1123 style timestamp such as `Mon, 02 Jan 2006 15:04:05 MST`.
///
/// Surrounding whitespace and line terminators are ignored. The obsolete
/// North American zone names (`EST`, `MST`, `PDT`, ...) and `GMT`/`UT` are
/// understood, as are numeric offsets.
pub fn parse_rfc1123_date(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value.trim_matches(|c: char| c == ' ' || c == '\r' || c == '\n'))
        .ok()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_scrape_subject() {
        assert_eq!(
            scrape_header("Subject: Disk full\r\n"),
            Some(ScrapedHeader::Subject("Disk full".to_string()))
        );
        assert_eq!(
            scrape_header("Subject:no-space\r\n"),
            Some(ScrapedHeader::Subject("no-space".to_string()))
        );
        assert_eq!(
            scrape_header("Subject:   \r\n"),
            Some(ScrapedHeader::Subject(String::new()))
        );
        assert_eq!(scrape_header(" Subject: indented\r\n"), None);
    }

    #[test]
    fn test_scrape_date() {
        let header = scrape_header("Date: Mon, 02 Jan 2006 15:04:05 MST\r\n");
        let date = match header {
            Some(ScrapedHeader::Date(Some(date))) => date,
            other => panic!("Expected parsed date, got {other:?}"),
        };
        assert_eq!(date.year(), 2006);
        assert_eq!(date.day(), 2);
        assert_eq!(date.hour(), 15);
        assert_eq!(date.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn test_scrape_numeric_offset() {
        let date = parse_rfc1123_date("Tue, 15 Nov 1994 08:12:31 +0200").unwrap();
        assert_eq!(date.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(date.minute(), 12);
    }

    #[test]
    fn test_scrape_bad_date() {
        assert_eq!(
            scrape_header("Date: not a date\r\n"),
            Some(ScrapedHeader::Date(None))
        );
        assert_eq!(parse_rfc1123_date(""), None);
    }

    #[test]
    fn test_scrape_other_lines() {
        assert_eq!(scrape_header("From: someone@example.com\r\n"), None);
        assert_eq!(scrape_header("\r\n"), None);
        assert_eq!(scrape_header("The Subject: is here\r\n"), None);
    }
}
