//! Parsing of the portal's daily usage page.
//!
//! The page embeds two array literals, `data` (download) and `data2`
//! (upload), each holding entries such as `["5\npm", 2779.14]`: an hour of
//! day on a 12-hour clock, then usage during that hour in megabytes. The
//! entries carry no date; together they cover the 24 hours leading up to the
//! request, in chronological order.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use usage_client::domain::UsageRecord;

static ENTRY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(\d+)\\n((?:a|p)m)",\W*(\d+(?:\.\d+)?)"#).expect("Invalid ENTRY_PATTERN regex")
});
static DOWNLOAD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"var data = (.+?);").expect("Invalid DOWNLOAD_PATTERN regex"));
static UPLOAD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"var data2 = (.+?);").expect("Invalid UPLOAD_PATTERN regex"));

/// The page markup did not match the expected grammar. This is effectively
/// only possible when the portal's markup has changed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    message: String,
    html: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, html: &str) -> Self {
        Self {
            message: message.into(),
            html: html.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The complete page the error was raised against.
    pub fn html(&self) -> &str {
        &self.html
    }
}

/// The two usage arrays embedded in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageArray {
    Download,
    Upload,
}

impl UsageArray {
    pub fn variable(self) -> &'static str {
        match self {
            Self::Download => "data",
            Self::Upload => "data2",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Self::Download => &DOWNLOAD_PATTERN,
            Self::Upload => &UPLOAD_PATTERN,
        }
    }
}

/// One array element as scraped, e.g. `("5", "pm", "2779.14")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawEntry<'a> {
    hour: &'a str,
    meridiem: &'a str,
    megabytes: &'a str,
}

/// Finds a usage array and pattern-matches its elements. Never returns an
/// empty list.
fn array_entries<'a>(html: &'a str, array: UsageArray) -> Result<Vec<RawEntry<'a>>, ParseError> {
    let body = array
        .pattern()
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ParseError::new(format!("Could not find variable {}", array.variable()), html))?
        .as_str();

    let entries: Vec<RawEntry<'a>> = ENTRY_PATTERN
        .captures_iter(body)
        .filter_map(|c| {
            Some(RawEntry {
                hour: c.get(1)?.as_str(),
                meridiem: c.get(2)?.as_str(),
                megabytes: c.get(3)?.as_str(),
            })
        })
        .collect();

    if entries.is_empty() {
        return Err(ParseError::new(
            format!(
                "Could not extract any usage samples from variable {}",
                array.variable()
            ),
            html,
        ));
    }
    Ok(entries)
}

/// Resolve a 12-hour clock hour to a local date and hour, relative to `now`
/// (local wall-clock time in the portal's time zone).
///
/// Hours at or after the current hour belong to the previous day, since the
/// page only covers the 24 hours up to `now`. Returns `None` for an hour
/// outside 1-12 or a marker other than `am`/`pm`.
pub fn decode_hour(hour: &str, meridiem: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let is_afternoon = match meridiem {
        "am" => false,
        "pm" => true,
        _ => return None,
    };
    let mut hour: u32 = hour.parse().ok().filter(|h| (1..=12).contains(h))?;

    if hour == 12 || is_afternoon {
        hour = (hour + 12) % 24;
    }
    if hour == 0 && is_afternoon {
        hour = 12;
    }

    let mut time = now.date().and_hms_opt(hour, 0, 0)?;
    if hour >= now.hour() {
        time -= TimeDelta::days(1);
    }
    Some(time)
}

/// Megabytes as printed on the page to whole bytes, truncating.
pub fn megabytes_to_bytes(megabytes: &str) -> Option<u64> {
    let mb: f64 = megabytes.parse().ok()?;
    (mb.is_finite() && mb >= 0.0).then(|| (mb * 1e6) as u64)
}

fn decode_entry(
    entry: &RawEntry<'_>,
    array: UsageArray,
    now: NaiveDateTime,
    html: &str,
) -> Result<(NaiveDateTime, u64), ParseError> {
    let time = decode_hour(entry.hour, entry.meridiem, now).ok_or_else(|| {
        ParseError::new(
            format!(
                "Invalid hour '{}{}' in variable {}",
                entry.hour,
                entry.meridiem,
                array.variable()
            ),
            html,
        )
    })?;
    let bytes = megabytes_to_bytes(entry.megabytes).ok_or_else(|| {
        ParseError::new(
            format!(
                "Invalid usage '{}' in variable {}",
                entry.megabytes,
                array.variable()
            ),
            html,
        )
    })?;
    Ok((time, bytes))
}

/// Map a local wall-clock hour to UTC, choosing the first instant after
/// `previous` when the hour occurs twice (end of daylight saving time).
fn resolve_local(
    local: NaiveDateTime,
    tz: Tz,
    previous: Option<DateTime<Utc>>,
    html: &str,
) -> Result<DateTime<Utc>, ParseError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => Ok(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(a, b) => {
            let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
            let (earliest, latest) = if a <= b { (a, b) } else { (b, a) };
            match previous {
                Some(p) if earliest <= p => Ok(latest),
                _ => Ok(earliest),
            }
        }
        LocalResult::None => Err(ParseError::new(
            format!("Local time {local} does not exist in {tz}"),
            html,
        )),
    }
}

/// Parse the daily usage page into one record per hour, oldest first.
///
/// `now` is the reference instant of the run; `tz` is the portal's home time
/// zone. Either every entry parses and reconciles or an error is returned;
/// no partial result is produced.
pub fn parse_daily_usage(html: &str, now: DateTime<Utc>, tz: Tz) -> Result<Vec<UsageRecord>, ParseError> {
    let now_local = now.with_timezone(&tz).naive_local();
    let download = array_entries(html, UsageArray::Download)?;
    let upload = array_entries(html, UsageArray::Upload)?;

    if download.len() != upload.len() {
        return Err(ParseError::new(
            format!(
                "Download/upload arrays differ in length ({} vs {})",
                download.len(),
                upload.len()
            ),
            html,
        ));
    }

    let mut records: Vec<UsageRecord> = Vec::with_capacity(download.len());
    for (down, up) in download.iter().zip(&upload) {
        let (d_time, d_bytes) = decode_entry(down, UsageArray::Download, now_local, html)?;
        let (u_time, u_bytes) = decode_entry(up, UsageArray::Upload, now_local, html)?;
        if d_time != u_time {
            return Err(ParseError::new(
                format!("Download/upload array data points do not match up ({d_time} vs {u_time})"),
                html,
            ));
        }

        let previous = records.last().map(UsageRecord::hour);
        let hour = resolve_local(d_time, tz, previous, html)?;
        if previous.is_some_and(|p| hour <= p) {
            return Err(ParseError::new(
                format!("Data points are not in ascending order at {d_time}"),
                html,
            ));
        }
        records.push(UsageRecord::new(hour, u_bytes, d_bytes));
    }

    Ok(records)
}
