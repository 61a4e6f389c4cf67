use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use serde_json::{Map, Value};

use super::{format_bytes, ValidationError};

/// Persisted representation of a [`UsageRecord`], one JSON object per hour.
pub type Item = Map<String, Value>;

pub const DATE_HOUR: &str = "DateHour";
pub const UPLOADED_BYTES: &str = "UploadedBytes";
pub const DOWNLOADED_BYTES: &str = "DownloadedBytes";

const DATE_HOUR_FORMAT: &str = "%Y-%m-%dT%HZ";

/// ISO 8601 shapes RFC 3339 leaves out: basic (`+0000`) and hour-only
/// (`+00`) offsets, and omitted seconds.
const ISO_8601_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M%#z",
];

/// Usage on a line during a one-hour period.
///
/// `hour` is always UTC and aligned to the start of the hour; every
/// constructor truncates finer-grained components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageRecord {
    hour: DateTime<Utc>,
    uploaded: u64,
    downloaded: u64,
}

impl UsageRecord {
    /// Any units smaller than an hour are discarded from `timestamp`.
    pub fn new<Tz: TimeZone>(timestamp: DateTime<Tz>, uploaded: u64, downloaded: u64) -> Self {
        Self {
            hour: truncate_to_hour(timestamp.with_timezone(&Utc)),
            uploaded,
            downloaded,
        }
    }

    pub fn hour(&self) -> DateTime<Utc> {
        self.hour
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn total(&self) -> u64 {
        self.uploaded.saturating_add(self.downloaded)
    }

    /// Hour-bucket key, e.g. `2018-10-27T22Z`.
    pub fn date_hour_key(&self) -> String {
        self.hour.format(DATE_HOUR_FORMAT).to_string()
    }

    /// Parse a line written by the legacy collection script, of the form
    /// `<ISO 8601 datetime>,<uploaded bytes>,<downloaded bytes>`, e.g.
    /// `2017-08-30T08:00:00+00:00,17620000,14650000`.
    pub fn parse_line(line: &str) -> Result<Self, ValidationError> {
        let mut fields = line.trim().splitn(3, ',');
        let (Some(ts), Some(up), Some(down)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(ValidationError::MalformedLine {
                line: line.to_string(),
            });
        };

        let timestamp = parse_iso8601(ts.trim()).ok_or_else(|| ValidationError::InvalidTimestamp {
            value: ts.to_string(),
        })?;
        let uploaded = parse_byte_text("uploaded", up)?;
        let downloaded = parse_byte_text("downloaded", down)?;

        Ok(Self::new(timestamp, uploaded, downloaded))
    }

    /// Parse the stored representation produced by [`UsageRecord::to_item`].
    pub fn parse_item(item: &Item) -> Result<Self, ValidationError> {
        let date_hour = item
            .get(DATE_HOUR)
            .ok_or(ValidationError::MissingKey { key: DATE_HOUR })?;
        let date_hour = date_hour
            .as_str()
            .ok_or(ValidationError::DateHourNotString)?;
        let hour = parse_date_hour(date_hour)?;

        let uploaded = item_bytes(item, UPLOADED_BYTES)?;
        let downloaded = item_bytes(item, DOWNLOADED_BYTES)?;

        Ok(Self::new(hour, uploaded, downloaded))
    }

    /// The inverse of [`UsageRecord::parse_item`].
    pub fn to_item(&self) -> Item {
        let mut item = Map::new();
        item.insert(DATE_HOUR.to_string(), Value::String(self.date_hour_key()));
        item.insert(UPLOADED_BYTES.to_string(), Value::from(self.uploaded));
        item.insert(DOWNLOADED_BYTES.to_string(), Value::from(self.downloaded));
        item
    }
}

impl FromStr for UsageRecord {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

impl fmt::Display for UsageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UsageRecord({}, Uploaded: {}, Downloaded: {})",
            self.hour.to_rfc3339(),
            format_bytes(self.uploaded),
            format_bytes(self.downloaded)
        )
    }
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = TimeDelta::minutes(i64::from(ts.minute()))
        + TimeDelta::seconds(i64::from(ts.second()))
        + TimeDelta::nanoseconds(i64::from(ts.nanosecond()));
    ts - into_hour
}

/// Accepts the hour-bucket form as well as any RFC 3339 timestamp.
pub fn parse_date_hour(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::InvalidTimestamp {
        value: value.to_string(),
    };

    if let Some(prefix) = value.strip_suffix('Z') {
        // chrono needs a minute component to build a time of day.
        if let Ok(naive) = NaiveDateTime::parse_from_str(&format!("{prefix}:00"), "%Y-%m-%dT%H:%M") {
            return Ok(naive.and_utc());
        }
    }

    parse_iso8601(value)
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(invalid)
}

/// A datetime with an explicit offset, RFC 3339 first.
fn parse_iso8601(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok().or_else(|| {
        ISO_8601_FORMATS
            .iter()
            .find_map(|format| DateTime::parse_from_str(value, format).ok())
    })
}

fn parse_byte_text(field: &'static str, text: &str) -> Result<u64, ValidationError> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::InvalidBytes {
            field,
            value: text.to_string(),
        })
}

fn item_bytes(item: &Item, key: &'static str) -> Result<u64, ValidationError> {
    let value = item.get(key).ok_or(ValidationError::MissingKey { key })?;
    let invalid = || ValidationError::InvalidBytes {
        field: key,
        value: value.to_string(),
    };

    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else {
                // Some stores hand back integral values as floats.
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
                    _ => Err(invalid()),
                }
            }
        }
        Value::String(s) => parse_byte_text(key, s),
        _ => Err(invalid()),
    }
}
