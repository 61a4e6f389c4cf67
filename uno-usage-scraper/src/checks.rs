//! Operational checks around a scrape run. Each returns the alert text to
//! publish, or `None` when all is well.

use chrono::{DateTime, TimeDelta, Utc};
use usage_client::domain::UsageRecord;

use crate::sources::ExtractError;

/// Flags a run that started outside `expected ± tolerance`.
pub fn timely_execution_check(
    expected: DateTime<Utc>,
    actual: DateTime<Utc>,
    tolerance: TimeDelta,
) -> Option<String> {
    let early = actual < expected - tolerance;
    let late = actual > expected + tolerance;
    (early || late).then(|| {
        format!(
            "Scraper executed too {}:\nExpected: {}\nActual: {}",
            if early { "early" } else { "late" },
            expected.to_rfc3339(),
            actual.to_rfc3339()
        )
    })
}

/// Warns while the session cookie has less than `threshold` left.
pub fn cookie_expiry_check(
    expires: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: TimeDelta,
) -> Option<String> {
    let remaining = expires - now;
    if remaining >= threshold {
        return None;
    }
    if remaining <= TimeDelta::zero() {
        Some(format!("Uno cookie expired {} ago", format_duration(-remaining)))
    } else {
        Some(format!("Uno cookie will expire in {}", format_duration(remaining)))
    }
}

/// Alert text for a failed extraction. Transport failures may clear up on
/// their own; parse failures need the scraper updating.
pub fn extraction_alert(err: &ExtractError) -> String {
    match err {
        ExtractError::Transport { .. } => format!("Usage scrape failed to reach the portal: {err}"),
        ExtractError::Parse(e) => format!(
            "Usage scrape could not read the portal page, its format may have changed: {}",
            e.message()
        ),
    }
}

/// Next wall-clock instant `minute` minutes past an hour, strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
    let candidate = UsageRecord::new(now, 0, 0).hour() + TimeDelta::minutes(i64::from(minute));
    if candidate > now {
        candidate
    } else {
        candidate + TimeDelta::hours(1)
    }
}

fn format_duration(d: TimeDelta) -> String {
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;
    format!("{days}d {hours}h {minutes}m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::daily_usage_html::ParseError;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 10, 27, h, m, s).unwrap()
    }

    #[test]
    fn on_time_runs_pass() {
        let tolerance = TimeDelta::minutes(5);
        assert_eq!(timely_execution_check(at(10, 5, 0), at(10, 5, 0), tolerance), None);
        assert_eq!(timely_execution_check(at(10, 5, 0), at(10, 10, 0), tolerance), None);
        assert_eq!(timely_execution_check(at(10, 5, 0), at(10, 0, 0), tolerance), None);
    }

    #[test]
    fn early_and_late_runs_are_flagged() {
        let tolerance = TimeDelta::minutes(5);
        let late = timely_execution_check(at(10, 5, 0), at(10, 10, 1), tolerance).unwrap();
        assert!(late.starts_with("Scraper executed too late"));
        let early = timely_execution_check(at(10, 5, 0), at(9, 59, 59), tolerance).unwrap();
        assert!(early.starts_with("Scraper executed too early"));
        assert!(early.contains("Expected: 2018-10-27T10:05:00+00:00"));
    }

    #[test]
    fn cookie_warning_inside_threshold_only() {
        let now = at(12, 0, 0);
        let threshold = TimeDelta::weeks(2);

        assert_eq!(cookie_expiry_check(now + TimeDelta::days(20), now, threshold), None);
        assert_eq!(
            cookie_expiry_check(now + TimeDelta::days(3) + TimeDelta::hours(4), now, threshold).as_deref(),
            Some("Uno cookie will expire in 3d 4h 0m")
        );
        assert_eq!(
            cookie_expiry_check(now - TimeDelta::minutes(90), now, threshold).as_deref(),
            Some("Uno cookie expired 0d 1h 30m ago")
        );
    }

    #[test]
    fn extraction_alerts_distinguish_kinds() {
        let transport = ExtractError::Transport {
            status: None,
            message: "connection refused".into(),
        };
        assert!(extraction_alert(&transport).contains("failed to reach the portal"));

        let parse = ExtractError::Parse(ParseError::new("Could not find variable data2", "<html/>"));
        let alert = extraction_alert(&parse);
        assert!(alert.contains("format may have changed"));
        assert!(alert.ends_with("Could not find variable data2"));
    }

    #[test]
    fn next_run_is_strictly_in_the_future() {
        assert_eq!(next_run_after(at(10, 0, 0), 5), at(10, 5, 0));
        assert_eq!(next_run_after(at(10, 5, 0), 5), at(11, 5, 0));
        assert_eq!(next_run_after(at(10, 30, 0), 5), at(11, 5, 0));
        assert_eq!(next_run_after(at(23, 59, 0), 0), Utc.with_ymd_and_hms(2018, 10, 28, 0, 0, 0).unwrap());
    }
}
