use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use usage_client::domain::UsageRecord;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Half-open range of hours `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}

impl HourWindow {
    /// Window measured back from the hour containing `now`, e.g. 23 and 11
    /// select the 12 hours that ended 11 hours ago.
    pub fn trailing(now: DateTime<Utc>, lower_hours_ago: u32, upper_hours_ago: u32) -> Self {
        let now_hour = UsageRecord::new(now, 0, 0).hour();
        Self {
            lower: now_hour - TimeDelta::hours(i64::from(lower_hours_ago)),
            upper: now_hour - TimeDelta::hours(i64::from(upper_hours_ago)),
        }
    }

    pub fn contains(&self, record: &UsageRecord) -> bool {
        self.lower <= record.hour() && record.hour() < self.upper
    }
}

#[async_trait::async_trait]
impl Transform<UsageRecord, UsageRecord> for HourWindow {
    async fn apply(
        &self,
        input: Envelope<UsageRecord>,
    ) -> Result<Option<Envelope<UsageRecord>>, PipelineError> {
        if self.contains(&input.payload) {
            Ok(Some(input))
        } else {
            tracing::debug!(record = %input.payload, "outside window");
            Ok(None)
        }
    }
}

/// Pure validation of a `UsageRecord`.
///
/// Rules:
/// - hour must be within a broad sanity window [2000-01-01, 2100-01-01).
pub fn validate_usage_record(env: Envelope<UsageRecord>) -> Result<Envelope<UsageRecord>, PipelineError> {
    let min_ts = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
    let max_ts = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).single();
    let hour = env.payload.hour();

    match (min_ts, max_ts) {
        (Some(min), Some(max)) if min <= hour && hour < max => Ok(env),
        _ => Err(PipelineError::Transform(format!(
            "timestamp out of allowed range: {}",
            env.payload
        ))),
    }
}

#[derive(Clone, Default)]
pub struct UsageRecordValidation;

#[async_trait::async_trait]
impl Transform<UsageRecord, UsageRecord> for UsageRecordValidation {
    async fn apply(
        &self,
        input: Envelope<UsageRecord>,
    ) -> Result<Option<Envelope<UsageRecord>>, PipelineError> {
        match validate_usage_record(input) {
            Ok(env) => Ok(Some(env)),
            Err(e) => {
                metrics::counter!("validation_usage_record_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
