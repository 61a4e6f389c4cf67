use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{UsageRecord, ValidationError};

/// Row shape of the `hour_usage` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredHourUsage {
    pub date_hour: String,
    pub uploaded_bytes: i64,
    pub downloaded_bytes: i64,
}

impl TryFrom<StoredHourUsage> for UsageRecord {
    type Error = ValidationError;

    fn try_from(row: StoredHourUsage) -> Result<Self, Self::Error> {
        let mut item = serde_json::Map::new();
        item.insert(crate::domain::DATE_HOUR.to_string(), row.date_hour.into());
        item.insert(crate::domain::UPLOADED_BYTES.to_string(), row.uploaded_bytes.into());
        item.insert(crate::domain::DOWNLOADED_BYTES.to_string(), row.downloaded_bytes.into());
        UsageRecord::parse_item(&item)
    }
}

/// Collapse records sharing an hour-bucket key, keeping the last one.
///
/// PostgreSQL refuses to touch the same row twice in one `ON CONFLICT`
/// statement, so a batch must not repeat a key.
pub fn dedup_by_hour<'a, I>(records: I) -> Vec<&'a UsageRecord>
where
    I: IntoIterator<Item = &'a UsageRecord>,
{
    let mut by_key: BTreeMap<String, &UsageRecord> = BTreeMap::new();
    for record in records {
        by_key.insert(record.date_hour_key(), record);
    }
    by_key.into_values().collect()
}

/// Upsert a batch of records keyed by their hour bucket; the last write wins.
///
/// Returns the number of rows written.
pub async fn upsert_hour_usage(pool: &PgPool, records: &[UsageRecord]) -> Result<u64> {
    let rows = dedup_by_hour(records);
    if rows.is_empty() {
        return Ok(0);
    }

    let mut values = Vec::with_capacity(rows.len());
    for record in rows {
        values.push((
            record.date_hour_key(),
            i64::try_from(record.uploaded())?,
            i64::try_from(record.downloaded())?,
        ));
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO hour_usage (date_hour, uploaded_bytes, downloaded_bytes) ",
    );
    builder.push_values(&values, |mut b, (key, up, down)| {
        b.push_bind(key).push_bind(*up).push_bind(*down);
    });
    builder.push(
        " ON CONFLICT (date_hour) DO UPDATE SET \
         uploaded_bytes = EXCLUDED.uploaded_bytes, \
         downloaded_bytes = EXCLUDED.downloaded_bytes",
    );

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Key bounds selecting the hours that start in `[start, end)`. Both ends
/// round up to the next hour boundary unless already on one.
pub fn hour_key_bounds(start: DateTime<Utc>, end: DateTime<Utc>) -> (String, String) {
    let key = |t: DateTime<Utc>| {
        let hour = UsageRecord::new(t, 0, 0).hour();
        let bound = if hour == t { hour } else { hour + TimeDelta::hours(1) };
        UsageRecord::new(bound, 0, 0).date_hour_key()
    };
    (key(start), key(end))
}

/// Fetch stored hours starting in `[start, end)`, oldest first.
pub async fn load_range(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<UsageRecord>> {
    let (start_key, end_key) = hour_key_bounds(start, end);

    // Hour-bucket keys sort lexicographically in time order.
    let rows = sqlx::query_as::<_, StoredHourUsage>(
        r#"
        SELECT
            date_hour,
            uploaded_bytes,
            downloaded_bytes
        FROM hour_usage
        WHERE date_hour >= $1
          AND date_hour <  $2
        ORDER BY date_hour
        "#,
    )
    .bind(start_key)
    .bind(end_key)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(UsageRecord::try_from(row)?);
    }
    Ok(records)
}
