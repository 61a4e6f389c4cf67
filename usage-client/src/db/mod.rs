mod hour_usage_queries;

pub use hour_usage_queries::{dedup_by_hour, hour_key_bounds, load_range, upsert_hour_usage, StoredHourUsage};
