mod error;
mod format;
mod usage_record;
mod usage_summary;

pub use error::ValidationError;
pub use format::format_bytes;
pub use usage_record::{Item, UsageRecord, DATE_HOUR, DOWNLOADED_BYTES, UPLOADED_BYTES};
pub use usage_summary::UsageSummary;
