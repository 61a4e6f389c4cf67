pub mod daily_usage_html;
pub mod item_backfill_file;
pub mod legacy_line_file;
pub mod uno_daily;

pub use item_backfill_file::ItemBackfillFileSource;
pub use legacy_line_file::LegacyLineFileSource;
pub use uno_daily::{DailyUsageExtractor, DailyUsageSource, ExtractError};
