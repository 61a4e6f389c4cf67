use std::fmt;

use super::{format_bytes, UsageRecord};

/// Totals over a selection of hourly records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSummary {
    pub uploaded: u64,
    pub downloaded: u64,
    pub hours: usize,
}

impl UsageSummary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a UsageRecord>,
    {
        records.into_iter().fold(Self::default(), |acc, r| acc.add(r))
    }

    pub fn add(self, record: &UsageRecord) -> Self {
        Self {
            uploaded: self.uploaded.saturating_add(record.uploaded()),
            downloaded: self.downloaded.saturating_add(record.downloaded()),
            hours: self.hours + 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.uploaded.saturating_add(self.downloaded)
    }

    pub fn is_empty(&self) -> bool {
        self.hours == 0
    }
}

impl fmt::Display for UsageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} up, {} down",
            format_bytes(self.uploaded),
            format_bytes(self.downloaded)
        )
    }
}
