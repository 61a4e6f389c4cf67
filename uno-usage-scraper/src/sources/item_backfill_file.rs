use std::path::PathBuf;

use async_stream::stream;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use usage_client::domain::{Item, UsageRecord, ValidationError};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// NDJSON backfill source of stored items, e.g. a table export.
///
/// Each line is one JSON object in the persisted shape
/// (`DateHour`, `UploadedBytes`, `DownloadedBytes`).
pub struct ItemBackfillFileSource {
    path: PathBuf,
}

impl ItemBackfillFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_item_line(line: &str) -> Result<UsageRecord, ValidationError> {
    let item: Item = serde_json::from_str(line).map_err(|e| ValidationError::MalformedItem {
        reason: e.to_string(),
    })?;
    UsageRecord::parse_item(&item)
}

#[async_trait::async_trait]
impl Source<UsageRecord> for ItemBackfillFileSource {
    async fn stream(&self) -> EnvelopeStream<UsageRecord> {
        let path = self.path.clone();
        let s = stream! {
            let file = match File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open backfill file: {e}")));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("failed to read backfill line: {e}")));
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_item_line(&line) {
                    Ok(record) => {
                        yield Ok(Envelope::now(record));
                    }
                    Err(e) => {
                        metrics::counter!("item_backfill_parse_errors_total").increment(1);
                        yield Err(e.into());
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_item_line() {
        let record =
            parse_item_line(r#"{"DateHour": "2018-10-27T22Z", "DownloadedBytes": 3487529, "UploadedBytes": 934785}"#)
                .unwrap();
        assert_eq!(record.date_hour_key(), "2018-10-27T22Z");
        assert_eq!(record.uploaded(), 934_785);
        assert_eq!(record.downloaded(), 3_487_529);
    }

    #[test]
    fn rejects_non_object_and_incomplete_lines() {
        assert!(matches!(
            parse_item_line("[1, 2, 3]"),
            Err(ValidationError::MalformedItem { .. })
        ));
        assert!(matches!(
            parse_item_line(r#"{"DateHour": "2018-10-27T22Z", "UploadedBytes": 1}"#),
            Err(ValidationError::MissingKey { key: "DownloadedBytes" })
        ));
    }

    #[tokio::test]
    async fn streams_each_line() {
        use futures::StreamExt;
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"DateHour": "2018-10-27T21Z", "DownloadedBytes": 1, "UploadedBytes": 2}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"DateHour": "2018-10-27T22Z", "DownloadedBytes": 3, "UploadedBytes": 4}}"#).unwrap();

        let items: Vec<_> = ItemBackfillFileSource::new(file.path()).stream().await.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(PipelineError::Validation(_))));
        assert_eq!(items[2].as_ref().unwrap().payload.uploaded(), 4);
    }
}
