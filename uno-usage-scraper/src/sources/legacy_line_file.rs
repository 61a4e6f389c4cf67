use std::path::PathBuf;

use async_stream::stream;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use usage_client::domain::UsageRecord;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Flat-text source written by the legacy collection script.
///
/// One record per line: `<ISO 8601 datetime>,<uploaded bytes>,<downloaded bytes>`.
/// Blank lines are ignored. A malformed line yields its own validation error
/// and reading carries on with the next line.
pub struct LegacyLineFileSource {
    path: PathBuf,
}

impl LegacyLineFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source<UsageRecord> for LegacyLineFileSource {
    async fn stream(&self) -> EnvelopeStream<UsageRecord> {
        let path = self.path.clone();
        let s = stream! {
            let file = match File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open legacy file: {e}")));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();
            let mut line_no: u64 = 0;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("failed to read legacy line: {e}")));
                        return;
                    }
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                match UsageRecord::parse_line(&line) {
                    Ok(record) => {
                        yield Ok(Envelope::now(record));
                    }
                    Err(e) => {
                        metrics::counter!("legacy_line_parse_errors_total").increment(1);
                        tracing::warn!(line_no, error = %e, "invalid legacy line");
                        yield Err(e.into());
                    }
                }
            }
        };

        Box::pin(s)
    }
}
