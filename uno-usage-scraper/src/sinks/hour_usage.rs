use std::time::Instant;

use futures::StreamExt;
use sqlx::postgres::PgPool;
use usage_client::{db, domain::UsageRecord};

use crate::pipeline::{accept_upstream, Envelope, PipelineError, Sink};

/// Upserts hourly records into the `hour_usage` table, keyed by hour bucket.
pub struct HourUsageSink {
    pool: PgPool,
    batch_size: usize,
}

impl HourUsageSink {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    async fn flush_batch(&self, batch: &[UsageRecord]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        match db::upsert_hour_usage(&self.pool, batch).await {
            Ok(rows) => {
                metrics::counter!("hour_usage_upserted_total").increment(rows);
                let seconds = start.elapsed().as_secs_f64();
                tracing::info!(
                    records = batch.len(),
                    rows,
                    seconds = format_args!("{seconds:.3}"),
                    per_second = format_args!("{:.3}", batch.len() as f64 / seconds.max(f64::EPSILON)),
                    "upserted hour usage"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, records = batch.len(), "hour usage upsert failed");
                metrics::counter!("hour_usage_sink_errors_total").increment(1);
                Err(PipelineError::Sink(e.to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<UsageRecord> for HourUsageSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<UsageRecord> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let Some(env) = accept_upstream(item, "hour_usage")? else {
                continue;
            };

            tracing::debug!(record = %env.payload, "putting");
            buffer.push(env.payload);
            if buffer.len() >= self.batch_size {
                self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        self.flush_batch(&buffer).await
    }
}
