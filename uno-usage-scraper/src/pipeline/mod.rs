use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};
use usage_client::domain::ValidationError;

use crate::sources::uno_daily::ExtractError;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

impl PipelineError {
    /// Whether the whole run must stop, as opposed to skipping one record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::Transform(_))
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

/// Maps one envelope to another; `Ok(None)` drops it from the stream.
#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Option<Envelope<O>>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.filter_map(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await.transpose(),
                        Err(e) => Some(Err(e)),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}

/// Shared upstream-error policy for sinks: fatal errors end the run, the
/// rest are logged per record and skipped.
pub fn accept_upstream<T>(
    item: Result<Envelope<T>, PipelineError>,
    sink: &'static str,
) -> Result<Option<Envelope<T>>, PipelineError> {
    match item {
        Ok(env) => Ok(Some(env)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::error!(error = %e, sink, "skipping record rejected upstream");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use usage_client::domain::UsageRecord;

    struct VecSource(Vec<UsageRecord>);

    #[async_trait::async_trait]
    impl Source<UsageRecord> for VecSource {
        async fn stream(&self) -> EnvelopeStream<UsageRecord> {
            let items: Vec<Result<Envelope<UsageRecord>, PipelineError>> =
                self.0.iter().copied().map(|r| Ok(Envelope::now(r))).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct EvenUploads;

    #[async_trait::async_trait]
    impl Transform<UsageRecord, UsageRecord> for EvenUploads {
        async fn apply(
            &self,
            input: Envelope<UsageRecord>,
        ) -> Result<Option<Envelope<UsageRecord>>, PipelineError> {
            Ok((input.payload.uploaded() % 2 == 0).then_some(input))
        }
    }

    #[derive(Default)]
    struct CollectSink(Arc<Mutex<Vec<UsageRecord>>>);

    #[async_trait::async_trait]
    impl Sink<UsageRecord> for CollectSink {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                if let Some(env) = accept_upstream(item, "collect")? {
                    self.0.lock().unwrap().push(env.payload);
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transforms_can_drop_records() {
        let hour = Utc.with_ymd_and_hms(2018, 10, 27, 0, 0, 0).unwrap();
        let records: Vec<_> = (0..4).map(|i| UsageRecord::new(hour, i, 0)).collect();
        let sink = CollectSink::default();
        let collected = sink.0.clone();

        let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
            source: VecSource(records),
            transforms: vec![Arc::new(EvenUploads)],
            sink,
        };
        pipeline.run().await.unwrap();

        let uploads: Vec<u64> = collected.lock().unwrap().iter().map(|r| r.uploaded()).collect();
        assert_eq!(uploads, vec![0, 2]);
    }

    #[test]
    fn validation_errors_are_skipped_but_sink_errors_are_not() {
        let skipped = accept_upstream::<UsageRecord>(
            Err(ValidationError::DateHourNotString.into()),
            "test",
        );
        assert!(matches!(skipped, Ok(None)));

        let fatal = accept_upstream::<UsageRecord>(Err(PipelineError::Sink("down".into())), "test");
        assert!(matches!(fatal, Err(PipelineError::Sink(_))));
    }
}
