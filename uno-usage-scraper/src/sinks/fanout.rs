use futures::StreamExt;

use crate::pipeline::{accept_upstream, Envelope, PipelineError, Sink};

/// Feeds the same records to two sinks.
///
/// The input is buffered in full first, so a fatal upstream error reaches
/// neither sink. Both sinks run even if the first fails; the first error is
/// returned.
pub struct FanoutSink<A, B> {
    first: A,
    second: B,
}

impl<A, B> FanoutSink<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

#[async_trait::async_trait]
impl<T, A, B> Sink<T> for FanoutSink<A, B>
where
    T: Clone + Send + Sync + 'static,
    A: Sink<T>,
    B: Sink<T>,
{
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<T>> = Vec::new();
        while let Some(item) = input.next().await {
            if let Some(env) = accept_upstream(item, "fanout")? {
                buffer.push(env);
            }
        }

        let replay = |items: Vec<Envelope<T>>| futures::stream::iter(items.into_iter().map(Ok::<_, PipelineError>));
        let first = self.first.run(replay(buffer.clone())).await;
        let second = self.second.run(replay(buffer)).await;
        first.and(second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{daily_usage_html::ParseError, ExtractError};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<u32>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Sink<u32> for Recorder {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: futures::Stream<Item = Result<Envelope<u32>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                self.seen.lock().unwrap().push(item?.payload);
            }
            if self.fail {
                return Err(PipelineError::Sink("recorder failed".into()));
            }
            Ok(())
        }
    }

    fn input(items: Vec<Result<Envelope<u32>, PipelineError>>) -> impl futures::Stream<Item = Result<Envelope<u32>, PipelineError>> + Send + Unpin + 'static {
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn both_sinks_see_every_record_in_order() {
        let (a, b) = (Recorder::default(), Recorder::default());
        let sink = FanoutSink::new(a.clone(), b.clone());

        sink.run(input(vec![Ok(Envelope::now(1)), Ok(Envelope::now(2))])).await.unwrap();

        assert_eq!(*a.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*b.seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn extraction_error_reaches_neither_sink() {
        let (a, b) = (Recorder::default(), Recorder::default());
        let sink = FanoutSink::new(a.clone(), b.clone());
        let parse = ExtractError::Parse(ParseError::new("Could not find variable data", "<html/>"));

        let err = sink
            .run(input(vec![Ok(Envelope::now(1)), Err(parse.into())]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Extract(ExtractError::Parse(_))));
        assert!(a.seen.lock().unwrap().is_empty());
        assert!(b.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_sink_runs_when_first_fails() {
        let a = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let b = Recorder::default();
        let sink = FanoutSink::new(a.clone(), b.clone());

        let err = sink.run(input(vec![Ok(Envelope::now(7))])).await.unwrap_err();

        assert!(matches!(err, PipelineError::Sink(_)));
        assert_eq!(*b.seen.lock().unwrap(), vec![7]);
    }
}
