use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use usage_client::domain::{UsageRecord, UsageSummary};

use crate::pipeline::{accept_upstream, Envelope, PipelineError, Sink};

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint returned HTTP {0}")]
    Status(StatusCode),
}

/// Delivers a message to whoever is watching this scraper.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, message: &str) -> Result<(), NotifyError>;
}

/// Posts `{"message": ...}` to a webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        metrics::counter!("notifications_published_total").increment(1);
        Ok(())
    }
}

/// Writes notifications to the log only; used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, message: &str) -> Result<(), NotifyError> {
        tracing::info!(message, "notification");
        Ok(())
    }
}

/// Push payload for a usage summary: the app token routes it on the
/// receiving side.
pub fn summary_message(summary: &UsageSummary, app_token: Option<&str>) -> String {
    serde_json::json!({
        "app": app_token,
        "body": summary.to_string(),
    })
    .to_string()
}

/// Sums the records it receives and publishes one summary.
pub struct UsageSummarySink {
    notifier: Arc<dyn Notifier>,
    app_token: Option<String>,
}

impl UsageSummarySink {
    pub fn new(notifier: Arc<dyn Notifier>, app_token: Option<String>) -> Self {
        Self { notifier, app_token }
    }
}

#[async_trait::async_trait]
impl Sink<UsageRecord> for UsageSummarySink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut summary = UsageSummary::default();
        while let Some(item) = input.next().await {
            if let Some(env) = accept_upstream(item, "usage_summary")? {
                summary = summary.add(&env.payload);
            }
        }

        if summary.is_empty() {
            tracing::info!("no usage in window, skipping summary");
            return Ok(());
        }

        let message = summary_message(&summary, self.app_token.as_deref());
        self.notifier
            .publish(&message)
            .await
            .map_err(|e| PipelineError::Sink(e.to_string()))?;
        tracing::info!(hours = summary.hours, %summary, "published usage summary");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Keeps every published message.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) messages: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, message: &str) -> Result<(), NotifyError> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn records() -> Vec<Result<Envelope<UsageRecord>, PipelineError>> {
        let hour = Utc.with_ymd_and_hms(2018, 10, 27, 10, 0, 0).unwrap();
        vec![
            Ok(Envelope::now(UsageRecord::new(hour, 1024, 1024 * 1024))),
            Ok(Envelope::now(UsageRecord::new(hour, 512, 1024 * 1024))),
        ]
    }

    #[test]
    fn summary_message_carries_app_token_and_body() {
        let summary = UsageSummary {
            uploaded: 1536,
            downloaded: 2 * 1024 * 1024,
            hours: 2,
        };
        let message: serde_json::Value = serde_json::from_str(&summary_message(&summary, Some("tok"))).unwrap();
        assert_eq!(message["app"], "tok");
        assert_eq!(message["body"], "1.5 KiB up, 2.0 MiB down");
    }

    #[tokio::test]
    async fn publishes_one_summary() {
        let notifier = Arc::new(RecordingNotifier::default());
        let sink = UsageSummarySink::new(notifier.clone(), Some("tok".into()));

        sink.run(futures::stream::iter(records())).await.unwrap();

        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("1.5 KiB up, 2.0 MiB down"));
    }

    #[tokio::test]
    async fn empty_window_publishes_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let sink = UsageSummarySink::new(notifier.clone(), None);

        sink.run(futures::stream::iter(Vec::new())).await.unwrap();

        assert!(notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_posts_message() {
        let received = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
        let captured = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push(body);
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), Duration::from_secs(5)).unwrap();
        notifier.publish("hello").await.unwrap();

        assert_eq!(received.lock().unwrap()[0]["message"], "hello");
    }
}
