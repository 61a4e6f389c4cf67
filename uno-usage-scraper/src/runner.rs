use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use usage_client::domain::UsageRecord;

use crate::{
    checks::{cookie_expiry_check, extraction_alert, next_run_after, timely_execution_check},
    config::{AppConfig, NotificationConfig},
    pipeline::{Envelope, Pipeline, PipelineError, Sink},
    sinks::{FanoutSink, HourUsageSink, LogNotifier, Notifier, UsageSummarySink, WebhookNotifier},
    sources::{DailyUsageExtractor, DailyUsageSource, ExtractError},
    transform::HourWindow,
};

enum UsageSink {
    Store(HourUsageSink),
    StoreAndSummarise(FanoutSink<HourUsageSink, UsageSummarySink>),
}

#[async_trait::async_trait]
impl Sink<UsageRecord> for UsageSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        match self {
            Self::Store(s) => s.run(input).await,
            Self::StoreAndSummarise(s) => s.run(input).await,
        }
    }
}

/// Webhook when one is configured, the log otherwise.
pub fn build_notifier(cfg: &NotificationConfig, timeout: std::time::Duration) -> anyhow::Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match &cfg.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), timeout)?),
        None => Arc::new(LogNotifier),
    };
    Ok(notifier)
}

/// One scrape: checks, extraction, window filter, storage and summary.
pub struct Scraper {
    cfg: AppConfig,
    extractor: Arc<DailyUsageExtractor>,
    pool: PgPool,
    notifier: Arc<dyn Notifier>,
}

impl Scraper {
    pub fn new(cfg: AppConfig, extractor: DailyUsageExtractor, pool: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cfg,
            extractor: Arc::new(extractor),
            pool,
            notifier,
        }
    }

    /// Needs the portal session cookie; the offline tools sharing the
    /// config do not.
    pub async fn connect(cfg: AppConfig) -> anyhow::Result<Self> {
        let portal = &cfg.portal;
        anyhow::ensure!(!portal.cookie.is_empty(), "portal.cookie must be set (or UNO_COOKIE)");
        let extractor = DailyUsageExtractor::new(
            &portal.base_url,
            &portal.client_url,
            portal.tz()?,
            portal.request_timeout(),
        )?;

        let pool = PgPoolOptions::new()
            .max_connections(cfg.storage.max_connections)
            .connect(&cfg.storage.uri)
            .await?;

        let notifier = build_notifier(&cfg.notification, portal.request_timeout())?;
        Ok(Self::new(cfg, extractor, pool, notifier))
    }

    /// Run once with `now` as the reference instant. `expected` is the time
    /// the run was scheduled for, if a scheduler stated one.
    pub async fn run_once(&self, now: DateTime<Utc>, expected: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        if let Some(expected) = expected {
            if let Some(message) = timely_execution_check(expected, now, self.cfg.schedule.tolerance()) {
                tracing::warn!(%expected, actual = %now, "run outside schedule tolerance");
                self.alert(&message).await;
            }
        }

        let portal = &self.cfg.portal;
        if let Some(expires) = portal.cookie_expires.filter(|_| portal.cookie_warnings) {
            if let Some(message) = cookie_expiry_check(expires, now, portal.cookie_warning_threshold()) {
                tracing::warn!(%expires, "session cookie close to expiry");
                self.alert(&message).await;
            }
        }

        let window = HourWindow::trailing(now, self.cfg.window.lower_hours_ago, self.cfg.window.upper_hours_ago);
        let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
            source: DailyUsageSource::new(self.extractor.clone(), portal.subscriber_id, portal.cookie.clone(), now),
            transforms: vec![Arc::new(window)],
            sink: self.sink(),
        };

        match pipeline.run().await {
            Ok(()) => {
                tracing::info!(lower = %window.lower, upper = %window.upper, "scrape complete");
                Ok(())
            }
            Err(PipelineError::Extract(e)) => {
                if let ExtractError::Parse(parse) = &e {
                    tracing::debug!(html = parse.html(), "unparseable portal page");
                }
                tracing::error!(error = %e, kind = e.kind(), "usage extraction failed");
                self.alert(&extraction_alert(&e)).await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sleep until `schedule.minute` past the next hour, run, repeat.
    /// Failed runs are logged and do not stop the loop.
    pub async fn run_scheduled(&self) -> anyhow::Result<()> {
        loop {
            let next = next_run_after(Utc::now(), self.cfg.schedule.minute);
            tracing::info!(next_run = %next, "waiting for next run");
            tokio::time::sleep((next - Utc::now()).to_std().unwrap_or_default()).await;

            if let Err(e) = self.run_once(Utc::now(), Some(next)).await {
                tracing::error!(error = %e, "scrape run failed");
            }
        }
    }

    fn sink(&self) -> UsageSink {
        let store = HourUsageSink::new(self.pool.clone(), self.cfg.storage.batch_size);
        if self.cfg.notification.send_usage {
            let summary = UsageSummarySink::new(self.notifier.clone(), self.cfg.notification.app_token.clone());
            UsageSink::StoreAndSummarise(FanoutSink::new(store, summary))
        } else {
            UsageSink::Store(store)
        }
    }

    async fn alert(&self, message: &str) {
        if let Err(e) = self.notifier.publish(message).await {
            tracing::error!(error = %e, message, "failed to publish alert");
        }
    }
}
