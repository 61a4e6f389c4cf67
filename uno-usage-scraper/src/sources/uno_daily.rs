use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::{header, Client, StatusCode};
use usage_client::domain::UsageRecord;

use super::daily_usage_html::{parse_daily_usage, ParseError};
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

const DAILY_USAGE_PATH: &str = "/uno/unousagedaily.php";
const SESSION_COOKIE: &str = "WHMCSUser";

/// Records for the last 24 hours in ascending order. Single pass: once
/// drained it yields nothing and never re-fetches.
pub type DailyUsage = std::vec::IntoIter<UsageRecord>;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// The portal could not be reached or answered with a non-2xx status.
    /// `status` is `None` when no response was received (connection error,
    /// timeout, abort).
    #[error("portal request failed: {message}")]
    Transport {
        status: Option<StatusCode>,
        message: String,
    },
    /// The page did not have the expected structure; retrying will not help.
    #[error("could not parse portal page: {0}")]
    Parse(#[from] ParseError),
}

impl ExtractError {
    fn transport(e: reqwest::Error) -> Self {
        Self::Transport {
            status: e.status(),
            message: e.to_string(),
        }
    }

    /// Short label for metrics and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Parse(_) => "parse",
        }
    }
}

/// Retrieves usage for each of the last 24 hours for a subscriber.
#[derive(Debug, Clone)]
pub struct DailyUsageExtractor {
    client: Client,
    base_url: String,
    time_zone: Tz,
}

impl DailyUsageExtractor {
    /// `client_url` explains what this software is; it is sent to the portal
    /// alongside the product name and version.
    pub fn new(base_url: &str, client_url: &str, time_zone: Tz, timeout: Duration) -> Result<Self, ExtractError> {
        let user_agent = format!(
            "{}/{} ({client_url})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(ExtractError::transport)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            time_zone,
        })
    }

    /// Fetch and parse the last 24 hours' usage for `subscriber_id`.
    ///
    /// `cookie` is a valid `WHMCSUser` session cookie and `now` is the
    /// reference instant the page's undated hours are resolved against.
    #[tracing::instrument(skip(self, cookie, now))]
    pub async fn extract(
        &self,
        subscriber_id: u64,
        cookie: &str,
        now: DateTime<Utc>,
    ) -> Result<DailyUsage, ExtractError> {
        let html = self.fetch(subscriber_id, cookie).await?;
        let records = parse_daily_usage(&html, now, self.time_zone)?;
        tracing::info!(records = records.len(), "extracted daily usage");
        Ok(records.into_iter())
    }

    async fn fetch(&self, subscriber_id: u64, cookie: &str) -> Result<String, ExtractError> {
        metrics::counter!("portal_fetch_total").increment(1);

        let response = self
            .client
            .get(format!("{}{DAILY_USAGE_PATH}?id={subscriber_id}", self.base_url))
            .header(header::COOKIE, format!("{SESSION_COOKIE}={cookie}"))
            .send()
            .await
            .map_err(ExtractError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Transport {
                status: Some(status),
                message: format!("portal returned HTTP {status}"),
            });
        }

        let body = response.text().await.map_err(|e| ExtractError::Transport {
            status: Some(status),
            message: e.to_string(),
        })?;
        tracing::debug!(%status, body = %body, "portal response");
        Ok(body)
    }
}

/// Pipeline source running one extraction for a subscriber.
pub struct DailyUsageSource {
    extractor: Arc<DailyUsageExtractor>,
    subscriber_id: u64,
    cookie: String,
    now: DateTime<Utc>,
}

impl DailyUsageSource {
    pub fn new(extractor: Arc<DailyUsageExtractor>, subscriber_id: u64, cookie: String, now: DateTime<Utc>) -> Self {
        Self {
            extractor,
            subscriber_id,
            cookie,
            now,
        }
    }
}

#[async_trait::async_trait]
impl Source<UsageRecord> for DailyUsageSource {
    async fn stream(&self) -> EnvelopeStream<UsageRecord> {
        let extracted = self
            .extractor
            .extract(self.subscriber_id, &self.cookie, self.now)
            .await;

        let items: Vec<Result<Envelope<UsageRecord>, PipelineError>> = match extracted {
            Ok(records) => records.map(|r| Ok(Envelope::now(r))).collect(),
            Err(e) => {
                metrics::counter!("portal_fetch_errors_total", "kind" => e.kind()).increment(1);
                vec![Err(e.into())]
            }
        };
        Box::pin(futures::stream::iter(items))
    }
}
