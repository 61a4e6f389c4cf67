use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::{fs, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub subscriber_id: u64,
    /// `WHMCSUser` session cookie. `UNO_COOKIE` takes precedence.
    #[serde(default)]
    pub cookie: String,
    pub cookie_expires: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub cookie_warnings: bool,
    #[serde(default = "default_cookie_warning_days")]
    pub cookie_warning_days: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Page describing this scraper, sent in the user agent.
    pub client_url: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl PortalConfig {
    pub fn tz(&self) -> anyhow::Result<Tz> {
        self.time_zone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid portal.time_zone '{}': {e}", self.time_zone))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cookie_warning_threshold(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.cookie_warning_days))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub lower_hours_ago: u32,
    pub upper_hours_ago: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lower_hours_ago: 23,
            upper_hours_ago: 11,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    /// Routes usage summaries on the receiving side. `USAGE_APP_TOKEN` takes
    /// precedence.
    pub app_token: Option<String>,
    #[serde(default = "default_true")]
    pub send_usage: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            app_token: None,
            send_usage: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Minute past each hour at which a scheduled run starts.
    pub minute: u32,
    pub tolerance_secs: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            minute: 5,
            tolerance_secs: 300,
        }
    }
}

impl ScheduleConfig {
    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.tolerance_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub portal: PortalConfig,
    #[serde(default)]
    pub window: WindowConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("UNO_SCRAPER_CONFIG").unwrap_or_else(|_| "uno-scraper.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        let mut cfg = Self::parse(&contents)?;
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cookie) = lookup("UNO_COOKIE").filter(|v| !v.is_empty()) {
            self.portal.cookie = cookie;
        }
        if let Some(token) = lookup("USAGE_APP_TOKEN").filter(|v| !v.is_empty()) {
            self.notification.app_token = Some(token);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.portal.tz()?;
        anyhow::ensure!(
            self.window.lower_hours_ago > self.window.upper_hours_ago,
            "window.lower_hours_ago ({}) must be greater than window.upper_hours_ago ({})",
            self.window.lower_hours_ago,
            self.window.upper_hours_ago
        );
        anyhow::ensure!(self.storage.batch_size > 0, "storage.batch_size must be positive");
        anyhow::ensure!(self.schedule.minute < 60, "schedule.minute must be below 60");
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_cookie_warning_days() -> u32 {
    14
}

fn default_base_url() -> String {
    "https://my.uno.net.uk".to_string()
}

fn default_time_zone() -> String {
    "Europe/London".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    100
}
