use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::env;
use uno_usage_scraper::{config::AppConfig, metrics_server, observability, Scraper};

const USAGE: &str = "usage: uno-usage-scraper [--scheduled | --event-time <rfc3339>]";

enum Mode {
    Once { expected: Option<DateTime<Utc>> },
    Scheduled,
}

fn parse_args(args: &[String]) -> Result<Mode> {
    match args {
        [] => Ok(Mode::Once { expected: None }),
        [flag] if flag == "--scheduled" => Ok(Mode::Scheduled),
        [flag, value] if flag == "--event-time" => {
            let expected = DateTime::parse_from_rfc3339(value)
                .map_err(|e| anyhow::anyhow!("invalid --event-time '{value}': {e}"))?
                .with_timezone(&Utc);
            Ok(Mode::Once {
                expected: Some(expected),
            })
        }
        _ => bail!(USAGE),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let scraper = Scraper::connect(cfg).await?;
    match mode {
        // "Now" is taken once and shared by the checks and the extraction.
        Mode::Once { expected } => scraper.run_once(Utc::now(), expected).await,
        Mode::Scheduled => scraper.run_scheduled().await,
    }
}
