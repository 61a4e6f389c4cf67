use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use std::env;
use uno_usage_scraper::{config::AppConfig, observability};
use usage_client::{db, domain::UsageSummary};

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| anyhow::anyhow!("invalid timestamp '{value}': {e}"))?
        .with_timezone(&Utc))
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: usage_report <from_rfc3339> <to_rfc3339>");
    }
    let from = parse_instant(&args[1])?;
    let to = parse_instant(&args[2])?;

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.storage.max_connections)
        .connect(&cfg.storage.uri)
        .await?;

    // Schema is expected to be applied out-of-band via `sql/schema/*.sql`.
    let records = db::load_range(&pool, from, to).await?;
    for record in &records {
        println!("{record}");
    }

    let summary = UsageSummary::from_records(&records);
    println!("{} hours: {summary}", summary.hours);

    Ok(())
}
