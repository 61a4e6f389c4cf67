use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use uno_usage_scraper::{
    config::AppConfig, observability, pipeline::Pipeline, sinks::HourUsageSink, sources::ItemBackfillFileSource,
    transform,
};
use usage_client::domain::UsageRecord;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_items <ndjson_file_path>");
    }
    let file_path = &args[1];

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.storage.max_connections)
        .connect(&cfg.storage.uri)
        .await?;

    let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
        source: ItemBackfillFileSource::new(file_path),
        transforms: vec![Arc::new(transform::UsageRecordValidation)],
        sink: HourUsageSink::new(pool, cfg.storage.batch_size),
    };

    pipeline.run().await?;

    Ok(())
}
