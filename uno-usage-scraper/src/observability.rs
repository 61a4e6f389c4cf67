use tracing_subscriber::EnvFilter;

/// `RUST_LOG` replaces the default filter when set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,uno_usage_scraper=info,usage_client=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
