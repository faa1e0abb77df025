pub(crate) mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{Layer, Registry};

    pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let default_filter = level.unwrap_or(default_filter);
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(default_filter.into())
            .from_env_lossy();

        use tracing_subscriber::layer::SubscriberExt;

        if std::env::var("FAULTLINE_DISABLE_LOGS").is_ok() {
            return Ok(());
        }
        let use_json = std::env::var("FAULTLINE_LOG_FORMAT")
            .map(|v| v.to_lowercase() == "json")
            .unwrap_or(false);

        let fmt_layer = if use_json {
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .json()
                .with_file(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false)
                .with_file(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .boxed()
        };
        let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
