use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Initialize structured logging
///
/// `RUST_LOG` overrides both the application level and the OpenTelemetry
/// SDK level. Metrics are exported separately via `init_metrics()`.
pub fn init_tracing_with_otel(
    log_level: &str,
    show_target: bool,
    otel_log_level: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("{log_level},opentelemetry={otel_log_level}"))
    });
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(show_target);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set global tracing subscriber: {e}"))?;

    Ok(())
}

/// Flush log output before exit
pub fn shutdown_tracing() {
    tracing::info!("signgate shutdown complete");
}
