use crate::config::Config;
use common::TelemetryGuard;

pub const SERVICE_NAME: &str = "skyguard-gateway";

/// Install the tracing subscriber, exporting to OTLP when an endpoint is configured.
///
/// The returned guard must live until shutdown so pending spans and metrics flush.
pub fn setup_logging(config: &Config) -> anyhow::Result<Option<TelemetryGuard>> {
    match &config.otel_endpoint {
        Some(endpoint) => {
            let guard =
                TelemetryGuard::init(SERVICE_NAME, endpoint, config.log_level, config.environment)?;
            Ok(Some(guard))
        }
        None => {
            common::setup_logging(config.log_level, config.environment);
            Ok(None)
        }
    }
}
