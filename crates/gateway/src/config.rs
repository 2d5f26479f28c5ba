use common::{Environment, LogLevel};
use inference::InferenceConfig;
use serde::Deserialize;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Quality of the annotated JPEG returned by the detect routes (1-100).
    pub jpeg_quality: u8,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub environment: Environment,
    /// OTLP collector; logging only when unset.
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

/// Defaults, then `SKYGUARD_*` environment variables with `__` between
/// nested keys (`SKYGUARD_INFERENCE__MODEL_PATH`).
pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .set_default("log_level", "info")?
        .set_default("environment", "development")?
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5000)?
        .set_default("server.jpeg_quality", i64::from(DEFAULT_JPEG_QUALITY))?
        .add_source(
            config::Environment::with_prefix("SKYGUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    validate(&config)?;

    Ok(config)
}

/// Keys of the statistics response that category names are flattened beside.
pub const RESERVED_CATEGORY_NAMES: [&str; 3] = ["total", "categories", "recent"];

pub fn validate(config: &Config) -> Result<(), config::ConfigError> {
    for category in &config.inference.history_categories {
        if RESERVED_CATEGORY_NAMES.contains(&category.name.as_str()) {
            return Err(config::ConfigError::Message(format!(
                "history category name `{}` is reserved",
                category.name
            )));
        }
    }
    Ok(())
}
