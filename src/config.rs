use crate::error::Result;
use crate::idempotency::WorkflowConfig;
use crate::observability::{LogConfig, LogFormat};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct Settings {
    #[validate]
    pub database: DatabaseSettings,
    #[validate]
    pub idempotency: IdempotencySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DatabaseSettings {
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(range(min = 1))]
    pub pool_size: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    #[validate(range(min = 1))]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IdempotencySettings {
    /// How long a record is kept after its first reservation.
    #[validate(range(min = 1))]
    pub retention_seconds: i64,
    /// Extra age past `expires_at` before the janitor deletes a record.
    #[serde(default)]
    #[validate(range(min = 0))]
    pub sweep_grace_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    /// Loads `config/default`, an optional `config/local`, then `APP__*`
    /// environment variables (after reading `.env`).
    pub fn new() -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

impl From<&IdempotencySettings> for WorkflowConfig {
    fn from(settings: &IdempotencySettings) -> Self {
        Self {
            retention_seconds: settings.retention_seconds,
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        LogConfig::new(&settings.level, LogFormat::from(settings.format.as_str()))
    }
}
