use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://www.purpleair.com/json";
pub const DEFAULT_METRICS_PORT: u16 = 9101;
pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

const ENV_PREFIX: &str = "PAS";

/// Settings as they arrive from file and environment, before validation.
#[derive(Debug, Deserialize, Clone)]
struct RawScraperConfig {
    /// Comma separated show IDs.
    #[serde(default)]
    sensor_ids: Option<String>,
    #[serde(default)]
    api_token: Option<String>,
    log_level: String,
    metrics_port: u16,
    interval_secs: u64,
    request_timeout_secs: u64,
    shutdown_grace_secs: u64,
    api_url: String,
}

/// Validated, immutable process configuration.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub sensor_ids: Vec<String>,
    pub api_token: String,
    pub log_level: String,
    pub metrics_port: u16,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub api_url: String,
}

/// Load from `config/scraper.*` (optional) overlaid with `PAS_*` variables.
pub fn load_scraper_config() -> Result<ScraperConfig> {
    build_config(config::Environment::with_prefix(ENV_PREFIX))
}

fn build_config(env: config::Environment) -> Result<ScraperConfig> {
    let settings = config::Config::builder()
        .set_default("log_level", "info")?
        .set_default("metrics_port", i64::from(DEFAULT_METRICS_PORT))?
        .set_default("interval_secs", DEFAULT_INTERVAL_SECS)?
        .set_default("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT_SECS)?
        .set_default("shutdown_grace_secs", DEFAULT_SHUTDOWN_GRACE_SECS)?
        .set_default("api_url", DEFAULT_API_URL)?
        .add_source(config::File::with_name("config/scraper").required(false))
        .add_source(env)
        .build()?;

    let raw: RawScraperConfig = settings.try_deserialize()?;
    raw.validate()
}

impl RawScraperConfig {
    fn validate(self) -> Result<ScraperConfig> {
        let sensor_ids = parse_sensor_ids(self.sensor_ids.as_deref().unwrap_or_default())?;

        let api_token = self
            .api_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("missing env var: {}_API_TOKEN", ENV_PREFIX)))?;

        if self.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("api_url cannot be empty".to_string()));
        }

        Ok(ScraperConfig {
            sensor_ids,
            api_token,
            log_level: self.log_level,
            metrics_port: self.metrics_port,
            interval: Duration::from_secs(self.interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            api_url: self.api_url.trim().to_string(),
        })
    }
}

/// Split a comma separated ID list. IDs are PurpleAir show IDs, so must be
/// numeric.
pub fn parse_sensor_ids(value: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if id.parse::<u64>().is_err() {
            return Err(Error::Config(format!("invalid sensor id: {:?}", id)));
        }
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    if ids.is_empty() {
        return Err(Error::Config(format!(
            "missing env var: {}_SENSOR_IDS",
            ENV_PREFIX
        )));
    }
    Ok(ids)
}
