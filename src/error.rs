// Error taxonomy for the exporter
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration, or malformed static breakpoint data.
    /// Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure, timeout or non-2xx status for one sensor.
    #[error("failed to fetch sensor {sensor_id}: {message}")]
    Fetch { sensor_id: String, message: String },

    /// Upstream answered 429.
    #[error("throttled while fetching sensor {sensor_id}")]
    Throttled { sensor_id: String },

    /// Malformed JSON or unusable fields in a sensor record.
    #[error("failed to parse response for sensor {sensor_id}: {message}")]
    Parse { sensor_id: String, message: String },

    #[error("sensor {sensor_id} not found in upstream response")]
    SensorNotFound { sensor_id: String },

    /// A concentration outside the domain of the AQI tables.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Short label used when counting per-sensor failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Fetch { .. } => "fetch",
            Error::Throttled { .. } => "throttled",
            Error::Parse { .. } => "parse",
            Error::SensorNotFound { .. } => "not_found",
            Error::InvalidInput(_) => "invalid_input",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
