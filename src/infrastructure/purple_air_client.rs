// PurpleAir HTTP client - SensorSource backed by the PurpleAir JSON API
use crate::application::sensor_source::SensorSource;
use crate::domain::reading::SensorReading;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Longest slice of an error response body carried into `Error::Fetch`.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct PurpleAirClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PurpleAirResponse {
    results: Vec<PurpleAirRecord>,
}

/// One channel of a sensor unit. Most units report two (A and B).
#[derive(Debug, Deserialize)]
struct PurpleAirRecord {
    #[serde(rename = "Label", default)]
    label: Option<String>,
    #[serde(default)]
    pm2_5_atm: Option<Numeric>,
    #[serde(default)]
    pm10_0_atm: Option<Numeric>,
    #[serde(default)]
    temp_f: Option<Numeric>,
    #[serde(default)]
    humidity: Option<Numeric>,
    #[serde(default)]
    pressure: Option<Numeric>,
    #[serde(rename = "LastSeen", default)]
    last_seen: Option<i64>,
}

/// PurpleAir sends most measurements as strings, some as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl PurpleAirClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
        })
    }

    /// Both parameters are percent-encoded; tokens may contain reserved
    /// characters.
    fn build_url(&self, sensor_id: &str) -> String {
        let separator = if self.api_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}show={}&key={}",
            self.api_url,
            separator,
            urlencoding::encode(sensor_id),
            urlencoding::encode(&self.token)
        )
    }
}

#[async_trait]
impl SensorSource for PurpleAirClient {
    async fn fetch(&self, sensor_id: &str) -> Result<SensorReading> {
        let url = self.build_url(sensor_id);
        tracing::debug!(sensor_id, api_url = %self.api_url, "fetching sensor");

        let fetch_error = |message: String| Error::Fetch {
            sensor_id: sensor_id.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    fetch_error("request timed out".to_string())
                } else {
                    // The URL carries the token; strip it from the error.
                    fetch_error(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Throttled {
                sensor_id: sensor_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fetch_error(format!("status {}: {}", status, excerpt(&body))));
        }

        let body = response
            .text()
            .await
            .map_err(|e| fetch_error(format!("failed to read body: {}", e.without_url())))?;

        parse_response(sensor_id, &body, Utc::now())
    }
}

/// Fold every channel of the response into one reading.
///
/// PM values are averaged over the channels reporting them; label and
/// environmental values come from the first channel that has them; the
/// observation time is the newest `LastSeen`, or `fetched_at` without one.
fn parse_response(sensor_id: &str, body: &str, fetched_at: DateTime<Utc>) -> Result<SensorReading> {
    let parse_error = |message: String| Error::Parse {
        sensor_id: sensor_id.to_string(),
        message,
    };

    let response: PurpleAirResponse =
        serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
    if response.results.is_empty() {
        return Err(Error::SensorNotFound {
            sensor_id: sensor_id.to_string(),
        });
    }

    let field = |name: &str, value: &Option<Numeric>| -> Result<Option<f64>> {
        match value {
            None => Ok(None),
            Some(Numeric::Number(n)) => Ok(Some(*n)),
            Some(Numeric::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| parse_error(format!("field {} is not numeric: {:?}", name, s))),
        }
    };

    let mut reading = SensorReading::new(sensor_id, fetched_at);
    let mut pm25 = Vec::new();
    let mut pm10 = Vec::new();
    let mut last_seen: Option<i64> = None;

    for record in &response.results {
        pm25.extend(field("pm2_5_atm", &record.pm2_5_atm)?);
        pm10.extend(field("pm10_0_atm", &record.pm10_0_atm)?);

        if reading.label.is_none() {
            reading.label = record
                .label
                .as_ref()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
        }
        if reading.temperature_f.is_none() {
            reading.temperature_f = field("temp_f", &record.temp_f)?;
        }
        if reading.humidity.is_none() {
            reading.humidity = field("humidity", &record.humidity)?;
        }
        if reading.pressure.is_none() {
            reading.pressure = field("pressure", &record.pressure)?;
        }
        last_seen = last_seen.max(record.last_seen);
    }

    reading.pm25 = mean(&pm25);
    reading.pm10 = mean(&pm10);
    if let Some(seen) = last_seen.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)) {
        reading.observed_at = seen;
    }

    Ok(reading)
}

/// First `ERROR_BODY_LIMIT` characters of a trimmed body.
fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
