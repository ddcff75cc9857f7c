// Sensor reading domain model
use chrono::{DateTime, Utc};

use super::pollutant::Pollutant;

/// The latest observation for one configured sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_id: String,
    pub label: Option<String>,
    /// PM2.5 concentration in µg/m³.
    pub pm25: Option<f64>,
    /// PM10 concentration in µg/m³.
    pub pm10: Option<f64>,
    pub temperature_f: Option<f64>,
    pub humidity: Option<f64>,
    /// Pressure in millibar.
    pub pressure: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(sensor_id: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            label: None,
            pm25: None,
            pm10: None,
            temperature_f: None,
            humidity: None,
            pressure: None,
            observed_at,
        }
    }

    pub fn concentration(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
        }
    }
}
