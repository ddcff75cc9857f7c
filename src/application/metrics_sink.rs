// Sink trait for exported metrics
use crate::domain::aqi::AqiScores;
use crate::domain::reading::SensorReading;
use crate::error::Error;

/// Destination for the values produced by a scrape cycle.
///
/// Every value is a current-value gauge: recording a reading replaces
/// whatever was previously exported for that sensor.
pub trait MetricsSink: Send + Sync {
    fn record_reading(&self, reading: &SensorReading, scores: &AqiScores);

    fn record_fetch_error(&self, sensor_id: &str, error: &Error);
}
