// Source trait for upstream sensor data
use crate::domain::reading::SensorReading;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Fetch the current reading for one configured sensor.
    async fn fetch(&self, sensor_id: &str) -> Result<SensorReading>;
}
