// Scrape service - one fetch/compute/export cycle over all configured sensors
use crate::application::metrics_sink::MetricsSink;
use crate::application::sensor_source::SensorSource;
use crate::domain::aqi::AqiCalculator;
use crate::error::Error;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::Instrument;

/// Outcome of a single scrape cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct ScrapeService {
    source: Arc<dyn SensorSource>,
    sink: Arc<dyn MetricsSink>,
    calculator: AqiCalculator,
    sensor_ids: Vec<String>,
}

impl ScrapeService {
    pub fn new(
        source: Arc<dyn SensorSource>,
        sink: Arc<dyn MetricsSink>,
        calculator: AqiCalculator,
        sensor_ids: Vec<String>,
    ) -> Self {
        Self {
            source,
            sink,
            calculator,
            sensor_ids,
        }
    }

    /// Fetch every sensor in turn and export what it reports.
    ///
    /// A failing sensor is logged and skipped; it never stops the cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let span = tracing::info_span!("scrape_cycle", started_at = %started_at.to_rfc3339());

        async {
            let mut report = CycleReport::default();
            for sensor_id in &self.sensor_ids {
                match self.scrape_sensor(sensor_id, started_at).await {
                    Ok(()) => report.updated.push(sensor_id.clone()),
                    Err(_) => report.failed.push(sensor_id.clone()),
                }
            }

            tracing::info!(
                updated = report.updated.len(),
                failed = report.failed.len(),
                "scrape cycle finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn scrape_sensor(&self, sensor_id: &str, cycle: DateTime<Utc>) -> Result<(), Error> {
        tracing::debug!(sensor_id, "collecting sensor data");

        let reading = match self.source.fetch(sensor_id).await {
            Ok(reading) => reading,
            Err(e) => {
                match &e {
                    Error::Throttled { .. } | Error::SensorNotFound { .. } => {
                        tracing::warn!(sensor_id, cycle = %cycle, error = %e, "skipping sensor")
                    }
                    _ => tracing::error!(sensor_id, cycle = %cycle, error = %e, "skipping sensor"),
                }
                self.sink.record_fetch_error(sensor_id, &e);
                return Err(e);
            }
        };

        let scores = match self.calculator.score(&reading) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(sensor_id, cycle = %cycle, error = %e, "discarding reading");
                return Err(e);
            }
        };

        tracing::debug!(
            sensor_id,
            pm25 = ?reading.pm25,
            pm10 = ?reading.pm10,
            aqi = ?scores.composite.map(|c| c.value),
            "sensor updated"
        );
        self.sink.record_reading(&reading, &scores);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aqi::AqiScores;
    use crate::domain::reading::SensorReading;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum FakeResponse {
        Reading { pm25: f64, pm10: f64 },
        Fail,
    }

    #[derive(Default)]
    struct FakeSource {
        pub responses: HashMap<String, FakeResponse>,
    }

    #[async_trait]
    impl SensorSource for FakeSource {
        async fn fetch(&self, sensor_id: &str) -> crate::error::Result<SensorReading> {
            match self.responses.get(sensor_id) {
                Some(FakeResponse::Reading { pm25, pm10 }) => {
                    let mut reading = SensorReading::new(sensor_id, Utc::now());
                    reading.pm25 = Some(*pm25);
                    reading.pm10 = Some(*pm10);
                    Ok(reading)
                }
                Some(FakeResponse::Fail) => Err(Error::Fetch {
                    sensor_id: sensor_id.to_string(),
                    message: "HTTP 500".to_string(),
                }),
                None => Err(Error::SensorNotFound {
                    sensor_id: sensor_id.to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeSink {
        pub readings: Mutex<Vec<(SensorReading, AqiScores)>>,
        pub errors: Mutex<Vec<(String, &'static str)>>,
    }

    impl MetricsSink for FakeSink {
        fn record_reading(&self, reading: &SensorReading, scores: &AqiScores) {
            self.readings
                .lock()
                .unwrap()
                .push((reading.clone(), *scores));
        }

        fn record_fetch_error(&self, sensor_id: &str, error: &Error) {
            self.errors
                .lock()
                .unwrap()
                .push((sensor_id.to_string(), error.kind()));
        }
    }

    fn service(source: FakeSource, sink: Arc<FakeSink>, ids: &[&str]) -> ScrapeService {
        ScrapeService::new(
            Arc::new(source),
            sink,
            AqiCalculator::new().unwrap(),
            ids.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_cycle_updates_all_sensors() {
        let mut source = FakeSource::default();
        source.responses.insert(
            "1".to_string(),
            FakeResponse::Reading { pm25: 12.0, pm10: 20.0 },
        );
        source.responses.insert(
            "2".to_string(),
            FakeResponse::Reading { pm25: 1.0, pm10: 154.0 },
        );
        let sink = Arc::new(FakeSink::default());

        let report = service(source, sink.clone(), &["1", "2"]).run_cycle().await;

        assert_eq!(report.updated, vec!["1", "2"]);
        assert!(report.failed.is_empty());
        let readings = sink.readings.lock().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].1.composite.unwrap().value, 50);
        assert_eq!(readings[1].1.composite.unwrap().value, 100);
    }

    #[tokio::test]
    async fn test_failed_sensor_does_not_block_others() {
        let mut source = FakeSource::default();
        source.responses.insert("1".to_string(), FakeResponse::Fail);
        source.responses.insert(
            "2".to_string(),
            FakeResponse::Reading { pm25: 35.4, pm10: 10.0 },
        );
        let sink = Arc::new(FakeSink::default());

        let report = service(source, sink.clone(), &["1", "2", "3"]).run_cycle().await;

        assert_eq!(report.updated, vec!["2"]);
        assert_eq!(report.failed, vec!["1", "3"]);
        assert_eq!(sink.readings.lock().unwrap().len(), 1);
        assert_eq!(
            *sink.errors.lock().unwrap(),
            vec![("1".to_string(), "fetch"), ("3".to_string(), "not_found")]
        );
    }

    #[tokio::test]
    async fn test_negative_concentration_updates_nothing() {
        let mut source = FakeSource::default();
        source.responses.insert(
            "1".to_string(),
            FakeResponse::Reading { pm25: -4.0, pm10: 10.0 },
        );
        let sink = Arc::new(FakeSink::default());

        let report = service(source, sink.clone(), &["1"]).run_cycle().await;

        assert_eq!(report.failed, vec!["1"]);
        assert!(sink.readings.lock().unwrap().is_empty());
        assert!(sink.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_500_is_isolated_and_loop_continues() {
        use crate::application::ticker::Ticker;
        use crate::infrastructure::purple_air_client::PurpleAirClient;
        use crate::infrastructure::purple_air_client::tests::{spawn_upstream, TOKEN};
        use std::time::Duration;

        let url = spawn_upstream().await;
        let client = PurpleAirClient::new(url, TOKEN, Duration::from_secs(2)).unwrap();
        let sink = Arc::new(FakeSink::default());
        let service = ScrapeService::new(
            Arc::new(client),
            sink.clone(),
            AqiCalculator::new().unwrap(),
            vec!["1234".to_string(), "500".to_string()],
        );

        let first = service.run_cycle().await;
        assert_eq!(first.updated, vec!["1234"]);
        assert_eq!(first.failed, vec!["500"]);

        let (tx, rx) = tokio::sync::watch::channel(false);
        let ticker = Ticker::new(Duration::from_millis(20), Duration::from_secs(1));
        let handle = tokio::spawn(async move { ticker.run(|| service.run_cycle(), rx).await });

        let watched = sink.clone();
        tokio::time::timeout(Duration::from_secs(10), async move {
            while watched.errors.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("loop should keep scheduling cycles after a failed fetch");

        tx.send(true).unwrap();
        let runs = handle.await.unwrap();
        assert!(runs >= 2);

        let readings = sink.readings.lock().unwrap();
        assert!(readings.len() >= 3);
        assert!(readings.iter().all(|(r, _)| r.sensor_id == "1234"));
        assert!(
            sink.errors
                .lock()
                .unwrap()
                .iter()
                .all(|(id, kind)| id == "500" && *kind == "fetch")
        );
    }
}
