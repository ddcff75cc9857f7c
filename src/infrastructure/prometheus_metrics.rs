// Prometheus registry - MetricsSink exported in the text exposition format
use crate::application::metrics_sink::MetricsSink;
use crate::domain::aqi::AqiScores;
use crate::domain::pollutant::Pollutant;
use crate::domain::reading::SensorReading;
use crate::error::Error;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;

type FloatGauge = Gauge<f64, AtomicU64>;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SensorLabels {
    sensor_id: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PollutantLabels {
    sensor_id: String,
    pollutant: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InfoLabels {
    sensor_id: String,
    label: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    sensor_id: String,
    kind: String,
}

/// Gauge families for every exported series, plus the registry that encodes
/// them. Families lock internally, so the scrape task and HTTP handlers can
/// share one instance.
pub struct PrometheusMetrics {
    registry: Registry,
    pm25_concentration: Family<SensorLabels, FloatGauge>,
    pm10_concentration: Family<SensorLabels, FloatGauge>,
    aqi: Family<PollutantLabels, Gauge>,
    aqi_composite: Family<SensorLabels, Gauge>,
    aqi_dominant_pollutant: Family<PollutantLabels, Gauge>,
    temperature: Family<SensorLabels, FloatGauge>,
    humidity: Family<SensorLabels, FloatGauge>,
    pressure: Family<SensorLabels, FloatGauge>,
    last_seen: Family<SensorLabels, Gauge>,
    sensor_info: Family<InfoLabels, Gauge>,
    /// Label currently exported per sensor in `sensor_info`.
    labels: Mutex<HashMap<String, String>>,
    fetch_errors: Family<ErrorLabels, Counter>,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let pm25_concentration = Family::<SensorLabels, FloatGauge>::default();
        registry.register(
            "pm25_concentration",
            "PM2.5 concentration (ug/m^3)",
            pm25_concentration.clone(),
        );
        let pm10_concentration = Family::<SensorLabels, FloatGauge>::default();
        registry.register(
            "pm10_concentration",
            "PM10 concentration (ug/m^3)",
            pm10_concentration.clone(),
        );
        let aqi = Family::<PollutantLabels, Gauge>::default();
        registry.register("aqi", "AQI computed per pollutant", aqi.clone());
        let aqi_composite = Family::<SensorLabels, Gauge>::default();
        registry.register(
            "aqi_composite",
            "AQI of the worst pollutant",
            aqi_composite.clone(),
        );
        let aqi_dominant_pollutant = Family::<PollutantLabels, Gauge>::default();
        registry.register(
            "aqi_dominant_pollutant",
            "1 for the pollutant driving the composite AQI, 0 otherwise",
            aqi_dominant_pollutant.clone(),
        );
        let temperature = Family::<SensorLabels, FloatGauge>::default();
        registry.register(
            "temperature_fahrenheit",
            "Temperature in degrees Fahrenheit",
            temperature.clone(),
        );
        let humidity = Family::<SensorLabels, FloatGauge>::default();
        registry.register("humidity_percent", "Relative humidity", humidity.clone());
        let pressure = Family::<SensorLabels, FloatGauge>::default();
        registry.register(
            "pressure_millibars",
            "Pressure in millibar",
            pressure.clone(),
        );
        let last_seen = Family::<SensorLabels, Gauge>::default();
        registry.register(
            "last_seen_timestamp_seconds",
            "Timestamp when this sensor was last seen",
            last_seen.clone(),
        );
        let sensor_info = Family::<InfoLabels, Gauge>::default();
        registry.register(
            "sensor_info",
            "Sensor metadata, always 1",
            sensor_info.clone(),
        );
        let fetch_errors = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "fetch_errors",
            "Errors fetching data from a sensor",
            fetch_errors.clone(),
        );

        Self {
            registry,
            pm25_concentration,
            pm10_concentration,
            aqi,
            aqi_composite,
            aqi_dominant_pollutant,
            temperature,
            humidity,
            pressure,
            last_seen,
            sensor_info,
            labels: Mutex::new(HashMap::new()),
            fetch_errors,
        }
    }

    /// Render every registered series in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    /// Keep exactly one `sensor_info` series per sensor, for its current label.
    fn update_info(&self, sensor_id: &str, label: Option<&str>) {
        let mut labels = match self.labels.lock() {
            Ok(labels) => labels,
            Err(poisoned) => poisoned.into_inner(),
        };

        let previous = match label {
            Some(label) => labels.insert(sensor_id.to_string(), label.to_string()),
            None => labels.remove(sensor_id),
        };
        if let Some(previous) = previous.filter(|p| Some(p.as_str()) != label) {
            self.sensor_info.remove(&InfoLabels {
                sensor_id: sensor_id.to_string(),
                label: previous,
            });
        }
        if let Some(label) = label {
            self.sensor_info
                .get_or_create(&InfoLabels {
                    sensor_id: sensor_id.to_string(),
                    label: label.to_string(),
                })
                .set(1);
        }
    }

    fn concentration(&self, pollutant: Pollutant) -> &Family<SensorLabels, FloatGauge> {
        match pollutant {
            Pollutant::Pm25 => &self.pm25_concentration,
            Pollutant::Pm10 => &self.pm10_concentration,
        }
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Set the gauge, or drop the series when the sensor stopped reporting it.
fn set_or_remove(family: &Family<SensorLabels, FloatGauge>, labels: &SensorLabels, value: Option<f64>) {
    match value {
        Some(v) => {
            family.get_or_create(labels).set(v);
        }
        None => {
            family.remove(labels);
        }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_reading(&self, reading: &SensorReading, scores: &AqiScores) {
        let sensor = SensorLabels {
            sensor_id: reading.sensor_id.clone(),
        };

        for pollutant in Pollutant::ALL {
            set_or_remove(
                self.concentration(pollutant),
                &sensor,
                reading.concentration(pollutant),
            );

            let labels = PollutantLabels {
                sensor_id: reading.sensor_id.clone(),
                pollutant: pollutant.as_str().to_string(),
            };
            match scores.get(pollutant) {
                Some(aqi) => {
                    self.aqi.get_or_create(&labels).set(i64::from(aqi));
                }
                None => {
                    self.aqi.remove(&labels);
                }
            }
        }

        match scores.composite {
            Some(composite) => {
                self.aqi_composite
                    .get_or_create(&sensor)
                    .set(i64::from(composite.value));
                for pollutant in Pollutant::ALL {
                    let labels = PollutantLabels {
                        sensor_id: reading.sensor_id.clone(),
                        pollutant: pollutant.as_str().to_string(),
                    };
                    let dominant = i64::from(composite.dominant == pollutant);
                    self.aqi_dominant_pollutant
                        .get_or_create(&labels)
                        .set(dominant);
                }
            }
            None => {
                self.aqi_composite.remove(&sensor);
                for pollutant in Pollutant::ALL {
                    self.aqi_dominant_pollutant.remove(&PollutantLabels {
                        sensor_id: reading.sensor_id.clone(),
                        pollutant: pollutant.as_str().to_string(),
                    });
                }
            }
        }

        set_or_remove(&self.temperature, &sensor, reading.temperature_f);
        set_or_remove(&self.humidity, &sensor, reading.humidity);
        set_or_remove(&self.pressure, &sensor, reading.pressure);
        self.last_seen
            .get_or_create(&sensor)
            .set(reading.observed_at.timestamp());
        self.update_info(&reading.sensor_id, reading.label.as_deref());
    }

    fn record_fetch_error(&self, sensor_id: &str, error: &Error) {
        self.fetch_errors
            .get_or_create(&ErrorLabels {
                sensor_id: sensor_id.to_string(),
                kind: error.kind().to_string(),
            })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aqi::AqiCalculator;
    use chrono::{TimeZone, Utc};

    fn reading(pm25: Option<f64>, pm10: Option<f64>) -> SensorReading {
        let mut reading = SensorReading::new("1234", Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        reading.label = Some("Backyard".to_string());
        reading.pm25 = pm25;
        reading.pm10 = pm10;
        reading.temperature_f = Some(71.5);
        reading
    }

    fn record(metrics: &PrometheusMetrics, reading: &SensorReading) {
        let scores = AqiCalculator::new().unwrap().score(reading).unwrap();
        metrics.record_reading(reading, &scores);
    }

    #[test]
    fn test_encodes_required_series() {
        let metrics = PrometheusMetrics::new();
        record(&metrics, &reading(Some(12.5), Some(154.0)));

        let text = metrics.encode().unwrap();
        assert!(text.contains("pm25_concentration{sensor_id=\"1234\"} 12.5"));
        assert!(text.contains("pm10_concentration{sensor_id=\"1234\"} 154.0"));
        assert!(text.contains("aqi{sensor_id=\"1234\",pollutant=\"pm25\"} 52"));
        assert!(text.contains("aqi{sensor_id=\"1234\",pollutant=\"pm10\"} 100"));
        assert!(text.contains("aqi_composite{sensor_id=\"1234\"} 100"));
        assert!(text.contains("aqi_dominant_pollutant{sensor_id=\"1234\",pollutant=\"pm10\"} 1"));
        assert!(text.contains("aqi_dominant_pollutant{sensor_id=\"1234\",pollutant=\"pm25\"} 0"));
        assert!(text.contains("temperature_fahrenheit{sensor_id=\"1234\"} 71.5"));
        assert!(text.contains("last_seen_timestamp_seconds{sensor_id=\"1234\"} 1700000000"));
        assert!(text.contains("sensor_info{sensor_id=\"1234\",label=\"Backyard\"} 1"));
        assert!(text.ends_with("# EOF\n"));
    }

    #[test]
    fn test_values_are_replaced() {
        let metrics = PrometheusMetrics::new();
        record(&metrics, &reading(Some(12.0), Some(10.0)));
        record(&metrics, &reading(Some(35.4), Some(10.0)));

        let text = metrics.encode().unwrap();
        assert!(text.contains("aqi_composite{sensor_id=\"1234\"} 100"));
        assert!(!text.contains("aqi_composite{sensor_id=\"1234\"} 50"));
    }

    #[test]
    fn test_missing_pollutant_drops_series() {
        let metrics = PrometheusMetrics::new();
        record(&metrics, &reading(Some(12.0), Some(10.0)));
        record(&metrics, &reading(Some(12.0), None));

        let text = metrics.encode().unwrap();
        assert!(!text.contains("pm10_concentration{"));
        assert!(!text.contains("pollutant=\"pm10\"} 9"));
        assert!(!text.contains("aqi_composite{"));
        assert!(!text.contains("aqi_dominant_pollutant{"));
        assert!(text.contains("aqi{sensor_id=\"1234\",pollutant=\"pm25\"} 50"));
    }

    #[test]
    fn test_relabel_replaces_sensor_info() {
        let metrics = PrometheusMetrics::new();
        let mut reading = reading(Some(12.0), Some(10.0));

        reading.label = Some("Old".to_string());
        record(&metrics, &reading);
        reading.label = Some("New".to_string());
        record(&metrics, &reading);

        let text = metrics.encode().unwrap();
        assert!(!text.contains("label=\"Old\""));
        assert!(text.contains("sensor_info{sensor_id=\"1234\",label=\"New\"} 1"));

        reading.label = None;
        record(&metrics, &reading);

        let text = metrics.encode().unwrap();
        assert!(!text.contains("sensor_info{"));
    }

    #[test]
    fn test_fetch_errors_counted() {
        let metrics = PrometheusMetrics::new();
        let err = Error::Throttled {
            sensor_id: "1234".to_string(),
        };
        metrics.record_fetch_error("1234", &err);
        metrics.record_fetch_error("1234", &err);

        let text = metrics.encode().unwrap();
        assert!(text.contains("fetch_errors_total{sensor_id=\"1234\",kind=\"throttled\"} 2"));
    }
}
