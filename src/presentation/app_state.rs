// Application state for HTTP handlers
use crate::infrastructure::prometheus_metrics::PrometheusMetrics;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<PrometheusMetrics>,
}
