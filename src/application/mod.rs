// Application layer - scrape use case, scheduling and the ports it depends on
pub mod metrics_sink;
pub mod scrape_service;
pub mod sensor_source;
pub mod ticker;
