// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod prometheus_metrics;
pub mod purple_air_client;
