// Domain layer - AQI tables, calculation and sensor readings
pub mod aqi;
pub mod breakpoint;
pub mod pollutant;
pub mod reading;
