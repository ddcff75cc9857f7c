// Pollutant domain model
use super::breakpoint::Breakpoint;

/// Particulate matter size classes tracked by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
}

// EPA technical assistance document (2018), table 5.
// https://www.airnow.gov/sites/default/files/2020-05/aqi-technical-assistance-document-sept2018.pdf
const PM25_BREAKPOINTS: &[Breakpoint] = &[
    Breakpoint::new(0.0, 12.0, 0, 50),
    Breakpoint::new(12.1, 35.4, 51, 100),
    Breakpoint::new(35.5, 55.4, 101, 150),
    Breakpoint::new(55.5, 150.4, 151, 200),
    Breakpoint::new(150.5, 250.4, 201, 300),
    Breakpoint::new(250.5, 350.4, 301, 400),
    Breakpoint::new(350.5, 500.4, 401, 500),
];

const PM10_BREAKPOINTS: &[Breakpoint] = &[
    Breakpoint::new(0.0, 54.0, 0, 50),
    Breakpoint::new(55.0, 154.0, 51, 100),
    Breakpoint::new(155.0, 254.0, 101, 150),
    Breakpoint::new(255.0, 354.0, 151, 200),
    Breakpoint::new(355.0, 424.0, 201, 300),
    Breakpoint::new(425.0, 504.0, 301, 400),
    Breakpoint::new(505.0, 604.0, 401, 500),
];

impl Pollutant {
    pub const ALL: [Pollutant; 2] = [Pollutant::Pm25, Pollutant::Pm10];

    /// Metric label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm25",
            Pollutant::Pm10 => "pm10",
        }
    }

    pub fn breakpoints(&self) -> &'static [Breakpoint] {
        match self {
            Pollutant::Pm25 => PM25_BREAKPOINTS,
            Pollutant::Pm10 => PM10_BREAKPOINTS,
        }
    }

    /// Granularity concentrations are truncated to before table lookup
    /// (one decimal for PM2.5, whole µg/m³ for PM10).
    pub fn resolution(&self) -> f64 {
        match self {
            Pollutant::Pm25 => 0.1,
            Pollutant::Pm10 => 1.0,
        }
    }
}

impl std::fmt::Display for Pollutant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
