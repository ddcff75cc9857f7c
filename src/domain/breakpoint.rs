// Breakpoint tables for piecewise-linear AQI interpolation
use crate::error::{Error, Result};

/// One linear segment of an AQI table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub conc_low: f64,
    pub conc_high: f64,
    pub aqi_low: u32,
    pub aqi_high: u32,
}

impl Breakpoint {
    pub const fn new(conc_low: f64, conc_high: f64, aqi_low: u32, aqi_high: u32) -> Self {
        Self {
            conc_low,
            conc_high,
            aqi_low,
            aqi_high,
        }
    }

    fn contains(&self, concentration: f64) -> bool {
        concentration >= self.conc_low && concentration <= self.conc_high
    }

    fn interpolate(&self, concentration: f64) -> f64 {
        let aqi_span = f64::from(self.aqi_high - self.aqi_low);
        let conc_span = self.conc_high - self.conc_low;
        aqi_span / conc_span * (concentration - self.conc_low) + f64::from(self.aqi_low)
    }
}

/// Validated, ordered breakpoints for a single pollutant.
///
/// Segments start at zero, ascend, and are contiguous at the table's
/// resolution. The last segment is open-ended: concentrations above it are
/// extrapolated along its slope.
#[derive(Debug, Clone)]
pub struct BreakpointTable {
    segments: Vec<Breakpoint>,
    resolution: f64,
}

impl BreakpointTable {
    pub fn new(segments: &[Breakpoint], resolution: f64) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(Error::Config(format!(
                "breakpoint table resolution must be positive, got {}",
                resolution
            )));
        }

        let first = segments
            .first()
            .ok_or_else(|| Error::Config("breakpoint table is empty".to_string()))?;
        if first.conc_low != 0.0 || first.aqi_low != 0 {
            return Err(Error::Config(format!(
                "breakpoint table must start at zero, starts at {:?}",
                first
            )));
        }

        let tolerance = resolution / 100.0;
        for (idx, segment) in segments.iter().enumerate() {
            if !(segment.conc_low.is_finite() && segment.conc_high.is_finite())
                || segment.conc_low >= segment.conc_high
                || segment.aqi_low >= segment.aqi_high
            {
                return Err(Error::Config(format!(
                    "breakpoint segment {} is not increasing: {:?}",
                    idx, segment
                )));
            }

            if idx == 0 {
                continue;
            }
            let prev = &segments[idx - 1];
            let expected_low = prev.conc_high + resolution;
            if (segment.conc_low - expected_low).abs() > tolerance {
                return Err(Error::Config(format!(
                    "breakpoint segment {} starts at {} but previous ends at {} (gap or overlap)",
                    idx, segment.conc_low, prev.conc_high
                )));
            }
            if segment.aqi_low != prev.aqi_high + 1 {
                return Err(Error::Config(format!(
                    "breakpoint segment {} starts at AQI {} but previous ends at AQI {}",
                    idx, segment.aqi_low, prev.aqi_high
                )));
            }
        }

        Ok(Self {
            segments: segments.to_vec(),
            resolution,
        })
    }

    /// Interpolated (unrounded) AQI for a non-negative concentration.
    pub fn interpolate(&self, concentration: f64) -> f64 {
        let truncated = self.truncate(concentration);
        let segment = self
            .segments
            .iter()
            .find(|s| s.contains(truncated))
            // Only reachable above the last segment, which is open-ended.
            .unwrap_or(&self.segments[self.segments.len() - 1]);
        segment.interpolate(truncated)
    }

    /// Truncate to the table's reporting granularity. The small bias absorbs
    /// binary representation error (35.4 must land on 354 tenths, not 353).
    /// Dividing by the step count keeps results equal to the table literals.
    fn truncate(&self, concentration: f64) -> f64 {
        let per_unit = 1.0 / self.resolution;
        let steps = (concentration * per_unit + 1e-6).floor();
        steps / per_unit
    }
}
