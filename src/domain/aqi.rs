// AQI calculation from particulate matter concentrations
//
// Instantaneous approximation: EPA defines AQI over 10 minute / 1 hour
// averages, we compute it from the latest reading only.
use super::breakpoint::BreakpointTable;
use super::pollutant::Pollutant;
use super::reading::SensorReading;
use crate::error::{Error, Result};

/// Composite AQI for one sensor: the maximum across pollutants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeAqi {
    pub pm25: u32,
    pub pm10: u32,
    pub value: u32,
    /// Pollutant driving the composite value, PM2.5 on ties.
    pub dominant: Pollutant,
}

impl CompositeAqi {
    fn from_scores(pm25: u32, pm10: u32) -> Self {
        let (value, dominant) = if pm10 > pm25 {
            (pm10, Pollutant::Pm10)
        } else {
            (pm25, Pollutant::Pm25)
        };
        Self {
            pm25,
            pm10,
            value,
            dominant,
        }
    }
}

/// AQI scores derived from one reading. A pollutant the sensor did not
/// report has no score, and the composite needs both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AqiScores {
    pub pm25: Option<u32>,
    pub pm10: Option<u32>,
    pub composite: Option<CompositeAqi>,
}

impl AqiScores {
    pub fn get(&self, pollutant: Pollutant) -> Option<u32> {
        match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
        }
    }
}

/// Maps concentrations to AQI scores using the EPA breakpoint tables.
///
/// Tables are validated once in [`AqiCalculator::new`]; after that every
/// computation is a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct AqiCalculator {
    pm25: BreakpointTable,
    pm10: BreakpointTable,
}

impl AqiCalculator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pm25: Self::table_for(Pollutant::Pm25)?,
            pm10: Self::table_for(Pollutant::Pm10)?,
        })
    }

    fn table_for(pollutant: Pollutant) -> Result<BreakpointTable> {
        BreakpointTable::new(pollutant.breakpoints(), pollutant.resolution()).map_err(|e| {
            Error::Config(format!("invalid {} breakpoint table: {}", pollutant, e))
        })
    }

    fn table(&self, pollutant: Pollutant) -> &BreakpointTable {
        match pollutant {
            Pollutant::Pm25 => &self.pm25,
            Pollutant::Pm10 => &self.pm10,
        }
    }

    /// AQI for a concentration in µg/m³, rounded half up.
    pub fn compute(&self, pollutant: Pollutant, concentration: f64) -> Result<u32> {
        if !concentration.is_finite() || concentration < 0.0 {
            return Err(Error::InvalidInput(format!(
                "{} concentration must be a non-negative number, got {}",
                pollutant, concentration
            )));
        }

        let aqi = self.table(pollutant).interpolate(concentration);
        Ok((aqi + 0.5).floor() as u32)
    }

    pub fn composite(&self, pm25: f64, pm10: f64) -> Result<CompositeAqi> {
        let pm25 = self.compute(Pollutant::Pm25, pm25)?;
        let pm10 = self.compute(Pollutant::Pm10, pm10)?;
        Ok(CompositeAqi::from_scores(pm25, pm10))
    }

    /// Scores every pollutant the reading carries. Any out-of-domain
    /// concentration fails the whole reading.
    pub fn score(&self, reading: &SensorReading) -> Result<AqiScores> {
        if let (Some(pm25), Some(pm10)) = (reading.pm25, reading.pm10) {
            let composite = self.composite(pm25, pm10)?;
            return Ok(AqiScores {
                pm25: Some(composite.pm25),
                pm10: Some(composite.pm10),
                composite: Some(composite),
            });
        }

        Ok(AqiScores {
            pm25: reading
                .pm25
                .map(|c| self.compute(Pollutant::Pm25, c))
                .transpose()?,
            pm10: reading
                .pm10
                .map(|c| self.compute(Pollutant::Pm10, c))
                .transpose()?,
            composite: None,
        })
    }
}
